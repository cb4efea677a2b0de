//! 종단간 전송 시나리오 테스트
//!
//! 실제 UDP 루프백으로 서버와 클라이언트를 붙여서
//! 핸드쉐이크 / 다운로드 / 동시 업로드 / 불량 링크 / 종료를 검증.
//! 타이머는 테스트용으로 짧게 조정 (프로토콜 동작 자체는 동일)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use rtp::{Config, Error, PacketFactory, RtpClient, RtpServer};

fn test_config() -> Config {
    Config {
        initial_rtt_ms: 30,
        silence_window_ms: 200,
        fin_stall_ms: 30,
        ..Config::default()
    }
}

/// 결정적이지만 단조롭지 않은 테스트 데이터
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 251) as u8).collect()
}

async fn spawn_server(
    base_dir: &TempDir,
    output_dir: &TempDir,
    config: Config,
) -> (SocketAddr, Arc<RtpServer>, JoinHandle<()>) {
    let server = RtpServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        base_dir.path(),
        output_dir.path(),
        config,
    )
    .await
    .unwrap();
    let addr = server.local_addr();
    let handle = {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server.run().await;
        })
    };
    (addr, server, handle)
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("시간 초과: {}", what);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_happy_path_get() {
    let base_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    let content = pattern(10_000);
    std::fs::write(base_dir.path().join("data.bin"), &content).unwrap();

    let (addr, server, server_task) = spawn_server(&base_dir, &output_dir, test_config()).await;

    let client = RtpClient::start("127.0.0.1", addr, test_config()).await.unwrap();
    assert_eq!(server.active_connections(), 1);

    let data = client.get("data.bin").await.unwrap();
    assert_eq!(data.as_ref(), &content[..]);

    client.disconnect().await.unwrap();
    wait_until("연결 정리", || server.active_connections() == 0).await;
    server_task.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_missing_file_fails() {
    let base_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    let (addr, _server, server_task) = spawn_server(&base_dir, &output_dir, test_config()).await;

    let client = RtpClient::start("127.0.0.1", addr, test_config()).await.unwrap();
    let result = client.get("없는파일.bin").await;
    assert!(matches!(result, Err(Error::FileUnavailable { .. })));

    client.disconnect().await.unwrap();
    server_task.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_post_concurrent() {
    let base_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    let download = pattern(12_000);
    let upload = pattern(8_000);
    std::fs::write(base_dir.path().join("down.bin"), &download).unwrap();

    let (addr, _server, server_task) = spawn_server(&base_dir, &output_dir, test_config()).await;

    let client = RtpClient::start("127.0.0.1", addr, test_config()).await.unwrap();
    let data = client
        .get_post("down.bin", Bytes::from(upload.clone()))
        .await
        .unwrap();
    assert_eq!(data.as_ref(), &download[..]);

    // 업로드 파일은 DATAFIN 처리 태스크가 비동기로 기록
    let output_path = output_dir.path().to_path_buf();
    wait_until("업로드 저장", || {
        std::fs::read_dir(&output_path)
            .map(|entries| entries.count() == 1)
            .unwrap_or(false)
    })
    .await;

    let entry = std::fs::read_dir(output_dir.path()).unwrap().next().unwrap().unwrap();
    assert!(entry.file_name().to_string_lossy().starts_with("post_"));
    assert_eq!(std::fs::read(entry.path()).unwrap(), upload);

    client.disconnect().await.unwrap();
    server_task.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lossy_link_get() {
    let base_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    let content = pattern(15_000);
    std::fs::write(base_dir.path().join("lossy.bin"), &content).unwrap();

    // 서버측 링크만 불량 (DATA/DATAFIN/FINACK가 유실/오염/지연됨)
    let server_config = Config {
        initial_rtt_ms: 30,
        silence_window_ms: 300,
        fin_stall_ms: 30,
        ..Config::lossy()
    };
    let (addr, _server, server_task) = spawn_server(&base_dir, &output_dir, server_config).await;

    let result = tokio::time::timeout(Duration::from_secs(60), async {
        let client = RtpClient::start("127.0.0.1", addr, test_config()).await?;
        let data = client.get("lossy.bin").await?;
        client.disconnect().await?;
        Ok::<Bytes, Error>(data)
    })
    .await
    .expect("불량 링크 전송 시간 초과")
    .unwrap();

    assert_eq!(result.as_ref(), &content[..]);
    server_task.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_clients() {
    let base_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    let first = pattern(9_000);
    let second = pattern(13_000);
    std::fs::write(base_dir.path().join("first.bin"), &first).unwrap();
    std::fs::write(base_dir.path().join("second.bin"), &second).unwrap();

    let (addr, server, server_task) = spawn_server(&base_dir, &output_dir, test_config()).await;

    let a = RtpClient::start("127.0.0.1", addr, test_config()).await.unwrap();
    let b = RtpClient::start("127.0.0.1", addr, test_config()).await.unwrap();
    assert_eq!(server.active_connections(), 2);

    let (data_a, data_b) = tokio::join!(a.get("first.bin"), b.get("second.bin"));
    assert_eq!(data_a.unwrap().as_ref(), &first[..]);
    assert_eq!(data_b.unwrap().as_ref(), &second[..]);

    a.disconnect().await.unwrap();
    b.disconnect().await.unwrap();
    wait_until("연결 정리", || server.active_connections() == 0).await;
    server_task.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_simultaneous_disconnects() {
    let base_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    let (addr, server, server_task) = spawn_server(&base_dir, &output_dir, test_config()).await;

    let a = RtpClient::start("127.0.0.1", addr, test_config()).await.unwrap();
    let b = RtpClient::start("127.0.0.1", addr, test_config()).await.unwrap();
    assert_eq!(server.active_connections(), 2);

    // 두 연결이 동시에 FIN/END를 섞어 보내도 키별로 라우팅되어야 함
    let (result_a, result_b) = tokio::join!(a.disconnect(), b.disconnect());
    result_a.unwrap();
    result_b.unwrap();

    wait_until("동시 종료 정리", || server.active_connections() == 0).await;
    server_task.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_survives_garbage_datagrams() {
    let base_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    let content = pattern(3_000);
    std::fs::write(base_dir.path().join("ok.bin"), &content).unwrap();

    let (addr, _server, server_task) = spawn_server(&base_dir, &output_dir, test_config()).await;

    let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // 완전한 쓰레기
    socket.send_to(b"not a packet at all", addr).await.unwrap();
    socket.send_to(&[0u8; 3], addr).await.unwrap();

    // 체크섬은 유효하지만 타입 코드가 미정의인 프레임
    let mut factory = PacketFactory::new(
        socket.local_addr().unwrap().port() as u32,
        "127.0.0.1",
        5000,
    );
    let mut body = factory
        .create_syn(addr.port() as u32, "127.0.0.1")
        .encode()
        .to_vec();
    body[9] = 42; // code 필드
    socket
        .send_to(&rtp::mailman::stamp(&body), addr)
        .await
        .unwrap();

    // 서버가 여전히 정상 동작하는지 확인
    let client = RtpClient::start("127.0.0.1", addr, test_config()).await.unwrap();
    let data = client.get("ok.bin").await.unwrap();
    assert_eq!(data.as_ref(), &content[..]);
    client.disconnect().await.unwrap();
    server_task.abort();
}
