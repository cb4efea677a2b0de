//! RTP 클라이언트 - Reliable Transfer Protocol
//!
//! 윈도우 기반 신뢰성 파일 전송 프로토콜 클라이언트
//! - GET: 서버 파일 다운로드
//! - GET+POST: 다운로드와 업로드를 같은 연결에서 동시 수행
//!
//! 사용법:
//!   cargo run --release --bin rtp-client -- [OPTIONS]
//!
//! 예시:
//!   # 파일 다운로드
//!   cargo run --release --bin rtp-client -- --server 127.0.0.1:9000 --get data.bin
//!
//!   # 다운로드 + 업로드 동시
//!   cargo run --release --bin rtp-client -- -s 127.0.0.1:9000 -g data.bin -p upload.bin

use std::net::SocketAddr;
use std::path::PathBuf;

use bytes::Bytes;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use rtp::{Config, RtpClient, MIN_WINDOW_SIZE};

/// 클라이언트 설정
struct ClientConfig {
    local_ip: String,
    server_addr: SocketAddr,
    get_file: Option<String>,
    post_file: Option<PathBuf>,
    output_dir: PathBuf,
    window: u32,
    corrupt: bool,
    verbose: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            local_ip: "0.0.0.0".to_string(),
            server_addr: "127.0.0.1:9000".parse().expect("고정 기본 주소"),
            get_file: None,
            post_file: None,
            output_dir: PathBuf::from("."),
            window: Config::default().window_size,
            corrupt: false,
            verbose: false,
        }
    }
}

fn parse_args() -> ClientConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    config.server_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--local-ip" | "-l" => {
                if i + 1 < args.len() {
                    config.local_ip = args[i + 1].clone();
                    i += 1;
                }
            }
            "--get" | "-g" => {
                if i + 1 < args.len() {
                    config.get_file = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--post" | "-p" => {
                if i + 1 < args.len() {
                    config.post_file = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    config.output_dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--window" | "-w" => {
                if i + 1 < args.len() {
                    config.window = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--corrupt" | "-c" => {
                config.corrupt = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"RTP Client - Reliable Transfer Protocol 클라이언트

윈도우 기반 신뢰성 파일 전송 프로토콜 클라이언트
- 슬라이딩 윈도우 + 패킷별 ACK + RTT 적응 재전송
- 다운로드(GET)와 업로드(POST)를 같은 연결에서 동시 수행 가능

사용법:
  cargo run --release --bin rtp-client -- [OPTIONS]

옵션:
  -s, --server <ADDR>   서버 주소 (기본: 127.0.0.1:9000)
  -l, --local-ip <IP>   로컬 바인드 IP (기본: 0.0.0.0, 포트 자동)
  -g, --get <NAME>      다운로드할 파일명 (필수)
  -p, --post <PATH>     업로드할 로컬 파일 (지정시 GET과 동시 수행)
  -o, --output <PATH>   다운로드 저장 디렉토리 (기본: .)
  -w, --window <BYTES>  수신 윈도우 크기 (기본: 5000, 최소: 1000)
  -c, --corrupt         불량 링크 시뮬레이션 (10% 유실/오염 + 지연)
  -v, --verbose         디버그 로그 출력
  -h, --help            이 도움말 출력

예시:
  # 파일 다운로드
  cargo run --release --bin rtp-client -- --server 192.168.0.10:9000 --get data.bin

  # 불량 링크에서 다운로드 + 업로드
  cargo run --release --bin rtp-client -- -s 127.0.0.1:9000 -g a.bin -p b.bin -c
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client_config = parse_args();

    // 로깅 설정
    let level = if client_config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if client_config.window < MIN_WINDOW_SIZE {
        eprintln!(
            "윈도우 크기는 최소 {} 바이트여야 합니다 (지정값: {})",
            MIN_WINDOW_SIZE, client_config.window
        );
        std::process::exit(1);
    }

    let Some(get_file) = client_config.get_file.clone() else {
        eprintln!("--get <NAME> 옵션이 필요합니다 (--help 참고)");
        std::process::exit(1);
    };

    let config = if client_config.corrupt {
        Config::lossy()
    } else {
        Config::default()
    };
    let config = Config {
        window_size: client_config.window,
        ..config
    };

    info!("RTP Client starting...");
    info!("Server address: {}", client_config.server_addr);

    let client = RtpClient::start(&client_config.local_ip, client_config.server_addr, config).await?;
    info!("Bound to local address: {}", client.local_addr()?);

    let data = match &client_config.post_file {
        Some(post_path) => {
            let upload = Bytes::from(tokio::fs::read(post_path).await?);
            info!(
                "GET {} + POST {} ({} 바이트) 시작",
                get_file,
                post_path.display(),
                upload.len()
            );
            client.get_post(&get_file, upload).await?
        }
        None => {
            info!("GET {} 시작", get_file);
            client.get(&get_file).await?
        }
    };

    let output_path = client_config.output_dir.join(format!("get_{}", get_file));
    tokio::fs::write(&output_path, &data).await?;
    info!("다운로드 저장: {} ({} 바이트)", output_path.display(), data.len());

    client.disconnect().await?;
    Ok(())
}
