//! RTP 서버 - Reliable Transfer Protocol
//!
//! 윈도우 기반 신뢰성 파일 전송 프로토콜 서버
//! - 다중 클라이언트 동시 처리 (연결 키: srcIP:srcPort)
//! - GET 요청에 파일 응답, 업로드는 output 디렉토리에 저장
//!
//! 사용법:
//!   cargo run --release --bin rtp-server -- [OPTIONS]
//!
//! 예시:
//!   # 기본 구동
//!   cargo run --release --bin rtp-server -- --bind 0.0.0.0:9000 --dir ./files
//!
//!   # 불량 링크 시뮬레이션 (10% 유실/오염 + 지연)
//!   cargo run --release --bin rtp-server -- -b 0.0.0.0:9000 --corrupt

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use rtp::{Config, RtpServer, MIN_WINDOW_SIZE};

/// 서버 설정
struct ServerConfig {
    bind_addr: SocketAddr,
    base_dir: PathBuf,
    output_dir: PathBuf,
    window: u32,
    corrupt: bool,
    verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".parse().expect("고정 기본 주소"),
            base_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            window: Config::default().window_size,
            corrupt: false,
            verbose: false,
        }
    }
}

fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--dir" | "-d" => {
                if i + 1 < args.len() {
                    config.base_dir = PathBuf::from(&args[i + 1]);
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
                    r#"RTP Server - Reliable Transfer Protocol 서버

윈도우 기반 신뢰성 파일 전송 프로토콜 서버
- 슬라이딩 윈도우 + 패킷별 ACK + RTT 적응 재전송
- 다운로드(GET)와 업로드를 같은 연결에서 동시 처리

사용법:
  cargo run --release --bin rtp-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>     바인드 주소 (기본: 0.0.0.0:9000)
  -d, --dir <PATH>      제공할 파일 디렉토리 (기본: .)
  -o, --output <PATH>   업로드 저장 디렉토리 (기본: .)
  -w, --window <BYTES>  수신 윈도우 크기 (기본: 5000, 최소: 1000)
  -c, --corrupt         불량 링크 시뮬레이션 (10% 유실/오염 + 지연)
  -v, --verbose         디버그 로그 출력
  -h, --help            이 도움말 출력
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
    let server_config = parse_args();

    // 로깅 설정
    let level = if server_config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if server_config.window < MIN_WINDOW_SIZE {
        eprintln!(
            "윈도우 크기는 최소 {} 바이트여야 합니다 (지정값: {})",
            MIN_WINDOW_SIZE, server_config.window
        );
        std::process::exit(1);
    }

    let config = if server_config.corrupt {
        Config::lossy()
    } else {
        Config::default()
    };
    let config = Config {
        window_size: server_config.window,
        ..config
    };

    info!("RTP Server starting...");
    info!("Bind address: {}", server_config.bind_addr);
    info!("File directory: {}", server_config.base_dir.display());

    let server = RtpServer::bind(
        server_config.bind_addr,
        server_config.base_dir,
        server_config.output_dir,
        config,
    )
    .await?;

    server.run().await?;
    Ok(())
}
