//! # RTP (Reliable Transfer Protocol)
//!
//! UDP 위에서 동작하는 윈도우 기반 신뢰성 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **연결 지향**: SYN / SYNACK / SYNFIN 3단계 핸드쉐이크
//! - **슬라이딩 윈도우**: 수신측이 광고한 윈도우만큼만 미확인 바이트 유지
//! - **패킷 단위 ACK**: 수신한 DATA마다 즉시 ACK, 중복 ACK는 멱등
//! - **적응형 재전송**: EWMA 기반 smoothed RTT로 재전송 간격 조절
//! - **손실 시뮬레이션**: Mailman이 드랍/바이트 오염/지연을 흉내내어 테스트
//! - **멀티플렉싱**: 서버는 소켓 하나로 다수 클라이언트를 연결 키로 구분

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod mailman;
pub mod packet;
pub mod server;
pub mod service;
pub mod stats;

pub use buffer::PacketBuffer;
pub use client::{ClientState, RtpClient};
pub use config::Config;
pub use error::{Error, Result};
pub use factory::PacketFactory;
pub use mailman::Mailman;
pub use packet::{Header, Packet, PacketKind};
pub use server::RtpServer;
pub use service::RtpService;
pub use stats::TransferStats;

/// 패킷 최대 크기 (헤더 포함, 바이트)
pub const MAX_PACKET_SIZE: usize = 1000;

/// DATA 청크당 페이로드 크기 (바이트)
pub const CHUNK_SIZE: usize = MAX_PACKET_SIZE - 100;

/// 고정 헤더 길이 (IP 문자열 제외)
pub const BASE_HEADER_LEN: usize = 28;

/// 체크섬 프리픽스 길이 (Adler-32, 8바이트 BE)
pub const CHECKSUM_LEN: usize = 8;

/// smoothed RTT 초기값 (밀리초)
pub const INITIAL_RTT_MS: u64 = 200;

/// 권장 최소 윈도우 크기 (바이트)
pub const MIN_WINDOW_SIZE: u32 = 1000;
