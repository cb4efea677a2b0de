//! 에러 타입 정의

use thiserror::Error;

/// RTP 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("유효하지 않은 목적지 주소: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),

    #[error("서버 응답 없음: {addr}")]
    NoServer { addr: String },

    #[error("아직 서버에 연결되지 않음")]
    NotConnected,

    #[error("파일을 받을 수 없음: {filename}")]
    FileUnavailable { filename: String },

    #[error("전송 진전 없음: {what}")]
    Stalled { what: String },
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
