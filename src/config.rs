//! 프로토콜 설정

use crate::{CHUNK_SIZE, INITIAL_RTT_MS};

/// RTP 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 광고할 수신 윈도우 (바이트, 권장 최소 1000)
    pub window_size: u32,

    /// DATA 청크당 페이로드 크기 (바이트)
    pub chunk_size: usize,

    /// 손실 링크 시뮬레이션 활성화
    pub corrupted: bool,

    /// 드랍/오염 확률 (퍼센트)
    pub loss_percent: u8,

    /// 송신 전 랜덤 지연 상한 (밀리초)
    pub max_link_delay_ms: u64,

    /// smoothed RTT 초기값 (밀리초)
    pub initial_rtt_ms: u64,

    /// SYN / GET 재시도 한도
    pub retry_limit: u32,

    /// SYNFIN / END 확인 침묵 구간 (밀리초)
    /// 이 시간 동안 재요청이 없으면 완료로 간주
    pub silence_window_ms: u64,

    /// GET 수신 침묵 타임아웃 (밀리초, DATAFIN 유실시 폴백)
    pub get_idle_timeout_ms: u64,

    /// DATAFIN 재전송 한도
    pub datafin_retry_limit: u32,

    /// POST 무진전 패스 한도
    /// ACK 진전 없이 이만큼 연속 패스가 지나면 상대 소실로 보고 중단
    pub post_stall_limit: u32,

    /// FIN / FINACK 재전송 간격 (밀리초)
    pub fin_stall_ms: u64,

    /// FIN / FINACK / SYNACK 재전송 한도
    pub teardown_retry_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: 5000,
            chunk_size: CHUNK_SIZE,
            corrupted: false,
            loss_percent: 10,            // corrupted 모드에서만 적용
            max_link_delay_ms: 50,
            initial_rtt_ms: INITIAL_RTT_MS,
            retry_limit: 10,
            silence_window_ms: 2000,
            get_idle_timeout_ms: 5000,
            datafin_retry_limit: 20,
            post_stall_limit: 50,
            fin_stall_ms: 200,
            teardown_retry_limit: 25,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 손실 링크 테스트용 설정
    pub fn lossy() -> Self {
        Self {
            corrupted: true,
            get_idle_timeout_ms: 10000,
            datafin_retry_limit: 40,
            post_stall_limit: 100,
            teardown_retry_limit: 50,
            ..Self::default()
        }
    }
}
