//! 전송 통계

use std::time::{Duration, Instant};

/// 전송 방향 하나의 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 송신 패킷 수 (재전송 포함)
    pub sent_packets: u64,

    /// 재전송 패킷 수
    pub retransmitted_packets: u64,

    /// 확인된 패킷 수
    pub acked_packets: u64,

    /// 무시한 중복 ACK 수
    pub duplicate_acks: u64,

    /// 수신 패킷 수 (중복 제외)
    pub received_packets: u64,

    /// 무시한 중복 수신 수
    pub duplicate_packets: u64,

    /// 유효 전송 바이트
    pub total_bytes: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            sent_packets: 0,
            retransmitted_packets: 0,
            acked_packets: 0,
            duplicate_acks: 0,
            received_packets: 0,
            duplicate_packets: 0,
            total_bytes: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed
    }

    /// 재전송률 (0.0 ~ 1.0)
    pub fn retransmit_rate(&self) -> f64 {
        if self.sent_packets == 0 {
            return 0.0;
        }
        self.retransmitted_packets as f64 / self.sent_packets as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Bytes: {} | Throughput: {:.1} KB/s | Sent: {} (retx {}) | Acked: {} | Dup ACK: {} | Recv: {} (dup {})",
            self.elapsed().as_secs_f64(),
            self.total_bytes,
            self.throughput() / 1000.0,
            self.sent_packets,
            self.retransmitted_packets,
            self.acked_packets,
            self.duplicate_acks,
            self.received_packets,
            self.duplicate_packets,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retransmit_rate() {
        let mut stats = TransferStats::new();
        assert_eq!(stats.retransmit_rate(), 0.0);
        stats.sent_packets = 10;
        stats.retransmitted_packets = 2;
        assert!((stats.retransmit_rate() - 0.2).abs() < f64::EPSILON);
    }
}
