//! 패킷 팩토리
//!
//! 연결 하나당 하나씩, 시퀀스/ACK 번호와 윈도우, smoothed RTT를 소유하며
//! 올바르게 번호가 매겨진 송신 패킷을 찍어냄
//!
//! - 데이터 운반 타입 (SYN, SYNFIN, GET, DATA, DATAFIN, FIN, END)은
//!   패킷 크기만큼 시퀀스 번호를 전진
//! - 순수 ACK 타입 (SYNACK, ACK, FINACK)은 시퀀스를 건드리지 않고
//!   상대 패킷의 seqNum을 ackNum으로 복사

use std::time::Duration;

use bytes::Bytes;
use rand::Rng;

use crate::packet::{Header, Packet, PacketKind};
use crate::INITIAL_RTT_MS;

/// RTT EWMA 가중치: rtt' = 0.8*rtt + 0.2*sample
const RTT_SMOOTHING: f64 = 0.8;

pub struct PacketFactory {
    src_ip: String,
    src_port: u32,
    dst_ip: String,
    dst_port: u32,

    /// 우리가 광고하는 수신 윈도우
    window: u32,

    /// 상대가 광고한 수신 윈도우
    peer_window: u32,

    seq_num: u32,
    ack_num: u32,
    connected: bool,
    rtt: Duration,
}

impl PacketFactory {
    /// 새 팩토리 생성
    ///
    /// 초기 시퀀스 번호는 0..10000 난수 (재시작간 충돌 회피용,
    /// 보안 장치 아님)
    pub fn new(src_port: u32, src_ip: impl Into<String>, window: u32) -> Self {
        Self {
            src_ip: src_ip.into(),
            src_port,
            dst_ip: String::new(),
            dst_port: 0,
            window,
            peer_window: window,
            seq_num: rand::thread_rng().gen_range(0..10_000),
            ack_num: 0,
            connected: false,
            rtt: Duration::from_millis(INITIAL_RTT_MS),
        }
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn peer_window(&self) -> u32 {
        self.peer_window
    }

    pub fn set_peer_window(&mut self, window: u32) {
        self.peer_window = window;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn rtt(&self) -> Duration {
        self.rtt
    }

    /// RTT 직접 설정 (SYNFIN 시드용), 0은 무시
    /// 0을 받아들이면 지연 없는 재전송 루프가 되므로 바닥을 1ms로 둠
    pub fn set_rtt(&mut self, rtt: Duration) {
        if rtt.is_zero() {
            return;
        }
        self.rtt = rtt.max(Duration::from_millis(1));
    }

    /// ACK 왕복 측정값으로 EWMA 갱신, 0은 무시
    pub fn record_rtt_sample(&mut self, sample: Duration) {
        if sample.is_zero() {
            return;
        }
        let smoothed = self.rtt.as_secs_f64() * RTT_SMOOTHING
            + sample.as_secs_f64() * (1.0 - RTT_SMOOTHING);
        self.rtt = Duration::from_secs_f64(smoothed).max(Duration::from_millis(1));
    }

    //------------------------------------------------------------------
    // 타입별 패킷 생성
    //------------------------------------------------------------------

    /// 연결 요청, 목적지를 기억
    pub fn create_syn(&mut self, dst_port: u32, dst_ip: impl Into<String>) -> Packet {
        self.dst_port = dst_port;
        self.dst_ip = dst_ip.into();
        self.create_packet(PacketKind::Syn, Bytes::new())
    }

    /// 연결 요청 확인, 목적지는 SYN의 출처
    pub fn create_synack(&mut self, syn: &Packet) -> Packet {
        self.dst_port = syn.header.src_port;
        self.dst_ip = syn.header.src_ip.clone();
        self.ack_num = syn.seq_num();
        self.create_ack_packet(PacketKind::SynAck)
    }

    /// 핸드쉐이크 마무리, 측정한 RTT(ms)를 8바이트 BE 페이로드로 운반
    pub fn create_synfin(&mut self, rtt_ms: u64) -> Packet {
        self.create_packet(PacketKind::SynFin, Bytes::copy_from_slice(&rtt_ms.to_be_bytes()))
    }

    /// 파일 요청, 페이로드는 UTF-8 파일명
    pub fn create_get(&mut self, filename: &str) -> Packet {
        self.create_packet(PacketKind::Get, Bytes::copy_from_slice(filename.as_bytes()))
    }

    /// 데이터를 청크 크기로 쪼개 DATA 패킷 열로 변환
    /// 각 청크가 고유 시퀀스 번호를 소비
    pub fn package_bytes(&mut self, data: &[u8], chunk_size: usize) -> Vec<Packet> {
        data.chunks(chunk_size)
            .map(|chunk| self.create_packet(PacketKind::Data, Bytes::copy_from_slice(chunk)))
            .collect()
    }

    /// DATA 스트림 종료 표시
    pub fn create_datafin(&mut self) -> Packet {
        self.create_packet(PacketKind::DataFin, Bytes::new())
    }

    /// 수신 패킷에 대한 확인 응답, ackNum은 그 패킷의 seqNum
    pub fn create_ack(&mut self, received: &Packet) -> Packet {
        self.ack_num = received.seq_num();
        self.create_ack_packet(PacketKind::Ack)
    }

    /// 연결 종료 요청
    pub fn create_fin(&mut self) -> Packet {
        self.create_packet(PacketKind::Fin, Bytes::new())
    }

    /// 종료 요청 확인
    pub fn create_finack(&mut self, fin: &Packet) -> Packet {
        self.ack_num = fin.seq_num();
        self.create_ack_packet(PacketKind::FinAck)
    }

    /// 종료 완결 통보
    pub fn create_end(&mut self) -> Packet {
        self.create_packet(PacketKind::End, Bytes::new())
    }

    //------------------------------------------------------------------
    // 내부 생성 루틴
    //------------------------------------------------------------------

    fn header(&self, kind: PacketKind) -> Header {
        Header {
            data_size: 0,
            window_size: self.window,
            kind,
            seq_num: self.seq_num,
            ack_num: self.ack_num,
            src_port: self.src_port,
            dst_port: self.dst_port,
            src_ip: self.src_ip.clone(),
            dst_ip: self.dst_ip.clone(),
        }
    }

    /// 시퀀스를 소비하는 패킷
    fn create_packet(&mut self, kind: PacketKind, data: Bytes) -> Packet {
        debug_assert!(!kind.is_pure_ack(), "순수 ACK 타입은 create_ack_packet으로");
        let packet = Packet::new(self.header(kind), data);
        self.seq_num = self.seq_num.wrapping_add(packet.size() as u32);
        packet
    }

    /// 시퀀스를 소비하지 않는 순수 ACK 패킷
    fn create_ack_packet(&mut self, kind: PacketKind) -> Packet {
        debug_assert!(kind.is_pure_ack(), "데이터 운반 타입은 create_packet으로");
        Packet::new(self.header(kind), Bytes::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> PacketFactory {
        let mut f = PacketFactory::new(40001, "127.0.0.1", 5000);
        f.dst_port = 9000;
        f.dst_ip = "127.0.0.1".into();
        f
    }

    #[test]
    fn test_initial_seq_in_range() {
        for _ in 0..50 {
            let f = PacketFactory::new(1, "10.0.0.1", 1000);
            assert!(f.seq_num < 10_000);
        }
    }

    #[test]
    fn test_data_packets_consume_seq() {
        let mut f = factory();
        let first = f.seq_num;
        let packets = f.package_bytes(&[0u8; 2000], 900);
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].seq_num(), first);
        assert_eq!(
            packets[1].seq_num(),
            first + packets[0].size() as u32,
            "시퀀스는 패킷 크기만큼 전진"
        );
        assert!(packets[0].seq_num() < packets[1].seq_num());
        assert!(packets[1].seq_num() < packets[2].seq_num());
    }

    #[test]
    fn test_pure_acks_do_not_consume_seq() {
        let mut f = factory();
        let data = f.create_packet(PacketKind::Data, Bytes::from_static(b"abc"));
        let before = f.seq_num;
        let ack = f.create_ack(&data);
        assert_eq!(f.seq_num, before);
        assert_eq!(ack.ack_num(), data.seq_num());
        assert!(ack.kind().is_pure_ack());
    }

    #[test]
    fn test_synack_targets_syn_source() {
        let mut client = PacketFactory::new(40001, "10.0.0.2", 4000);
        let syn = client.create_syn(9000, "10.0.0.1");

        let mut server = PacketFactory::new(9000, "10.0.0.1", 5000);
        let synack = server.create_synack(&syn);
        assert_eq!(synack.header.dst_ip, "10.0.0.2");
        assert_eq!(synack.header.dst_port, 40001);
        assert_eq!(synack.ack_num(), syn.seq_num());
    }

    #[test]
    fn test_synfin_carries_rtt_payload() {
        let mut f = factory();
        let synfin = f.create_synfin(345);
        assert_eq!(synfin.data.as_ref(), &345u64.to_be_bytes());
    }

    #[test]
    fn test_rtt_ewma() {
        let mut f = factory();
        assert_eq!(f.rtt(), Duration::from_millis(200));
        f.record_rtt_sample(Duration::from_millis(100));
        // 0.8*200 + 0.2*100 = 180
        assert_eq!(f.rtt().as_millis(), 180);
    }

    #[test]
    fn test_zero_rtt_ignored() {
        let mut f = factory();
        f.set_rtt(Duration::ZERO);
        assert_eq!(f.rtt(), Duration::from_millis(200));
        f.record_rtt_sample(Duration::ZERO);
        assert_eq!(f.rtt(), Duration::from_millis(200));
    }
}
