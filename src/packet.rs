//! 와이어 패킷 정의와 바이너리 코덱
//!
//! 헤더 레이아웃 (big-endian):
//! `[headerSize(1)][packetSize(2)][dataSize(2)][windowSize(4)][code(1)]`
//! `[seqNum(4)][ackNum(4)][srcPort(4)][dstPort(4)][srcIPLen(1)][dstIPLen(1)]`
//! `[srcIP(var)][dstIP(var)]` 뒤에 페이로드가 이어짐
//!
//! 불변식: `headerSize == 28 + srcIP.len() + dstIP.len()`,
//! `packetSize == headerSize + dataSize`

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::BASE_HEADER_LEN;

/// 메시지 타입 (판별값이 와이어 코드)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Syn = 0,
    SynAck = 1,
    SynFin = 2,
    Get = 3,
    Data = 4,
    DataFin = 5,
    Ack = 6,
    Fin = 7,
    FinAck = 8,
    End = 9,
}

impl PacketKind {
    /// 전체 타입 목록 (와이어 코드 순서)
    pub const ALL: [PacketKind; 10] = [
        PacketKind::Syn,
        PacketKind::SynAck,
        PacketKind::SynFin,
        PacketKind::Get,
        PacketKind::Data,
        PacketKind::DataFin,
        PacketKind::Ack,
        PacketKind::Fin,
        PacketKind::FinAck,
        PacketKind::End,
    ];

    /// 와이어 코드에서 타입 복원, 미정의 코드는 거부
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// 와이어 코드
    pub fn code(self) -> u8 {
        self as u8
    }

    /// 순수 ACK 타입 여부 (시퀀스 번호를 소비하지 않음)
    pub fn is_pure_ack(self) -> bool {
        matches!(self, PacketKind::SynAck | PacketKind::Ack | PacketKind::FinAck)
    }
}

/// 패킷 헤더
///
/// `header_size` / `packet_size`는 저장하지 않고 파생시켜 불변식이
/// 항상 유지되도록 함. 디코딩시 선언값과 대조하여 불일치는 거부.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// 페이로드 길이 (바이트)
    pub data_size: u16,

    /// 송신측이 광고하는 수신 윈도우 (바이트)
    pub window_size: u32,

    /// 메시지 타입
    pub kind: PacketKind,

    /// 시퀀스 번호
    pub seq_num: u32,

    /// 확인 응답 번호 (ACK 계열에서만 의미)
    pub ack_num: u32,

    /// 송신 UDP 포트
    pub src_port: u32,

    /// 목적지 UDP 포트
    pub dst_port: u32,

    /// 송신 IP (문자열)
    pub src_ip: String,

    /// 목적지 IP (문자열)
    pub dst_ip: String,
}

impl Header {
    /// 헤더 길이 = 28 + IP 문자열 길이
    pub fn header_len(&self) -> usize {
        BASE_HEADER_LEN + self.src_ip.len() + self.dst_ip.len()
    }

    /// 패킷 전체 길이 = 헤더 + 페이로드
    pub fn packet_len(&self) -> usize {
        self.header_len() + self.data_size as usize
    }
}

/// 패킷 = 헤더 + 페이로드
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub data: Bytes,
}

impl Packet {
    /// 새 패킷 생성, 헤더의 페이로드 길이를 일관되게 맞춤
    pub fn new(mut header: Header, data: Bytes) -> Self {
        header.data_size = data.len() as u16;
        Self { header, data }
    }

    /// 연결 키: `srcIP:srcPort`
    /// 서버가 클라이언트별 상태를 구분하는 식별자
    pub fn connection_key(&self) -> String {
        format!("{}:{}", self.header.src_ip, self.header.src_port)
    }

    pub fn kind(&self) -> PacketKind {
        self.header.kind
    }

    pub fn seq_num(&self) -> u32 {
        self.header.seq_num
    }

    pub fn ack_num(&self) -> u32 {
        self.header.ack_num
    }

    /// 패킷 전체 크기 (헤더 포함)
    pub fn size(&self) -> usize {
        self.header.packet_len()
    }

    /// 패킷을 바이트로 직렬화
    pub fn encode(&self) -> Bytes {
        let h = &self.header;
        let mut buf = BytesMut::with_capacity(h.packet_len());

        buf.put_u8(h.header_len() as u8);
        buf.put_u16(h.packet_len() as u16);
        buf.put_u16(h.data_size);
        buf.put_u32(h.window_size);
        buf.put_u8(h.kind.code());
        buf.put_u32(h.seq_num);
        buf.put_u32(h.ack_num);
        buf.put_u32(h.src_port);
        buf.put_u32(h.dst_port);
        buf.put_u8(h.src_ip.len() as u8);
        buf.put_u8(h.dst_ip.len() as u8);
        buf.put_slice(h.src_ip.as_bytes());
        buf.put_slice(h.dst_ip.as_bytes());
        buf.put_slice(&self.data);

        buf.freeze()
    }

    /// 바이트에서 패킷 복원
    ///
    /// 잘림 / 미정의 코드 / 크기 불변식 위반은 전부 `None`
    /// (호출측이 손상 패킷으로 폐기)
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < BASE_HEADER_LEN {
            return None;
        }

        let mut buf = bytes;
        let header_size = buf.get_u8() as usize;
        let packet_size = buf.get_u16() as usize;
        let data_size = buf.get_u16() as usize;
        let window_size = buf.get_u32();
        let kind = PacketKind::from_code(buf.get_u8())?;
        let seq_num = buf.get_u32();
        let ack_num = buf.get_u32();
        let src_port = buf.get_u32();
        let dst_port = buf.get_u32();
        let src_ip_len = buf.get_u8() as usize;
        let dst_ip_len = buf.get_u8() as usize;

        // 선언된 크기가 실제 수신량을 넘으면 손상
        if header_size != BASE_HEADER_LEN + src_ip_len + dst_ip_len
            || packet_size != header_size + data_size
            || bytes.len() < packet_size
            || buf.remaining() < src_ip_len + dst_ip_len + data_size
        {
            return None;
        }

        let src_ip = String::from_utf8(buf.copy_to_bytes(src_ip_len).to_vec()).ok()?;
        let dst_ip = String::from_utf8(buf.copy_to_bytes(dst_ip_len).to_vec()).ok()?;
        let data = buf.copy_to_bytes(data_size);

        Some(Self {
            header: Header {
                data_size: data_size as u16,
                window_size,
                kind,
                seq_num,
                ack_num,
                src_port,
                dst_port,
                src_ip,
                dst_ip,
            },
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet(kind: PacketKind, data: &[u8]) -> Packet {
        Packet::new(
            Header {
                data_size: 0,
                window_size: 5000,
                kind,
                seq_num: 1234,
                ack_num: 77,
                src_port: 40001,
                dst_port: 9000,
                src_ip: "127.0.0.1".into(),
                dst_ip: "192.168.0.17".into(),
            },
            Bytes::copy_from_slice(data),
        )
    }

    #[test]
    fn test_roundtrip() {
        let packet = sample_packet(PacketKind::Data, b"hello rtp");
        let restored = Packet::decode(&packet.encode()).unwrap();
        assert_eq!(packet, restored);
    }

    #[test]
    fn test_roundtrip_empty_payload() {
        let packet = sample_packet(PacketKind::Ack, b"");
        let restored = Packet::decode(&packet.encode()).unwrap();
        assert_eq!(packet, restored);
        assert_eq!(restored.size(), BASE_HEADER_LEN + 9 + 12);
    }

    #[test]
    fn test_size_invariants() {
        let packet = sample_packet(PacketKind::Data, &[0u8; 100]);
        assert_eq!(packet.header.header_len(), 28 + 9 + 12);
        assert_eq!(packet.header.packet_len(), packet.header.header_len() + 100);
        assert_eq!(packet.encode().len(), packet.size());
    }

    #[test]
    fn test_unknown_code_rejected() {
        let mut bytes = sample_packet(PacketKind::Data, b"x").encode().to_vec();
        bytes[9] = 42; // code 필드
        assert!(Packet::decode(&bytes).is_none());
    }

    #[test]
    fn test_truncated_rejected() {
        let bytes = sample_packet(PacketKind::Data, &[7u8; 300]).encode();
        for cut in [0, 10, 27, 40, bytes.len() - 1] {
            assert!(Packet::decode(&bytes[..cut]).is_none(), "cut={}", cut);
        }
    }

    #[test]
    fn test_declared_size_overflow_rejected() {
        let mut bytes = sample_packet(PacketKind::Data, b"abc").encode().to_vec();
        // dataSize를 실제보다 크게 조작
        bytes[3] = 0xff;
        bytes[4] = 0xff;
        assert!(Packet::decode(&bytes).is_none());
    }

    #[test]
    fn test_connection_key() {
        let packet = sample_packet(PacketKind::Syn, b"");
        assert_eq!(packet.connection_key(), "127.0.0.1:40001");
    }

    #[test]
    fn test_equality_is_structural() {
        let a = sample_packet(PacketKind::Data, b"same");
        let mut b = sample_packet(PacketKind::Data, b"same");
        assert_eq!(a, b);
        b.header.seq_num += 1;
        assert_ne!(a, b);
    }
}
