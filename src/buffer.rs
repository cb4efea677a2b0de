//! 수신 패킷 디멀티플렉싱 버퍼
//!
//! 수신 루프가 넣고 프로토콜 로직이 꺼내는, 메시지 타입별 FIFO 큐 묶음.
//! 타입마다 독립 뮤텍스를 둬서 느린 소비자가 다른 타입을 막지 않음.
//! 같은 패킷의 중복 삽입은 큐 단위로 걸러냄 (재전송 흡수)

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::packet::{Packet, PacketKind};

pub struct PacketBuffer {
    queues: [Mutex<VecDeque<Packet>>; 10],
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self {
            queues: Default::default(),
        }
    }

    fn queue(&self, kind: PacketKind) -> &Mutex<VecDeque<Packet>> {
        &self.queues[kind.code() as usize]
    }

    /// 타입별 큐에 추가, 이미 같은 패킷이 있으면 버림
    pub fn put(&self, packet: Packet) {
        let mut queue = self.queue(packet.kind()).lock();
        if !queue.contains(&packet) {
            queue.push_back(packet);
        }
    }

    /// 해당 타입의 패킷 존재 여부
    pub fn has(&self, kind: PacketKind) -> bool {
        !self.queue(kind).lock().is_empty()
    }

    /// 가장 오래된 패킷을 꺼냄 (FIFO)
    pub fn take(&self, kind: PacketKind) -> Option<Packet> {
        self.queue(kind).lock().pop_front()
    }

    /// 연결 키가 일치하는 가장 오래된 패킷만 꺼냄
    /// 다른 연결의 패킷은 자리에 남아 그쪽 소비자를 기다림
    pub fn take_matching(&self, kind: PacketKind, key: &str) -> Option<Packet> {
        let mut queue = self.queue(kind).lock();
        let index = queue.iter().position(|p| p.connection_key() == key)?;
        queue.remove(index)
    }

    /// 모든 큐 비우기 (새 전송 시작 전 잔여물 제거)
    pub fn clear(&self) {
        for kind in PacketKind::ALL {
            self.queue(kind).lock().clear();
        }
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::packet::Header;

    fn packet(kind: PacketKind, seq: u32) -> Packet {
        Packet::new(
            Header {
                data_size: 0,
                window_size: 1000,
                kind,
                seq_num: seq,
                ack_num: 0,
                src_port: 1,
                dst_port: 2,
                src_ip: "127.0.0.1".into(),
                dst_ip: "127.0.0.1".into(),
            },
            Bytes::new(),
        )
    }

    #[test]
    fn test_duplicate_suppressed() {
        let buffer = PacketBuffer::new();
        buffer.put(packet(PacketKind::Data, 5));
        buffer.put(packet(PacketKind::Data, 5));

        assert!(buffer.take(PacketKind::Data).is_some());
        assert!(buffer.take(PacketKind::Data).is_none());
    }

    #[test]
    fn test_fifo_order() {
        let buffer = PacketBuffer::new();
        buffer.put(packet(PacketKind::Ack, 1));
        buffer.put(packet(PacketKind::Ack, 2));
        buffer.put(packet(PacketKind::Ack, 3));

        assert_eq!(buffer.take(PacketKind::Ack).unwrap().seq_num(), 1);
        assert_eq!(buffer.take(PacketKind::Ack).unwrap().seq_num(), 2);
        assert_eq!(buffer.take(PacketKind::Ack).unwrap().seq_num(), 3);
    }

    #[test]
    fn test_kinds_are_isolated() {
        let buffer = PacketBuffer::new();
        buffer.put(packet(PacketKind::Syn, 1));
        assert!(buffer.has(PacketKind::Syn));
        assert!(!buffer.has(PacketKind::Fin));
        assert!(buffer.take(PacketKind::Fin).is_none());
        assert!(buffer.take(PacketKind::Syn).is_some());
    }

    #[test]
    fn test_take_matching_leaves_other_keys() {
        let buffer = PacketBuffer::new();
        let mut own = packet(PacketKind::Fin, 1);
        own.header.src_port = 100;
        let mut other = packet(PacketKind::Fin, 2);
        other.header.src_port = 200;
        buffer.put(other.clone());
        buffer.put(own.clone());

        assert_eq!(buffer.take_matching(PacketKind::Fin, "127.0.0.1:100"), Some(own));
        assert_eq!(buffer.take_matching(PacketKind::Fin, "127.0.0.1:100"), None);
        // 다른 연결의 패킷은 그대로 남아야 함
        assert_eq!(buffer.take(PacketKind::Fin), Some(other));
    }

    #[test]
    fn test_concurrent_put_take() {
        let buffer = Arc::new(PacketBuffer::new());
        let producer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                for seq in 0..1000u32 {
                    buffer.put(packet(PacketKind::Data, seq));
                }
            })
        };

        let mut taken = 0;
        while taken < 1000 {
            if buffer.take(PacketKind::Data).is_some() {
                taken += 1;
            }
        }
        producer.join().unwrap();
        assert!(buffer.take(PacketKind::Data).is_none(), "유실도 중복도 없어야 함");
    }
}
