//! 트랜스포트 래퍼 (Mailman)
//!
//! 바인딩된 UDP 소켓 하나를 감싸서
//! - 송신: 인코딩 + 8바이트 Adler-32 프리픽스, corrupted 모드면
//!   확률적 바이트 오염 / 드랍 / 랜덤 지연으로 불량 링크를 흉내냄
//! - 수신: 체크섬 검증에 실패하거나 디코딩이 안 되는 데이터그램은
//!   조용히 버리고 계속 읽음. 체크섬이 수용의 유일한 기준

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::Result;
use crate::packet::Packet;
use crate::{CHECKSUM_LEN, MAX_PACKET_SIZE};

/// 인코딩된 패킷에 체크섬 프리픽스를 붙임
pub fn stamp(encoded: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(CHECKSUM_LEN + encoded.len());
    buf.put_u64(simd_adler32::adler32(&encoded) as u64);
    buf.put_slice(encoded);
    buf.freeze()
}

/// 프리픽스를 떼어 검증하고, 통과하면 패킷으로 복원
///
/// 체크섬 불일치 / 잘림 / 크기 불변식 위반 / 미정의 코드는 전부 `None`
pub fn open_stamped(datagram: &[u8]) -> Option<Packet> {
    if datagram.len() < CHECKSUM_LEN {
        return None;
    }
    let declared = u64::from_be_bytes(datagram[..CHECKSUM_LEN].try_into().ok()?);
    let body = &datagram[CHECKSUM_LEN..];
    if declared != simd_adler32::adler32(&body) as u64 {
        return None;
    }
    Packet::decode(body)
}

pub struct Mailman {
    socket: UdpSocket,
    corrupted: bool,
    loss_percent: u8,
    max_delay_ms: u64,
}

impl Mailman {
    /// 소켓을 바인딩하고 래퍼 생성
    pub async fn bind(addr: SocketAddr, config: &Config) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            corrupted: config.corrupted,
            loss_percent: config.loss_percent,
            max_delay_ms: config.max_link_delay_ms,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 패킷 송신
    ///
    /// 목적지는 헤더의 `dstIP:dstPort`. 주소를 파싱할 수 없으면 이
    /// 트랜스포트는 보낼 곳이 없으므로 치명적 에러로 전파
    pub async fn send(&self, packet: &Packet) -> Result<()> {
        let dest: SocketAddr =
            format!("{}:{}", packet.header.dst_ip, packet.header.dst_port).parse()?;

        let mut bytes = stamp(&packet.encode()).to_vec();

        if self.corrupted {
            // ThreadRng는 Send가 아니므로 await 전에 블록으로 수명을 끝냄
            let delay = {
                let mut rng = rand::thread_rng();
                if rng.gen_range(0..100) < self.loss_percent {
                    let index = rng.gen_range(0..bytes.len());
                    bytes[index] ^= 0xff;
                    debug!("링크 시뮬레이션: {:?} {} 바이트 오염", packet.kind(), index);
                }
                if rng.gen_range(0..100) < self.loss_percent {
                    debug!("링크 시뮬레이션: {:?} {} 드랍", packet.kind(), packet.seq_num());
                    return Ok(());
                }
                if self.max_delay_ms > 0 {
                    Some(rng.gen_range(0..self.max_delay_ms))
                } else {
                    None
                }
            };
            if let Some(delay) = delay {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        self.socket.send_to(&bytes, dest).await?;
        trace!("송신 {:?} seq={} -> {}", packet.kind(), packet.seq_num(), dest);
        Ok(())
    }

    /// 유효한 패킷 하나를 받을 때까지 블로킹 수신
    ///
    /// 손상 데이터그램은 폐기하고 루프 지속. 단일 패킷 유실로는
    /// 호출측에 에러를 올리지 않음 (재전송이 유일한 복구 경로)
    pub async fn receive(&self) -> Result<Packet> {
        let mut buf = [0u8; CHECKSUM_LEN + MAX_PACKET_SIZE + 64];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            match open_stamped(&buf[..len]) {
                Some(packet) => {
                    trace!("수신 {:?} seq={} <- {}", packet.kind(), packet.seq_num(), from);
                    return Ok(packet);
                }
                None => {
                    debug!("손상 데이터그램 폐기 ({} 바이트, {})", len, from);
                }
            }
        }
    }
}
