//! 신뢰성 전달 엔진
//!
//! 논리 전송 하나(송신 = POST, 수신 = GET)마다 인스턴스 하나씩,
//! 팩토리 하나와 Mailman 하나에 묶임
//!
//! - POST: 슬라이딩 윈도우 송신. 미확인 바이트가 상대 윈도우를 넘지 않는
//!   범위에서 전송하고, smoothed RTT 간격으로 미확인 청크를 재전송.
//!   전부 확인되면 DATAFIN을 보내고 그 ACK를 기다림
//! - GET: 순서 불문 버퍼링 수신. DATA마다 즉시 ACK (중복 허용, 멱등).
//!   DATAFIN이 1차 완료 신호, 침묵 타임아웃은 폴백

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::factory::PacketFactory;
use crate::mailman::Mailman;
use crate::packet::Packet;
use crate::stats::TransferStats;

/// 송신 청크 하나의 상태
struct ChunkState {
    packet: Packet,
    sent: bool,
    sent_at: Option<Instant>,
    acked: bool,
}

#[derive(Default)]
struct PostState {
    /// 시퀀스 순서대로 유지되는 청크 목록
    chunks: Vec<ChunkState>,

    /// 전송됐지만 아직 확인 안 된 바이트 (패킷 크기 기준)
    in_flight: usize,

    datafin_seq: Option<u32>,
    datafin_acked: bool,
}

struct GetState {
    /// seqNum -> 페이로드, 키 순회가 곧 재조립 순서
    received: BTreeMap<u32, Bytes>,
    received_bytes: usize,
    last_activity: Instant,
}

impl Default for GetState {
    fn default() -> Self {
        Self {
            received: BTreeMap::new(),
            received_bytes: 0,
            last_activity: Instant::now(),
        }
    }
}

pub struct RtpService {
    mailman: Arc<Mailman>,
    factory: Arc<Mutex<PacketFactory>>,
    config: Config,
    stats: Mutex<TransferStats>,
    cancelled: AtomicBool,

    post: Mutex<PostState>,
    post_complete: AtomicBool,

    get: Mutex<GetState>,
    get_complete: AtomicBool,
}

impl RtpService {
    pub fn new(mailman: Arc<Mailman>, factory: Arc<Mutex<PacketFactory>>, config: Config) -> Self {
        Self {
            mailman,
            factory,
            config,
            stats: Mutex::new(TransferStats::new()),
            cancelled: AtomicBool::new(false),
            post: Mutex::new(PostState::default()),
            post_complete: AtomicBool::new(false),
            get: Mutex::new(GetState::default()),
            get_complete: AtomicBool::new(false),
        }
    }

    /// 전송 취소 (연결 해제시 호출), 진행중인 재전송 루프가 관찰하고 멈춤
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> TransferStats {
        self.stats.lock().clone()
    }

    /// smoothed RTT만큼 대기 (재전송 간격)
    async fn stall(&self) {
        let rtt = self.factory.lock().rtt();
        tokio::time::sleep(rtt).await;
    }

    //------------------------------------------------------------------
    // POST (송신) 경로
    //------------------------------------------------------------------

    /// 데이터 전체를 전송하고 전부 확인될 때까지 재전송
    ///
    /// ACK 진전 없이 `post_stall_limit` 패스가 연속으로 지나면 상대가
    /// 사라진 것으로 보고 `Error::Stalled`로 중단
    pub async fn start_post(&self, data: Bytes) -> Result<()> {
        let total = self.prepare_post(&data);
        info!("POST 시작: {} 바이트, {} 청크", data.len(), total);

        let mut last_remaining = usize::MAX;
        let mut stalled_passes = 0u32;
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                debug!("POST 취소됨");
                return Ok(());
            }

            let remaining = self.send_pass().await?;
            if remaining == 0 {
                break;
            }
            if remaining < last_remaining {
                last_remaining = remaining;
                stalled_passes = 0;
            } else {
                stalled_passes += 1;
                if stalled_passes >= self.config.post_stall_limit {
                    warn!("ACK 진전 없이 {} 패스 경과, POST 중단", stalled_passes);
                    self.cancel();
                    return Err(Error::Stalled {
                        what: format!("POST {} 청크 중 {} 미확인", total, remaining),
                    });
                }
            }
            self.stall().await;
        }

        self.send_datafin().await?;
        self.post_complete.store(true, Ordering::SeqCst);
        info!("POST 완료: {}", self.stats.lock().summary());
        Ok(())
    }

    /// 청크 분할과 송신 상태 초기화, 청크 수 반환
    fn prepare_post(&self, data: &[u8]) -> usize {
        self.post_complete.store(false, Ordering::SeqCst);
        let packets = self
            .factory
            .lock()
            .package_bytes(data, self.config.chunk_size);

        let mut post = self.post.lock();
        post.chunks = packets
            .into_iter()
            .map(|packet| ChunkState {
                packet,
                sent: false,
                sent_at: None,
                acked: false,
            })
            .collect();
        post.in_flight = 0;
        post.datafin_seq = None;
        post.datafin_acked = false;
        post.chunks.len()
    }

    /// 송신 패스 하나: 윈도우가 허용하는 미전송 청크를 내보내고,
    /// 전송됐지만 미확인인 청크는 재전송. 남은 미확인 청크 수 반환
    async fn send_pass(&self) -> Result<usize> {
        let peer_window = self.factory.lock().peer_window() as usize;

        let (batch, retransmits, remaining) = {
            let mut post = self.post.lock();
            let mut batch = Vec::new();
            let mut retransmits = 0u64;
            let mut in_flight = post.in_flight;

            for chunk in post.chunks.iter_mut() {
                if chunk.acked {
                    continue;
                }
                if chunk.sent {
                    batch.push(chunk.packet.clone());
                    retransmits += 1;
                } else if in_flight + chunk.packet.size() <= peer_window {
                    chunk.sent = true;
                    chunk.sent_at = Some(Instant::now());
                    in_flight += chunk.packet.size();
                    batch.push(chunk.packet.clone());
                } else {
                    // 수신 윈도우 가득참, ACK로 자리가 나면 다음 패스에
                    debug!("수신 윈도우 가득참 (in-flight {} 바이트)", in_flight);
                }
            }

            post.in_flight = in_flight;
            let remaining = post.chunks.iter().filter(|c| !c.acked).count();
            (batch, retransmits, remaining)
        };

        for packet in &batch {
            self.mailman.send(packet).await?;
        }

        if !batch.is_empty() {
            let mut stats = self.stats.lock();
            stats.sent_packets += batch.len() as u64;
            stats.retransmitted_packets += retransmits;
        }

        Ok(remaining)
    }

    /// ACK 처리: 해당 시퀀스를 확인 처리하고 in-flight 계정을 정확히
    /// 한 번만 줄임. 이미 확인된 시퀀스의 중복 ACK는 무시
    pub fn handle_ack(&self, ack: &Packet) {
        let seq = ack.ack_num();
        let mut guard = self.post.lock();
        let post = &mut *guard;

        if post.datafin_seq == Some(seq) {
            post.datafin_acked = true;
            return;
        }

        let fresh = post.chunks.iter_mut().find(|c| c.packet.seq_num() == seq && !c.acked);
        let Some(chunk) = fresh else {
            drop(guard);
            self.stats.lock().duplicate_acks += 1;
            debug!("중복 ACK 무시: {}", seq);
            return;
        };

        chunk.acked = true;
        let sample = chunk.sent_at.map(|t| t.elapsed());
        let bytes = chunk.packet.data.len() as u64;
        let size = chunk.packet.size();
        let was_sent = chunk.sent;
        if was_sent {
            post.in_flight -= size;
        }
        drop(guard);

        {
            let mut stats = self.stats.lock();
            stats.acked_packets += 1;
            stats.total_bytes += bytes;
        }
        if let Some(sample) = sample {
            self.factory.lock().record_rtt_sample(sample);
        }
    }

    /// DATAFIN 송신, ACK 올 때까지 RTT 간격으로 재전송
    /// 한도를 다 쓰면 낙관적으로 완료 처리
    async fn send_datafin(&self) -> Result<()> {
        let datafin = self.factory.lock().create_datafin();
        self.post.lock().datafin_seq = Some(datafin.seq_num());

        for _ in 0..self.config.datafin_retry_limit {
            if self.cancelled.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.mailman.send(&datafin).await?;
            self.stall().await;
            if self.post.lock().datafin_acked {
                debug!("DATAFIN 확인됨");
                return Ok(());
            }
            debug!("DATAFIN 응답 없음... 재전송");
        }

        warn!("DATAFIN 확인 없이 한도 소진, 완료로 간주");
        Ok(())
    }

    pub fn is_post_complete(&self) -> bool {
        self.post_complete.load(Ordering::SeqCst)
    }

    /// 현재 전송중(미확인) 바이트
    pub fn in_flight_bytes(&self) -> usize {
        self.post.lock().in_flight
    }

    //------------------------------------------------------------------
    // GET (수신) 경로
    //------------------------------------------------------------------

    /// 수신 상태 초기화
    pub fn start_get(&self) {
        self.get_complete.store(false, Ordering::SeqCst);
        *self.get.lock() = GetState::default();
    }

    /// DATA 처리: 처음 보는 시퀀스면 버퍼링, 어떤 경우든 즉시 ACK
    pub async fn handle_data(&self, data: Packet) -> Result<()> {
        let ack = {
            let mut get = self.get.lock();
            get.last_activity = Instant::now();

            let seq = data.seq_num();
            let len = data.data.len();
            let fresh = !get.received.contains_key(&seq);
            if fresh {
                get.received.insert(seq, data.data.clone());
                get.received_bytes += len;
            }
            drop(get);

            let mut stats = self.stats.lock();
            if fresh {
                stats.received_packets += 1;
                stats.total_bytes += len as u64;
            } else {
                stats.duplicate_packets += 1;
            }
            drop(stats);

            self.factory.lock().create_ack(&data)
        };

        self.mailman.send(&ack).await
    }

    /// DATAFIN 처리: 수신 완료 표시 후 ACK 응답
    /// 재전송된 DATAFIN에도 같은 방식으로 다시 응답하면 됨
    pub async fn handle_datafin(&self, datafin: &Packet) -> Result<()> {
        self.get_complete.store(true, Ordering::SeqCst);
        let ack = self.factory.lock().create_ack(datafin);
        self.mailman.send(&ack).await
    }

    pub fn is_get_complete(&self) -> bool {
        self.get_complete.load(Ordering::SeqCst)
    }

    /// 침묵 폴백: DATA가 일정 시간 끊기면 스트림 종료로 간주
    pub fn idle_timed_out(&self) -> bool {
        self.get.lock().last_activity.elapsed().as_millis() as u64 > self.config.get_idle_timeout_ms
    }

    pub fn received_bytes(&self) -> usize {
        self.get.lock().received_bytes
    }

    /// 버퍼링된 청크를 시퀀스 오름차순으로 이어붙여 최종 바이트 열 생성
    ///
    /// 시퀀스 갭은 검사하지 않음: DATAFIN은 송신측이 모든 청크의 ACK를
    /// 받은 뒤에만 발행되므로, DATAFIN 경로로 완료된 수신에는 갭이 없음
    pub fn assemble_data(&self) -> Bytes {
        let get = self.get.lock();
        let mut buf = BytesMut::with_capacity(get.received_bytes);
        for chunk in get.received.values() {
            buf.extend_from_slice(chunk);
        }
        buf.freeze()
    }
}
