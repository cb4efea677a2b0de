//! RTP 클라이언트 세션
//!
//! 소켓 하나 + 수신 태스크 + 팩토리 하나로 서버와의 연결을 관리.
//! 핸드쉐이크(SYN/SYNACK/SYNFIN), 다운로드(GET), 동시 업로드(GET+POST),
//! 종료(FIN/FINACK/END)를 제공

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::buffer::PacketBuffer;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::factory::PacketFactory;
use crate::mailman::Mailman;
use crate::packet::PacketKind;
use crate::service::RtpService;

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Transferring,
}

pub struct RtpClient {
    config: Config,
    server_addr: SocketAddr,
    mailman: Arc<Mailman>,
    buffer: Arc<PacketBuffer>,
    factory: Arc<Mutex<PacketFactory>>,
    state: Mutex<ClientState>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl RtpClient {
    /// 로컬 임시 포트에 바인딩하고 서버와 핸드쉐이크까지 수행
    pub async fn start(local_ip: &str, server_addr: SocketAddr, config: Config) -> Result<Arc<Self>> {
        let bind_addr: SocketAddr = format!("{}:0", local_ip).parse()?;
        let mailman = Arc::new(Mailman::bind(bind_addr, &config).await?);
        let local = mailman.local_addr()?;

        let factory = Arc::new(Mutex::new(PacketFactory::new(
            local.port() as u32,
            local_ip,
            config.window_size,
        )));
        factory.lock().set_rtt(Duration::from_millis(config.initial_rtt_ms));

        let client = Arc::new(Self {
            config,
            server_addr,
            mailman: mailman.clone(),
            buffer: Arc::new(PacketBuffer::new()),
            factory,
            state: Mutex::new(ClientState::Disconnected),
            recv_task: Mutex::new(None),
        });

        // 수신 루프: 유효 패킷을 전부 타입별 버퍼로
        let recv_task = {
            let mailman = mailman.clone();
            let buffer = client.buffer.clone();
            tokio::spawn(async move {
                loop {
                    match mailman.receive().await {
                        Ok(packet) => buffer.put(packet),
                        Err(e) => {
                            debug!("수신 루프 종료: {}", e);
                            break;
                        }
                    }
                }
            })
        };
        *client.recv_task.lock() = Some(recv_task);

        if let Err(e) = client.connect().await {
            client.abort_recv();
            return Err(e);
        }
        Ok(client)
    }

    pub fn state(&self) -> ClientState {
        *self.state.lock()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.mailman.local_addr()
    }

    fn abort_recv(&self) {
        if let Some(task) = self.recv_task.lock().take() {
            task.abort();
        }
    }

    async fn stall(&self) {
        let rtt = self.factory.lock().rtt();
        tokio::time::sleep(rtt).await;
    }

    fn new_service(&self) -> Arc<RtpService> {
        Arc::new(RtpService::new(
            self.mailman.clone(),
            self.factory.clone(),
            self.config.clone(),
        ))
    }

    //------------------------------------------------------------------
    // 핸드쉐이크
    //------------------------------------------------------------------

    async fn connect(&self) -> Result<()> {
        *self.state.lock() = ClientState::Connecting;
        info!("서버 연결 시도: {}", self.server_addr);

        let syn = self.factory.lock().create_syn(
            self.server_addr.port() as u32,
            self.server_addr.ip().to_string(),
        );

        // SYN 재시도, SYNACK 도착까지
        let started = Instant::now();
        let synack = 'syn: {
            for _ in 0..self.config.retry_limit {
                self.mailman.send(&syn).await?;
                self.stall().await;
                if let Some(synack) = self.buffer.take(PacketKind::SynAck) {
                    break 'syn synack;
                }
                debug!("SYN 응답 없음... 재전송");
            }
            *self.state.lock() = ClientState::Disconnected;
            return Err(Error::NoServer {
                addr: self.server_addr.to_string(),
            });
        };

        // 왕복 측정값으로 RTT 시드 (여유분 20%), 상대 윈도우 채택
        let sample = started.elapsed();
        {
            let mut factory = self.factory.lock();
            factory.set_peer_window(synack.header.window_size);
            factory.set_rtt(sample.mul_f64(1.2));
        }
        debug!(
            "SYNACK 수신: peer window {}, RTT {}ms",
            synack.header.window_size,
            sample.as_millis()
        );

        // SYNFIN 송신 후 침묵 확인. SYNACK가 또 오면 SYNFIN 유실
        let synfin = self.factory.lock().create_synfin(sample.as_millis() as u64);
        let silence = Duration::from_millis(self.config.silence_window_ms);
        'synfin: for _ in 0..self.config.teardown_retry_limit {
            self.mailman.send(&synfin).await?;
            let sent = Instant::now();
            loop {
                self.stall().await;
                if self.buffer.take(PacketKind::SynAck).is_some() {
                    debug!("SYNFIN 응답 없음... 재전송");
                    continue 'synfin;
                }
                if sent.elapsed() >= silence {
                    break 'synfin;
                }
            }
        }

        self.factory.lock().set_connected(true);
        *self.state.lock() = ClientState::Connected;
        info!("서버 연결됨: {}", self.server_addr);
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state() {
            ClientState::Connected => Ok(()),
            _ => Err(Error::NotConnected),
        }
    }

    //------------------------------------------------------------------
    // 다운로드 / 업로드
    //------------------------------------------------------------------

    /// 파일 다운로드, 전체 바이트 열 반환
    pub async fn get(&self, filename: &str) -> Result<Bytes> {
        self.ensure_connected()?;
        *self.state.lock() = ClientState::Transferring;
        self.buffer.clear();

        let service = self.new_service();
        service.start_get();

        let result = async {
            self.send_get(filename).await?;
            self.drive_get(&service).await
        }
        .await;

        *self.state.lock() = ClientState::Connected;
        result?;

        let data = service.assemble_data();
        info!("GET 완료: {} ({} 바이트)", filename, data.len());
        Ok(data)
    }

    /// 파일 다운로드와 데이터 업로드를 같은 연결에서 동시 수행
    ///
    /// 업로드 ACK 소비 루프가 함께 돌며, 양방향 모두 끝나야 반환
    pub async fn get_post(&self, filename: &str, upload: Bytes) -> Result<Bytes> {
        self.ensure_connected()?;
        *self.state.lock() = ClientState::Transferring;
        self.buffer.clear();

        let get_service = self.new_service();
        get_service.start_get();
        let post_service = self.new_service();

        let get_flow = async {
            self.send_get(filename).await?;
            self.drive_get(&get_service).await
        };

        let post_flow = post_service.start_post(upload);

        let ack_pump = async {
            while !post_service.is_post_complete() {
                match self.buffer.take(PacketKind::Ack) {
                    Some(ack) => post_service.handle_ack(&ack),
                    None => tokio::time::sleep(Duration::from_millis(1)).await,
                }
            }
            Ok::<(), Error>(())
        };

        let result = tokio::try_join!(get_flow, post_flow, ack_pump);
        *self.state.lock() = ClientState::Connected;
        result?;

        let data = get_service.assemble_data();
        info!(
            "GET+POST 완료: {} ({} 바이트 수신, {} 바이트 송신 확인)",
            filename,
            data.len(),
            post_service.stats().total_bytes
        );
        Ok(data)
    }

    /// GET 송신, 첫 DATA가 보일 때까지 재시도
    async fn send_get(&self, filename: &str) -> Result<()> {
        let get = self.factory.lock().create_get(filename);
        for _ in 0..self.config.retry_limit {
            self.mailman.send(&get).await?;
            self.stall().await;
            if self.buffer.has(PacketKind::Data) {
                return Ok(());
            }
            debug!("GET 응답 없음... 재전송");
        }
        Err(Error::FileUnavailable {
            filename: filename.to_string(),
        })
    }

    /// DATA 스트림 소비, DATAFIN 또는 침묵 타임아웃까지
    async fn drive_get(&self, service: &Arc<RtpService>) -> Result<()> {
        loop {
            if let Some(datafin) = self.buffer.take(PacketKind::DataFin) {
                service.handle_datafin(&datafin).await?;
                self.confirm_datafin().await?;
                return Ok(());
            }
            if let Some(data) = self.buffer.take(PacketKind::Data) {
                service.handle_data(data).await?;
                continue;
            }
            if service.idle_timed_out() {
                warn!("DATA 침묵 타임아웃, 수신 종료로 간주");
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// DATAFIN 확인 국면: ACK는 handle_datafin이 이미 보냈고, 여기서는
    /// 침묵 구간 동안 DATAFIN 재전송이 또 오면 다시 ACK
    async fn confirm_datafin(&self) -> Result<()> {
        let silence = Duration::from_millis(self.config.silence_window_ms);
        let mut quiet_since = Instant::now();
        while quiet_since.elapsed() < silence {
            if let Some(datafin) = self.buffer.take(PacketKind::DataFin) {
                debug!("DATAFIN 재수신, ACK 재전송");
                let ack = self.factory.lock().create_ack(&datafin);
                self.mailman.send(&ack).await?;
                quiet_since = Instant::now();
            }
            self.stall().await;
        }
        Ok(())
    }

    //------------------------------------------------------------------
    // 종료
    //------------------------------------------------------------------

    /// 연결 종료: FIN -> FINACK -> END, 마지막은 침묵으로 확정
    pub async fn disconnect(&self) -> Result<()> {
        self.ensure_connected()?;
        info!("연결 종료 시작");

        let stall = Duration::from_millis(self.config.fin_stall_ms);
        let fin = self.factory.lock().create_fin();
        let mut got_finack = false;
        for _ in 0..self.config.teardown_retry_limit {
            self.mailman.send(&fin).await?;
            tokio::time::sleep(stall).await;
            if self.buffer.take(PacketKind::FinAck).is_some() {
                got_finack = true;
                break;
            }
            debug!("FIN 응답 없음... 재전송");
        }

        if got_finack {
            self.send_end().await?;
        } else {
            warn!("FINACK 없이 한도 소진, 일방 종료");
        }

        self.factory.lock().set_connected(false);
        *self.state.lock() = ClientState::Disconnected;
        self.abort_recv();
        info!("연결 종료됨");
        Ok(())
    }

    /// END 송신 후 침묵 확인. FINACK가 또 오면 END 유실로 보고 재전송
    async fn send_end(&self) -> Result<()> {
        let end = self.factory.lock().create_end();
        let stall = Duration::from_millis(self.config.fin_stall_ms);
        let silence = Duration::from_millis(self.config.silence_window_ms);

        'end: for _ in 0..self.config.teardown_retry_limit {
            self.mailman.send(&end).await?;
            let sent = Instant::now();
            loop {
                tokio::time::sleep(stall).await;
                if self.buffer.take(PacketKind::FinAck).is_some() {
                    debug!("FINACK 재수신, END 재전송");
                    continue 'end;
                }
                if sent.elapsed() >= silence {
                    break 'end;
                }
            }
        }
        Ok(())
    }
}

impl Drop for RtpClient {
    fn drop(&mut self) {
        self.abort_recv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_without_server_fails() {
        let mut config = Config::default();
        config.initial_rtt_ms = 10; // 테스트 단축용
        let result = RtpClient::start("127.0.0.1", "127.0.0.1:1".parse().unwrap(), config).await;
        assert!(matches!(result, Err(Error::NoServer { .. })));
    }
}
