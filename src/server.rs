//! RTP 서버
//!
//! 소켓 하나로 다중 클라이언트를 처리. 연결 키는 `srcIP:srcPort`
//! 문자열이고, 키마다 팩토리 / 송신 서비스 / 수신 서비스를 DashMap에
//! 독립적으로 보관. 수신 루프가 패킷 타입별로 핸들러 태스크를 띄움
//!
//! - GET 요청: base_dir의 파일을 읽어 POST로 응답
//! - 업로드(DATA 스트림): output_dir에 연결 키 기반 이름으로 저장

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::buffer::PacketBuffer;
use crate::config::Config;
use crate::error::Result;
use crate::factory::PacketFactory;
use crate::mailman::Mailman;
use crate::packet::{Packet, PacketKind};
use crate::service::RtpService;

pub struct RtpServer {
    config: Config,
    local: SocketAddr,
    base_dir: PathBuf,
    output_dir: PathBuf,
    mailman: Arc<Mailman>,
    buffer: Arc<PacketBuffer>,

    /// 연결 키 -> 패킷 팩토리
    factories: DashMap<String, Arc<Mutex<PacketFactory>>>,

    /// 연결 키 -> 송신(파일 응답) 서비스
    posts: DashMap<String, Arc<RtpService>>,

    /// 연결 키 -> 수신(업로드) 서비스
    gets: DashMap<String, Arc<RtpService>>,
}

impl RtpServer {
    /// 소켓을 바인딩하고 서버 생성, `run()` 호출 전까지는 수신 안 함
    pub async fn bind(
        listen: SocketAddr,
        base_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        config: Config,
    ) -> Result<Arc<Self>> {
        let mailman = Arc::new(Mailman::bind(listen, &config).await?);
        let local = mailman.local_addr()?;
        Ok(Arc::new(Self {
            config,
            local,
            base_dir: base_dir.into(),
            output_dir: output_dir.into(),
            mailman,
            buffer: Arc::new(PacketBuffer::new()),
            factories: DashMap::new(),
            posts: DashMap::new(),
            gets: DashMap::new(),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// 현재 살아있는 연결 수
    pub fn active_connections(&self) -> usize {
        self.factories.len()
    }

    /// 수신-디스패치 루프, 소켓 에러 전까지 반환하지 않음
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(
            "RTP Server listening on {} (window {}, dir {})",
            self.local,
            self.config.window_size,
            self.base_dir.display()
        );

        loop {
            let packet = self.mailman.receive().await?;
            let kind = packet.kind();
            self.buffer.put(packet);

            match kind {
                PacketKind::Syn => {
                    let server = self.clone();
                    tokio::spawn(async move { server.accept_connection().await });
                }
                PacketKind::Get => {
                    let server = self.clone();
                    tokio::spawn(async move { server.handle_get().await });
                }
                PacketKind::Ack => self.handle_ack(),
                PacketKind::Data => {
                    let server = self.clone();
                    tokio::spawn(async move { server.handle_data().await });
                }
                PacketKind::DataFin => {
                    let server = self.clone();
                    tokio::spawn(async move { server.handle_datafin().await });
                }
                PacketKind::Fin => {
                    let server = self.clone();
                    tokio::spawn(async move { server.handle_fin().await });
                }
                // SYNFIN은 핸드쉐이크 태스크가, END는 종료 태스크가 소비
                PacketKind::SynFin | PacketKind::End => {}
                // 클라이언트 전용 응답 타입, 서버에 오면 무시
                PacketKind::SynAck | PacketKind::FinAck => {
                    debug!("서버에 온 {:?} 무시", kind);
                }
            }
        }
    }

    fn factory_for(&self, key: &str) -> Option<Arc<Mutex<PacketFactory>>> {
        self.factories.get(key).map(|f| f.clone())
    }

    //------------------------------------------------------------------
    // 핸드쉐이크
    //------------------------------------------------------------------

    /// SYN 처리: 팩토리를 만들고 SYNACK를 SYNFIN이 올 때까지 재전송
    async fn accept_connection(&self) {
        let Some(syn) = self.buffer.take(PacketKind::Syn) else {
            return;
        };
        let key = syn.connection_key();
        if self.factories.contains_key(&key) {
            debug!("재전송 SYN 무시: {}", key);
            return;
        }
        info!("연결 요청: {}", key);

        let factory = {
            let mut f = PacketFactory::new(
                self.local.port() as u32,
                self.local.ip().to_string(),
                self.config.window_size,
            );
            f.set_rtt(Duration::from_millis(self.config.initial_rtt_ms));
            f.set_peer_window(syn.header.window_size);
            Arc::new(Mutex::new(f))
        };
        self.factories.insert(key.clone(), factory.clone());

        let synack = factory.lock().create_synack(&syn);
        let stall = Duration::from_millis(self.config.fin_stall_ms);
        for _ in 0..self.config.teardown_retry_limit {
            if let Err(e) = self.mailman.send(&synack).await {
                warn!("SYNACK 송신 실패 ({}): {}", key, e);
                break;
            }
            tokio::time::sleep(stall).await;

            // 도착한 SYNFIN을 키에 맞는 연결로 라우팅
            while let Some(synfin) = self.buffer.take(PacketKind::SynFin) {
                self.apply_synfin(&synfin);
            }

            if factory.lock().is_connected() {
                info!("클라이언트 연결됨: {}", key);
                return;
            }
            debug!("SYNACK 응답 없음... 재전송 ({})", key);
        }

        warn!("핸드쉐이크 실패, 연결 제거: {}", key);
        self.factories.remove(&key);
    }

    /// SYNFIN 반영: 연결 확정 + 페이로드의 클라이언트 측 RTT 채택
    fn apply_synfin(&self, synfin: &Packet) {
        let key = synfin.connection_key();
        let Some(factory) = self.factory_for(&key) else {
            debug!("미지의 연결에서 온 SYNFIN 무시: {}", key);
            return;
        };
        let mut factory = factory.lock();
        factory.set_connected(true);
        if let Ok(bytes) = <[u8; 8]>::try_from(synfin.data.as_ref()) {
            factory.set_rtt(Duration::from_millis(u64::from_be_bytes(bytes)));
        }
    }

    //------------------------------------------------------------------
    // 다운로드 응답 (서버 -> 클라이언트)
    //------------------------------------------------------------------

    /// GET 처리: 요청 파일을 읽어 POST 전송 시작
    async fn handle_get(&self) {
        let Some(get) = self.buffer.take(PacketKind::Get) else {
            return;
        };
        let key = get.connection_key();
        let Some(factory) = self.factory_for(&key) else {
            warn!("미연결 상태의 GET 무시: {}", key);
            return;
        };

        // 같은 연결에서 이미 전송중이면 재전송 GET
        if let Some(existing) = self.posts.get(&key) {
            if !existing.is_post_complete() {
                debug!("전송 진행중, 재전송 GET 무시: {}", key);
                return;
            }
        }

        let filename = match std::str::from_utf8(&get.data) {
            Ok(name) => name.to_string(),
            Err(_) => {
                warn!("GET 파일명이 UTF-8이 아님: {}", key);
                return;
            }
        };
        if filename.contains(['/', '\\']) || filename.contains("..") {
            warn!("경로 포함 파일명 거부: {} ({})", filename, key);
            return;
        }

        let path = self.base_dir.join(&filename);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                warn!("요청 파일 읽기 실패: {} ({})", path.display(), e);
                return;
            }
        };
        info!("GET 요청: {} ({} 바이트, {})", filename, data.len(), key);

        let service = Arc::new(RtpService::new(
            self.mailman.clone(),
            factory,
            self.config.clone(),
        ));
        self.posts.insert(key.clone(), service.clone());

        if let Err(e) = service.start_post(data).await {
            // 상대 소실 포함, 실패한 전송의 연결 상태는 즉시 회수
            warn!("파일 전송 실패 ({}): {}", key, e);
            self.remove_connection(&key);
        }
    }

    /// ACK 라우팅: 해당 연결의 송신 서비스로
    fn handle_ack(&self) {
        let Some(ack) = self.buffer.take(PacketKind::Ack) else {
            return;
        };
        let key = ack.connection_key();
        match self.posts.get(&key) {
            Some(service) => service.handle_ack(&ack),
            None => debug!("전송 없는 연결의 ACK 무시: {}", key),
        }
    }

    //------------------------------------------------------------------
    // 업로드 수신 (클라이언트 -> 서버)
    //------------------------------------------------------------------

    /// DATA 처리: 연결별 수신 서비스를 만들거나 찾아서 버퍼링 + ACK
    async fn handle_data(&self) {
        let Some(data) = self.buffer.take(PacketKind::Data) else {
            return;
        };
        let key = data.connection_key();
        let Some(factory) = self.factory_for(&key) else {
            warn!("미연결 상태의 DATA 무시: {}", key);
            return;
        };

        let service = self
            .gets
            .entry(key.clone())
            .or_insert_with(|| {
                info!("업로드 수신 시작: {}", key);
                let service = Arc::new(RtpService::new(
                    self.mailman.clone(),
                    factory,
                    self.config.clone(),
                ));
                service.start_get();
                service
            })
            .clone();

        if let Err(e) = service.handle_data(data).await {
            warn!("ACK 송신 실패 ({}): {}", key, e);
        }
    }

    /// DATAFIN 처리: ACK 응답 후 재조립 결과를 output_dir에 저장
    async fn handle_datafin(&self) {
        let Some(datafin) = self.buffer.take(PacketKind::DataFin) else {
            return;
        };
        let key = datafin.connection_key();

        let Some(service) = self.gets.get(&key).map(|s| s.clone()) else {
            // 저장까지 끝난 뒤의 재전송 DATAFIN, ACK만 다시
            if let Some(factory) = self.factory_for(&key) {
                let ack = factory.lock().create_ack(&datafin);
                if let Err(e) = self.mailman.send(&ack).await {
                    debug!("지연 DATAFIN ACK 실패 ({}): {}", key, e);
                }
            }
            return;
        };

        if let Err(e) = service.handle_datafin(&datafin).await {
            warn!("DATAFIN ACK 실패 ({}): {}", key, e);
        }

        let data = service.assemble_data();
        self.gets.remove(&key);

        let filename = format!("post_{}.bin", key.replace([':', '.'], "_"));
        let path = self.output_dir.join(filename);
        match tokio::fs::write(&path, &data).await {
            Ok(()) => info!("업로드 저장: {} ({} 바이트)", path.display(), data.len()),
            Err(e) => warn!("업로드 저장 실패: {} ({})", path.display(), e),
        }
    }

    //------------------------------------------------------------------
    // 종료
    //------------------------------------------------------------------

    /// FIN 처리: 진행중 전송 취소, FINACK를 END가 올 때까지 재전송
    async fn handle_fin(&self) {
        let Some(fin) = self.buffer.take(PacketKind::Fin) else {
            return;
        };
        let key = fin.connection_key();
        let Some(factory) = self.factory_for(&key) else {
            debug!("미지의 연결에서 온 FIN 무시: {}", key);
            return;
        };
        info!("종료 요청: {}", key);

        if let Some(service) = self.posts.get(&key) {
            service.cancel();
        }
        if let Some(service) = self.gets.get(&key) {
            service.cancel();
        }

        let finack = factory.lock().create_finack(&fin);
        let stall = Duration::from_millis(self.config.fin_stall_ms);
        for _ in 0..self.config.teardown_retry_limit {
            if self.mailman.send(&finack).await.is_err() {
                break;
            }
            tokio::time::sleep(stall).await;

            // 이 연결의 END / 재전송 FIN만 소비, 다른 연결의 패킷은
            // 그쪽 핸들러 몫으로 큐에 남김
            if self.buffer.take_matching(PacketKind::End, &key).is_some() {
                self.remove_connection(&key);
                return;
            }
            if self.buffer.take_matching(PacketKind::Fin, &key).is_some() {
                debug!("재전송 FIN 소비: {}", key);
            }
            debug!("END 대기... FINACK 재전송 ({})", key);
        }

        warn!("END 없이 한도 소진, 연결 강제 정리: {}", key);
        self.remove_connection(&key);
    }

    fn remove_connection(&self, key: &str) {
        // 소비자가 사라지는 키의 잔여 종료 패킷도 함께 회수
        while self.buffer.take_matching(PacketKind::End, key).is_some() {}
        while self.buffer.take_matching(PacketKind::Fin, key).is_some() {}
        self.factories.remove(key);
        self.posts.remove(key);
        self.gets.remove(key);
        info!("연결 종료됨: {}", key);
    }
}
