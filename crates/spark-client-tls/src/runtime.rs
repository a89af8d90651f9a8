use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use rustls::pki_types::ServerName;
use socket2::SockRef;
use spark_client_transport::{
    BaseTransport, ClientSink, ConnState, FrameSink, ItemPool, QueueHandle, SharedQueues,
    TransportConfig, TransportEvent, WriteItem,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, tcp::OwnedWriteHalf},
    sync::{Notify, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::{SOCKET_WRITE, TlsTransportError},
    hot_reload::HotReloadingClientConfig,
    rustls_session::RustlsSession,
    timer::SweepTimer,
    transport::TlsTransport,
};

/// 一条 TLS 客户端连接的后台任务。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 状态机要求“一条连接 = 一条顺序事件流”；以单个 Tokio 任务承载连接，读完成、写完成、
///   唤醒与超时扫描都在同一个 `select!` 循环里依次处理，天然满足该前提；
/// - 应用线程只通过 [`TransportHandle`] 提交写入项，不接触会话与套接字。
///
/// ## 逻辑（How）
/// - 建连（带超时）→ 状态置为 `Handshaking` → `on_connected` 发出 ClientHello；
/// - 套接字写由独立的写任务完成，结果经 mpsc 回到连接任务，再调用 `on_write_done`；
/// - 握手结束时状态置为 `Done` 并广播 `Connected`，随后立即运行写调度；
/// - 状态机请求重连时执行 `reset`，按 [`spark_client_transport::ReconnectPolicy`] 退避；
///   次数耗尽广播 `ConnectFailed`；
/// - [`TlsClient::close`] 或句柄被丢弃时拆除会话、以 `Error` 结算剩余写入项并广播 `Disconnect`。
///
/// ## 契约（What）
/// - `spawn` 必须在 Tokio 运行时上下文中调用；
/// - 会话在 `spawn` 内同步创建，配置非法时直接返回错误而不启动任务。
pub struct TlsClient {
    handle: TransportHandle,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TlsClient {
    pub fn spawn(
        addr: impl Into<String>,
        tls: HotReloadingClientConfig,
        server_name: ServerName<'static>,
        config: TransportConfig,
        client: Arc<dyn ClientSink>,
        frames: Box<dyn FrameSink + Send>,
    ) -> Result<Self, TlsTransportError> {
        let session = RustlsSession::new(
            tls,
            server_name,
            config.outbound_limit,
            config.read_buf_size,
        )?;
        let queues = SharedQueues::new().into_handle();
        let wake = Arc::new(Notify::new());
        let handle = TransportHandle {
            queues: Arc::clone(&queues),
            wake: Arc::clone(&wake),
            pool: ItemPool::new(config.pool_slots),
        };
        let core = TlsTransport::new(session, SweepTimer::new(config.timeout_check_interval()));
        let base = TokioBase {
            queues,
            client,
            frames,
            writer: None,
            reconnect_requested: false,
            wake_requested: false,
        };
        let (shutdown, shutdown_rx) = oneshot::channel();
        let connection = Connection {
            addr: addr.into(),
            config,
            core,
            base,
            wake,
        };
        let task = tokio::spawn(connection.run(shutdown_rx));
        Ok(Self {
            handle,
            shutdown: Some(shutdown),
            task,
        })
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    /// 关闭连接并等待后台任务结束。
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(error) = self.task.await {
            warn!(error = %error, "tls client task ended abnormally");
        }
    }
}

/// 应用线程提交写入项的句柄，可自由克隆并跨线程使用。
#[derive(Clone)]
pub struct TransportHandle {
    queues: QueueHandle,
    wake: Arc<Notify>,
    pool: ItemPool,
}

impl TransportHandle {
    pub fn notify(&self, seq_num: u32, payload: Bytes, timeout: Option<Duration>) {
        self.submit(WriteItem::notify(seq_num, payload, timeout).with_storage(self.pool.storage()));
    }

    pub fn request(&self, req_id: u32, payload: Bytes, timeout: Option<Duration>) {
        self.submit(WriteItem::request(req_id, payload, timeout).with_storage(self.pool.storage()));
    }

    /// 提交心跳等内部报文；重连时这类报文被静默丢弃。
    pub fn send_internal(&self, payload: Bytes) {
        self.submit(WriteItem::internal(payload));
    }

    pub fn submit(&self, item: WriteItem) {
        self.queues.lock().enqueue(item);
        self.wake.notify_one();
    }

    pub fn state(&self) -> ConnState {
        self.queues.lock().state()
    }

    pub fn queues(&self) -> &QueueHandle {
        &self.queues
    }

    pub fn pool(&self) -> &ItemPool {
        &self.pool
    }
}

struct WriterLink {
    requests: mpsc::UnboundedSender<Bytes>,
    completions: mpsc::UnboundedSender<io::Result<()>>,
    task: JoinHandle<()>,
}

/// Tokio 上的基础传输：单写者套接字写入与共享队列。
struct TokioBase {
    queues: QueueHandle,
    client: Arc<dyn ClientSink>,
    frames: Box<dyn FrameSink + Send>,
    writer: Option<WriterLink>,
    reconnect_requested: bool,
    wake_requested: bool,
}

impl TokioBase {
    fn attach(&mut self, half: OwnedWriteHalf) -> mpsc::UnboundedReceiver<io::Result<()>> {
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let (completions, completions_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_loop(half, requests_rx, completions.clone()));
        self.writer = Some(WriterLink {
            requests,
            completions,
            task,
        });
        completions_rx
    }

    fn detach(&mut self) {
        if let Some(link) = self.writer.take() {
            link.task.abort();
        }
    }

    fn request_reconnect(&mut self, detail: &str) {
        if self.reconnect_requested {
            return;
        }
        self.client
            .on_event(TransportEvent::UnexpectedDisconnect, detail);
        self.reconnect_requested = true;
    }
}

impl BaseTransport for TokioBase {
    fn queues(&self) -> &QueueHandle {
        &self.queues
    }

    fn client(&self) -> &dyn ClientSink {
        self.client.as_ref()
    }

    fn submit_raw_write(&mut self, bytes: Bytes) {
        let Some(link) = &self.writer else {
            warn!(code = SOCKET_WRITE.code, "write submitted without a socket");
            return;
        };
        if link.requests.send(bytes).is_err() {
            // 写任务已退出，以失败完成本次写入。
            let _ = link
                .completions
                .send(Err(io::ErrorKind::BrokenPipe.into()));
        }
    }

    fn wake_writer(&mut self) {
        self.wake_requested = true;
    }

    fn reconnect(&mut self) {
        self.reconnect_requested = true;
    }

    fn reset(&mut self) {
        self.detach();
        self.recycle_queues();
        self.frames.reset();
    }

    fn on_read_error(&mut self, error: io::Error) {
        if error.kind() == io::ErrorKind::UnexpectedEof {
            info!("connection closed by peer");
            self.request_reconnect("Connection closed by peer");
        } else {
            warn!(error = %error, "socket read failed");
            self.request_reconnect("Socket read error");
        }
    }

    fn feed_frames(&mut self, plaintext: &[u8]) {
        self.frames.feed(plaintext);
    }
}

enum Exit {
    Shutdown,
    Reconnect,
}

struct Connection {
    addr: String,
    config: TransportConfig,
    core: TlsTransport<RustlsSession>,
    base: TokioBase,
    wake: Arc<Notify>,
}

impl Connection {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let policy = self.config.reconnect.clone();
        let mut attempt: u32 = 0;
        loop {
            let connected = tokio::select! {
                connected = self.connect() => connected,
                _ = &mut shutdown => break,
            };
            let exit = match connected {
                Ok(stream) => {
                    let (exit, established) = self.serve(stream, &mut shutdown).await;
                    if established {
                        attempt = 0;
                    }
                    exit
                }
                Err(error) => {
                    warn!(code = error.code(), error = %error, "connect attempt failed");
                    self.base
                        .client
                        .on_event(TransportEvent::ConnectError, &error.to_string());
                    Exit::Reconnect
                }
            };
            if matches!(exit, Exit::Shutdown) {
                break;
            }

            self.base.reconnect_requested = false;
            if self.core.reset(&mut self.base).is_err() {
                self.base
                    .client
                    .on_event(TransportEvent::ConnectFailed, "TLS session reset failed");
                break;
            }
            attempt = attempt.saturating_add(1);
            if !policy.allows(attempt) {
                warn!(attempt, "reconnect attempts exhausted");
                self.base
                    .client
                    .on_event(TransportEvent::ConnectFailed, "Reconnect attempts exhausted");
                break;
            }
            let delay = policy.delay_for(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            if !self.backoff(delay, &mut shutdown).await {
                break;
            }
        }

        self.core.teardown(&mut self.base);
        self.base.detach();
        self.base.fail_all();
        self.base
            .client
            .on_event(TransportEvent::Disconnect, "Connection closed");
    }

    /// 退避等待期间继续扫描超时；收到关闭信号时返回 `false`。
    async fn backoff(&mut self, delay: Duration, shutdown: &mut oneshot::Receiver<()>) -> bool {
        let resume = tokio::time::Instant::now() + delay;
        loop {
            let deadline = self.core.timer_deadline();
            tokio::select! {
                _ = tokio::time::sleep_until(resume) => return true,
                _ = &mut *shutdown => return false,
                _ = sweep_at(deadline) => self.core.on_timeout_tick(&mut self.base, Instant::now()),
            }
        }
    }

    async fn connect(&mut self) -> Result<TcpStream, TlsTransportError> {
        self.base.queues.lock().set_state(ConnState::Connecting);
        let connect_error = |source: io::Error| TlsTransportError::Connect {
            addr: self.addr.clone(),
            source,
        };
        let stream = tokio::time::timeout(
            self.config.connect_timeout(),
            TcpStream::connect(self.addr.as_str()),
        )
        .await
        .map_err(|_| connect_error(io::ErrorKind::TimedOut.into()))?
        .map_err(connect_error)?;
        stream.set_nodelay(true).map_err(connect_error)?;
        SockRef::from(&stream)
            .set_keepalive(true)
            .map_err(connect_error)?;
        Ok(stream)
    }

    /// 在一条已建立的 TCP 连接上运行事件循环，返回退出原因以及握手是否完成过。
    async fn serve(
        &mut self,
        stream: TcpStream,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> (Exit, bool) {
        let (mut reader, writer) = stream.into_split();
        let mut completions = self.base.attach(writer);
        self.base.queues.lock().set_state(ConnState::Handshaking);
        self.core.on_connected(&mut self.base);

        let mut established = false;
        let mut buf = vec![0u8; self.config.read_buf_size.max(1)];
        let exit = loop {
            if self.base.reconnect_requested {
                break Exit::Reconnect;
            }
            if !established && !self.core.is_handshaking() && !self.core.is_stale() {
                established = true;
                self.base.queues.lock().set_state(ConnState::Done);
                info!(addr = %self.addr, "secure channel established");
                self.base
                    .client
                    .on_event(TransportEvent::Connected, "Connected");
                self.core.drain_and_encrypt(&mut self.base);
                continue;
            }
            if std::mem::take(&mut self.base.wake_requested) {
                self.wake.notify_one();
            }

            let deadline = self.core.timer_deadline();
            tokio::select! {
                _ = &mut *shutdown => break Exit::Shutdown,
                read = reader.read(&mut buf) => {
                    let input = match read {
                        Ok(0) => Err(io::ErrorKind::UnexpectedEof.into()),
                        Ok(len) => Ok(&buf[..len]),
                        Err(error) => Err(error),
                    };
                    self.core.on_ciphertext(&mut self.base, input);
                }
                Some(result) = completions.recv() => {
                    let failed = result.is_err();
                    self.core.on_write_done(&mut self.base, result);
                    if failed {
                        self.base.request_reconnect("Socket write error");
                    }
                }
                _ = self.wake.notified() => self.core.drain_and_encrypt(&mut self.base),
                _ = sweep_at(deadline) => self.core.on_timeout_tick(&mut self.base, Instant::now()),
            }
        };

        self.base.detach();
        (exit, established)
    }
}

async fn sweep_at(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

async fn write_loop(
    mut half: OwnedWriteHalf,
    mut requests: mpsc::UnboundedReceiver<Bytes>,
    completions: mpsc::UnboundedSender<io::Result<()>>,
) {
    while let Some(bytes) = requests.recv().await {
        let result = half.write_all(&bytes).await;
        let failed = result.is_err();
        if completions.send(result).is_err() || failed {
            break;
        }
    }
}
