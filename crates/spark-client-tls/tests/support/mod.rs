//! 集成测试共用的替身：脚本化会话、记录型基础传输与记录型客户端。
//!
//! - `ScriptedSession`：按脚本返回 `Written`/`WouldBlock`/致命错误，明文原样作为“密文”输出，
//!   便于断言套接字收到的字节与写入项负载之间的对应关系；
//! - `RecordingBase`：记录每一次底层写、重连、重置与唤醒，并统计在途写入数；
//! - `RecordingClient`：按调用顺序记录全部回调。
#![allow(dead_code)]

use std::{collections::VecDeque, io, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use spark_client_tls::{
    EncryptOutcome, ReadOutcome, SecureSession, SessionError, SweepTimer, TlsTransport,
};
use spark_client_transport::{
    BaseTransport, ClientSink, ConnState, QueueHandle, SharedQueues, Status, TransportEvent,
    WriteItem,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Accept,
    WouldBlock,
    Fatal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadFailure {
    Closed,
    Corrupt,
}

/// 脚本耗尽后按 `fallback` 处理后续加密。
pub struct ScriptedSession {
    script: VecDeque<Step>,
    fallback: Step,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    handshake: Option<Bytes>,
    pub read_failure: Option<ReadFailure>,
    pub handshaking: bool,
    pub offered: Vec<Bytes>,
    pub resets: usize,
}

impl ScriptedSession {
    pub fn accepting() -> Self {
        Self::scripted([], Step::Accept)
    }

    pub fn blocking() -> Self {
        Self::scripted([], Step::WouldBlock)
    }

    pub fn scripted(script: impl IntoIterator<Item = Step>, fallback: Step) -> Self {
        Self {
            script: script.into_iter().collect(),
            fallback,
            inbound: Vec::new(),
            outbound: Vec::new(),
            handshake: None,
            read_failure: None,
            handshaking: false,
            offered: Vec::new(),
            resets: 0,
        }
    }

    /// 下一次解密推进时输出的握手字节。
    pub fn with_handshake(mut self, hello: &'static [u8]) -> Self {
        self.handshake = Some(Bytes::from_static(hello));
        self.handshaking = true;
        self
    }

    pub fn push_script(&mut self, steps: impl IntoIterator<Item = Step>) {
        self.script.extend(steps);
    }

    pub fn set_fallback(&mut self, fallback: Step) {
        self.fallback = fallback;
    }

    pub fn encrypt_calls(&self) -> usize {
        self.offered.len()
    }
}

impl SecureSession for ScriptedSession {
    fn push_ciphertext_in(&mut self, ciphertext: &[u8]) {
        self.inbound.extend_from_slice(ciphertext);
    }

    fn read_plaintext(&mut self) -> Result<ReadOutcome, SessionError> {
        if let Some(failure) = self.read_failure {
            return Err(match failure {
                ReadFailure::Closed => SessionError::Closed,
                ReadFailure::Corrupt => SessionError::Protocol(rustls::Error::DecryptError),
            });
        }
        if let Some(hello) = self.handshake.take() {
            self.outbound.extend_from_slice(&hello);
        }
        if self.inbound.is_empty() {
            return Ok(ReadOutcome::Drained);
        }
        Ok(ReadOutcome::Data(Bytes::from(std::mem::take(&mut self.inbound))))
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<EncryptOutcome, SessionError> {
        self.offered.push(Bytes::copy_from_slice(plaintext));
        match self.script.pop_front().unwrap_or(self.fallback) {
            Step::Accept => {
                self.outbound.extend_from_slice(plaintext);
                Ok(EncryptOutcome::Written(plaintext.len()))
            }
            Step::WouldBlock => Ok(EncryptOutcome::WouldBlock),
            Step::Fatal => Err(SessionError::Protocol(rustls::Error::EncryptError)),
        }
    }

    fn pull_ciphertext_out(&mut self) -> Bytes {
        Bytes::from(std::mem::take(&mut self.outbound))
    }

    fn is_handshaking(&self) -> bool {
        self.handshaking
    }

    fn reset(&mut self) -> Result<(), SessionError> {
        self.resets += 1;
        self.inbound.clear();
        self.outbound.clear();
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Event(TransportEvent, String),
    Notify(u32, Status),
    Request(u32, Status),
}

#[derive(Default)]
pub struct RecordingClient {
    log: Mutex<Vec<Outcome>>,
}

impl RecordingClient {
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.log.lock().clone()
    }

    pub fn events(&self) -> Vec<TransportEvent> {
        self.log
            .lock()
            .iter()
            .filter_map(|outcome| match outcome {
                Outcome::Event(event, _) => Some(*event),
                _ => None,
            })
            .collect()
    }

    /// 通知与请求的结算记录，忽略连接事件。
    pub fn resolutions(&self) -> Vec<Outcome> {
        self.log
            .lock()
            .iter()
            .filter(|outcome| !matches!(outcome, Outcome::Event(..)))
            .cloned()
            .collect()
    }
}

impl ClientSink for RecordingClient {
    fn on_event(&self, event: TransportEvent, detail: &str) {
        self.log.lock().push(Outcome::Event(event, detail.to_string()));
    }

    fn on_notify_sent(&self, seq_num: u32, status: Status) {
        self.log.lock().push(Outcome::Notify(seq_num, status));
    }

    fn on_request_resolved(&self, req_id: u32, status: Status, _response: Option<Bytes>) {
        self.log.lock().push(Outcome::Request(req_id, status));
    }
}

pub struct RecordingBase {
    queues: QueueHandle,
    pub client: Arc<RecordingClient>,
    pub writes: Vec<Bytes>,
    pub outstanding: usize,
    pub max_outstanding: usize,
    pub reconnects: usize,
    pub resets: usize,
    pub wakes: usize,
    pub frames: Vec<Bytes>,
    pub read_errors: Vec<io::ErrorKind>,
    /// 重置时是否像真实基础传输一样回收底层队列。
    pub recycle_on_reset: bool,
}

impl RecordingBase {
    pub fn new(state: ConnState) -> Self {
        let mut queues = SharedQueues::new();
        queues.set_state(state);
        Self {
            queues: queues.into_handle(),
            client: Arc::new(RecordingClient::default()),
            writes: Vec::new(),
            outstanding: 0,
            max_outstanding: 0,
            reconnects: 0,
            resets: 0,
            wakes: 0,
            frames: Vec::new(),
            read_errors: Vec::new(),
            recycle_on_reset: false,
        }
    }

    pub fn ready() -> Self {
        Self::new(ConnState::Done)
    }

    pub fn submit(&self, item: WriteItem) {
        self.queues.lock().enqueue(item);
    }

    pub fn set_state(&self, state: ConnState) {
        self.queues.lock().set_state(state);
    }

    pub fn wait_kinds(&self) -> Vec<spark_client_transport::ItemKind> {
        self.queues.lock().wait_iter().map(WriteItem::kind).collect()
    }
}

impl BaseTransport for RecordingBase {
    fn queues(&self) -> &QueueHandle {
        &self.queues
    }

    fn client(&self) -> &dyn ClientSink {
        self.client.as_ref()
    }

    fn submit_raw_write(&mut self, bytes: Bytes) {
        self.outstanding += 1;
        self.max_outstanding = self.max_outstanding.max(self.outstanding);
        self.writes.push(bytes);
    }

    fn wake_writer(&mut self) {
        self.wakes += 1;
    }

    fn reconnect(&mut self) {
        self.reconnects += 1;
    }

    fn reset(&mut self) {
        self.resets += 1;
        if self.recycle_on_reset {
            self.outstanding = 0;
            self.recycle_queues();
        }
    }

    fn on_read_error(&mut self, error: io::Error) {
        self.read_errors.push(error.kind());
    }

    fn feed_frames(&mut self, plaintext: &[u8]) {
        self.frames.push(Bytes::copy_from_slice(plaintext));
    }
}

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(2);

pub fn transport(session: ScriptedSession) -> TlsTransport<ScriptedSession> {
    TlsTransport::new(session, SweepTimer::new(SWEEP_INTERVAL))
}

/// 模拟基础传输回调一次写完成。
pub fn complete(
    core: &mut TlsTransport<ScriptedSession>,
    base: &mut RecordingBase,
    result: io::Result<()>,
) {
    assert_eq!(base.outstanding, 1, "只有在途写入才能完成");
    base.outstanding -= 1;
    core.on_write_done(base, result);
}

pub fn session(core: &TlsTransport<ScriptedSession>) -> &ScriptedSession {
    core.session().expect("会话尚未拆除")
}

pub fn payload(tag: u8, len: usize) -> Bytes {
    Bytes::from(vec![tag; len])
}
