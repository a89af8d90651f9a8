use std::{collections::VecDeque, io, time::Instant};

use spark_client_transport::{
    BaseTransport, ConnState, Status, TransportEvent, WriteItem, take_expired,
};
use tracing::{debug, error, trace, warn};

use crate::{
    error::{DECRYPT, ENCRYPT, OperationKind, RESET, SOCKET_WRITE, SessionError},
    retry::RetryState,
    session::{EncryptOutcome, ReadOutcome, SecureSession},
    timer::SweepTimer,
};

/// 致命错误时随 `UnexpectedDisconnect` 上报的原因。
pub const TLS_ERROR_REASON: &str = "TLS Error";

/// 安全通道、两块密文暂存区与底层单写者套接字之间的协调状态机。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 解密后的明文只在可用时交给帧解析器；底层套接字写入绝不并发；
///   被会话以 would-block 拒绝的写入必须逐字节保留到重试成功；每个写入项恰好结算一次。
///   这些约束彼此交织，因此集中在一个单线程状态机里维护。
///
/// ## 逻辑（How）
/// - **写调度**（[`TlsTransport::drain_and_encrypt`]）：先重试 [`RetryState`]，再按 FIFO 从等待队列
///   取写入项加密；加密成功的写入项在有写入在途时进入次级队列，否则进入写入中队列；
/// - **套接字刷出**（[`TlsTransport::flush_to_socket`]）：无在途写入时取走出站密文，
///   把次级队列并入写入中队列后发起恰好一次底层写；
/// - **写完成**（[`TlsTransport::on_write_done`]）：在锁内摘下整批写入中队列，锁外结算回调；
/// - **读泵**（[`TlsTransport::on_ciphertext`]）：追加密文后依次运行写调度、明文泵与刷出；
/// - **超时扫描**（[`TlsTransport::on_timeout_tick`]）：结算过期的待重试项、次级队列与底层队列；
/// - **生命周期**：握手启动、重置回收与幂等拆除。
///
/// ## 契约（What）
/// - 任意时刻至多一次底层写在途、至多一个待重试写入项；
/// - 会话报告致命错误后状态机标记为失效：`UnexpectedDisconnect` 与 `reconnect` 各触发一次，
///   在 [`TlsTransport::reset`] 之前不再调用会话的加密或解密；
/// - 共享队列锁只在队列拼接期间持有，会话调用与客户端回调均在锁外执行；
/// - **前置条件**：所有方法由同一事件循环顺序调用。
pub struct TlsTransport<S> {
    session: Option<S>,
    stale: bool,
    retry: RetryState,
    secondary: VecDeque<WriteItem>,
    write_in_flight: bool,
    timer: SweepTimer,
}

impl<S: SecureSession> TlsTransport<S> {
    pub fn new(session: S, timer: SweepTimer) -> Self {
        Self {
            session: Some(session),
            stale: false,
            retry: RetryState::Idle,
            secondary: VecDeque::new(),
            write_in_flight: false,
            timer,
        }
    }

    pub fn session(&self) -> Option<&S> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut S> {
        self.session.as_mut()
    }

    pub fn is_handshaking(&self) -> bool {
        self.session.as_ref().is_some_and(S::is_handshaking)
    }

    pub fn write_in_flight(&self) -> bool {
        self.write_in_flight
    }

    pub fn retry_pending(&self) -> bool {
        self.retry.is_pending()
    }

    pub fn held_item(&self) -> Option<&WriteItem> {
        self.retry.item()
    }

    pub fn secondary_len(&self) -> usize {
        self.secondary.len()
    }

    /// 超时扫描的下一次到期时间；`None` 表示定时器空闲。
    pub fn timer_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn is_torn_down(&self) -> bool {
        self.session.is_none()
    }

    /// 写调度：重试被拒绝的字节，再按 FIFO 加密等待队列。
    pub fn drain_and_encrypt<B>(&mut self, base: &mut B)
    where
        B: BaseTransport + ?Sized,
    {
        if self.stale || self.session.is_none() {
            return;
        }
        {
            let mut queues = base.queues().lock();
            if queues.state() == ConnState::Done {
                let promoted = queues.promote_conn_pending();
                if promoted > 0 {
                    trace!(promoted, "connection-pending items promoted");
                }
            }
        }

        let mut produced = false;
        if let Some(bytes) = self.retry.bytes().cloned() {
            match self.encrypt(&bytes) {
                Ok(EncryptOutcome::Written(_)) => {
                    if let Some(item) = self.retry.take() {
                        self.place_encrypted(base, item);
                    }
                    produced = true;
                }
                Ok(EncryptOutcome::WouldBlock) => {
                    self.timer.arm_if_idle(Instant::now());
                    return;
                }
                Err(error) => {
                    self.fail_channel(base, ENCRYPT, error);
                    return;
                }
            }
        }

        while !self.retry.is_pending() {
            let Some(item) = base.queues().lock().pop_wait() else {
                break;
            };
            match self.encrypt(item.payload()) {
                Ok(EncryptOutcome::Written(_)) => {
                    self.place_encrypted(base, item);
                    produced = true;
                }
                Ok(EncryptOutcome::WouldBlock) => {
                    trace!(kind = ?item.kind(), len = item.len(), "encrypt would block");
                    self.retry = RetryState::hold(item);
                }
                Err(error) => {
                    // 写入项保留到重置时重新入队。
                    self.retry = RetryState::hold(item);
                    self.fail_channel(base, ENCRYPT, error);
                    return;
                }
            }
        }

        if produced {
            self.flush_to_socket(base);
        }
        self.timer.arm_if_idle(Instant::now());
    }

    /// 无在途写入时，把出站密文作为一次底层写发出。
    pub fn flush_to_socket<B>(&mut self, base: &mut B)
    where
        B: BaseTransport + ?Sized,
    {
        if self.write_in_flight || self.stale {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let bytes = session.pull_ciphertext_out();
        if !self.secondary.is_empty() {
            base.queues().lock().extend_writing(self.secondary.drain(..));
        }
        if bytes.is_empty() {
            // 空负载不产出密文，也就没有对应的底层写。
            self.settle_writing(base, Status::Ok);
            base.wake_writer();
            return;
        }
        self.write_in_flight = true;
        trace!(len = bytes.len(), "submitting ciphertext");
        base.submit_raw_write(bytes);
    }

    /// 底层写完成：结算整批写入中队列，然后继续刷出。
    pub fn on_write_done<B>(&mut self, base: &mut B, result: io::Result<()>)
    where
        B: BaseTransport + ?Sized,
    {
        self.write_in_flight = false;
        let status = Status::from_write(&result);
        if let Err(error) = &result {
            warn!(code = SOCKET_WRITE.code, error = %error, "{} failed", SOCKET_WRITE.message);
        }

        self.settle_writing(base, status);
        self.flush_to_socket(base);
    }

    /// 套接字读回调：`Err` 交给基础传输，`Ok` 追加密文后运行一个完整周期。
    pub fn on_ciphertext<B>(&mut self, base: &mut B, input: Result<&[u8], io::Error>)
    where
        B: BaseTransport + ?Sized,
    {
        let bytes = match input {
            Ok(bytes) => bytes,
            Err(error) => {
                base.on_read_error(error);
                return;
            }
        };
        if self.stale {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.push_ciphertext_in(bytes);

        self.drain_and_encrypt(base);
        self.pump_plaintext(base);
        self.flush_to_socket(base);
    }

    /// 把会话已解密的明文逐块交给帧解析器，直到会话需要更多输入。
    pub fn pump_plaintext<B>(&mut self, base: &mut B)
    where
        B: BaseTransport + ?Sized,
    {
        loop {
            if self.stale {
                return;
            }
            let Some(session) = self.session.as_mut() else {
                return;
            };
            match session.read_plaintext() {
                Ok(ReadOutcome::Data(plaintext)) => base.feed_frames(&plaintext),
                Ok(ReadOutcome::Drained) => return,
                Err(error) => {
                    self.fail_channel(base, DECRYPT, error);
                    return;
                }
            }
        }
    }

    /// 超时扫描周期回调。
    pub fn on_timeout_tick<B>(&mut self, base: &mut B, now: Instant)
    where
        B: BaseTransport + ?Sized,
    {
        let mut expired = Vec::new();
        let held_expired = self.retry.item().is_some_and(|item| item.is_expired(now));
        if held_expired {
            expired.extend(self.retry.take());
        }
        expired.extend(take_expired(&mut self.secondary, now));
        for item in expired {
            item.resolve(Status::Timeout, base.client());
        }

        let base_remaining = base.check_timeouts(now);
        let remaining = base_remaining
            || self.retry.item().is_some_and(WriteItem::has_timeout)
            || self.secondary.iter().any(WriteItem::has_timeout);
        if remaining {
            self.timer.rearm(now);
        } else {
            self.timer.stop();
        }

        if held_expired {
            // 待重试项被清除后，后续写入项可以继续加密。
            base.wake_writer();
        }
    }

    /// 底层连接建立：驱动一次会话以产出握手字节并刷出。
    pub fn on_connected<B>(&mut self, base: &mut B)
    where
        B: BaseTransport + ?Sized,
    {
        self.pump_plaintext(base);
        self.flush_to_socket(base);
    }

    /// 重连前的重置。
    ///
    /// 次级队列与待重试写入项按原顺序插回等待队列头部，重试副本丢弃；随后由基础传输
    /// 完成套接字与底层队列的重置。会话重建失败时状态机保持失效，由调用方决定是否放弃重连。
    pub fn reset<B>(&mut self, base: &mut B) -> Result<(), SessionError>
    where
        B: BaseTransport + ?Sized,
    {
        let held = self.retry.take();
        let parked: Vec<WriteItem> = self.secondary.drain(..).collect();
        if held.is_some() || !parked.is_empty() {
            debug!(
                held = held.is_some(),
                parked = parked.len(),
                "requeueing items of the previous session"
            );
            base.queues()
                .lock()
                .requeue_wait_front(parked.into_iter().chain(held));
        }
        self.write_in_flight = false;

        let outcome = match self.session.as_mut() {
            Some(session) => session.reset(),
            None => Ok(()),
        };
        base.reset();
        if base.queues().lock().has_timeout_bearing() {
            self.timer.arm_if_idle(Instant::now());
        }

        match outcome {
            Ok(()) => {
                self.stale = false;
                Ok(())
            }
            Err(error) => {
                error!(code = RESET.code, error = %error, "{} failed", RESET.message);
                self.stale = true;
                Err(error)
            }
        }
    }

    /// 释放会话与暂存区；重复调用为空操作。
    ///
    /// 仍由状态机持有的写入项（次级队列与待重试项）以 `Error` 结算。
    pub fn teardown<B>(&mut self, base: &mut B)
    where
        B: BaseTransport + ?Sized,
    {
        if self.session.take().is_none() {
            return;
        }
        self.write_in_flight = false;
        self.timer.stop();
        let held = self.retry.take();
        for item in self.secondary.drain(..).chain(held) {
            item.resolve(Status::Error, base.client());
        }
        debug!("secure session released");
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<EncryptOutcome, SessionError> {
        match self.session.as_mut() {
            Some(session) => session.encrypt(plaintext),
            None => Err(SessionError::Closed),
        }
    }

    /// 在锁内摘下整批写入中队列：成功交付的请求转入响应等待队列，其余在锁外结算。
    fn settle_writing<B>(&mut self, base: &mut B, status: Status)
    where
        B: BaseTransport + ?Sized,
    {
        let finished = {
            let mut queues = base.queues().lock();
            if queues.writing_len() == 0 {
                return;
            }
            let batch = queues.take_writing();
            let mut finished = Vec::with_capacity(batch.len());
            for item in batch {
                if status == Status::Ok && item.kind().expects_response() {
                    queues.push_resp_pending(item);
                } else {
                    finished.push(item);
                }
            }
            finished
        };
        for item in finished {
            item.resolve(status, base.client());
        }
    }

    fn place_encrypted<B>(&mut self, base: &mut B, item: WriteItem)
    where
        B: BaseTransport + ?Sized,
    {
        if self.write_in_flight {
            self.secondary.push_back(item);
        } else {
            base.queues().lock().push_writing(item);
        }
    }

    fn fail_channel<B>(&mut self, base: &mut B, operation: OperationKind, error: SessionError)
    where
        B: BaseTransport + ?Sized,
    {
        if self.stale {
            return;
        }
        self.stale = true;
        let class = error.class();
        if error.is_shutdown() {
            warn!(
                code = operation.code,
                class = class.as_str(),
                error = %error,
                "peer shut down the secure channel"
            );
        } else {
            error!(
                code = operation.code,
                class = class.as_str(),
                error = %error,
                "{} failed",
                operation.message
            );
        }
        base.client()
            .on_event(TransportEvent::UnexpectedDisconnect, TLS_ERROR_REASON);
        base.reconnect();
    }
}
