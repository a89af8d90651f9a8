use std::{collections::VecDeque, sync::Arc, time::Instant};

use parking_lot::Mutex;

use crate::{base::ConnState, item::WriteItem};

/// 生产者线程与事件循环共享的队列句柄。
pub type QueueHandle = Arc<Mutex<SharedQueues>>;

/// 一条连接上被多个执行上下文共享的写入队列集合。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 应用线程提交写入项、事件循环消费写入项，两者只在这组队列上交汇；
///   把队列与连接状态放进同一把锁，提交时的“进哪个队列”判定与状态切换天然原子。
///
/// ## 逻辑（How）
/// - `conn_pending`：握手完成前提交的写入项；
/// - `wait`：等待交给安全通道加密的写入项；
/// - `writing`：已交给安全通道、等待套接字写完成的写入项；
/// - `resp_pending`：已交付、等待应用层响应的请求。
///
/// ## 契约（What）
/// - 所有队列都以 FIFO 顺序保存写入项；写入项在任一时刻只属于一个队列；
/// - 锁只在队列拼接期间持有，调用方不得在持锁期间调用安全通道或客户端回调。
#[derive(Debug, Default)]
pub struct SharedQueues {
    state: ConnState,
    conn_pending: VecDeque<WriteItem>,
    wait: VecDeque<WriteItem>,
    writing: VecDeque<WriteItem>,
    resp_pending: VecDeque<WriteItem>,
}

impl SharedQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_handle(self) -> QueueHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// 切换连接状态；进入 `Done` 时在同一临界区内提升建连等待队列。
    pub fn set_state(&mut self, state: ConnState) {
        self.state = state;
        if state == ConnState::Done {
            self.promote_conn_pending();
        }
    }

    /// 应用层提交入口：握手完成后直接进入等待队列，否则暂存到建连等待队列。
    pub fn enqueue(&mut self, item: WriteItem) {
        if self.state == ConnState::Done {
            self.wait.push_back(item);
        } else {
            self.conn_pending.push_back(item);
        }
    }

    /// 握手完成后把建连等待队列整体排到等待队列之前。
    pub fn promote_conn_pending(&mut self) -> usize {
        if self.state != ConnState::Done || self.conn_pending.is_empty() {
            return 0;
        }
        let moved = self.conn_pending.len();
        self.conn_pending.append(&mut self.wait);
        std::mem::swap(&mut self.conn_pending, &mut self.wait);
        moved
    }

    pub fn pop_wait(&mut self) -> Option<WriteItem> {
        self.wait.pop_front()
    }

    /// 把一批写入项按原顺序插回等待队列头部。
    pub fn requeue_wait_front(&mut self, items: impl DoubleEndedIterator<Item = WriteItem>) {
        for item in items.rev() {
            self.wait.push_front(item);
        }
    }

    pub fn push_writing(&mut self, item: WriteItem) {
        self.writing.push_back(item);
    }

    pub fn extend_writing(&mut self, items: impl IntoIterator<Item = WriteItem>) {
        self.writing.extend(items);
    }

    pub fn take_writing(&mut self) -> VecDeque<WriteItem> {
        std::mem::take(&mut self.writing)
    }

    pub fn push_resp_pending(&mut self, item: WriteItem) {
        self.resp_pending.push_back(item);
    }

    pub fn conn_pending_len(&self) -> usize {
        self.conn_pending.len()
    }

    pub fn wait_len(&self) -> usize {
        self.wait.len()
    }

    pub fn writing_len(&self) -> usize {
        self.writing.len()
    }

    pub fn resp_pending_len(&self) -> usize {
        self.resp_pending.len()
    }

    pub fn wait_iter(&self) -> impl Iterator<Item = &WriteItem> {
        self.wait.iter()
    }

    pub fn conn_pending_iter(&self) -> impl Iterator<Item = &WriteItem> {
        self.conn_pending.iter()
    }

    /// 为重连回收写入队列。
    ///
    /// - `writing` 与 `wait` 中的写入项按原顺序排到 `conn_pending` 之前，重连后重新发送；
    /// - 内部报文属于旧连接（握手、心跳），直接返回给调用方静默释放；
    /// - `resp_pending` 保持不动，由超时检查负责收尾；
    /// - 状态回到 `Connecting`。
    pub fn recycle_for_reconnect(&mut self) -> Vec<WriteItem> {
        let mut stale = Vec::new();
        let mut carried = VecDeque::with_capacity(
            self.writing.len() + self.wait.len() + self.conn_pending.len(),
        );
        for item in self
            .writing
            .drain(..)
            .chain(self.wait.drain(..))
            .chain(self.conn_pending.drain(..))
        {
            if item.kind().is_internal() {
                stale.push(item);
            } else {
                carried.push_back(item);
            }
        }
        self.conn_pending = carried;
        self.state = ConnState::Connecting;
        stale
    }

    /// 取出建连等待、等待与响应等待队列中所有已过期的写入项。
    ///
    /// `writing` 不参与扫描：其中的写入项由本次套接字写完成统一结算。
    pub fn take_expired(&mut self, now: Instant) -> Vec<WriteItem> {
        let mut expired = take_expired(&mut self.conn_pending, now);
        expired.extend(take_expired(&mut self.wait, now));
        expired.extend(take_expired(&mut self.resp_pending, now));
        expired
    }

    /// 是否仍有带超时的写入项等待结算。
    pub fn has_timeout_bearing(&self) -> bool {
        self.conn_pending
            .iter()
            .chain(&self.wait)
            .chain(&self.writing)
            .chain(&self.resp_pending)
            .any(WriteItem::has_timeout)
    }

    /// 清空全部队列，供连接拆除时统一结算。
    pub fn drain_all(&mut self) -> Vec<WriteItem> {
        self.conn_pending
            .drain(..)
            .chain(self.wait.drain(..))
            .chain(self.writing.drain(..))
            .chain(self.resp_pending.drain(..))
            .collect()
    }
}

/// 从任意队列中摘除已过期的写入项，保留其余写入项的相对顺序。
pub fn take_expired(queue: &mut VecDeque<WriteItem>, now: Instant) -> Vec<WriteItem> {
    if !queue.iter().any(|item| item.is_expired(now)) {
        return Vec::new();
    }
    let mut expired = Vec::new();
    let mut kept = VecDeque::with_capacity(queue.len());
    for item in queue.drain(..) {
        if item.is_expired(now) {
            expired.push(item);
        } else {
            kept.push_back(item);
        }
    }
    *queue = kept;
    expired
}
