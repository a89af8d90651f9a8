use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use tracing::warn;

use crate::{client::ClientSink, status::Status};

/// 写入项的种类及其关联 ID。
///
/// - `Notify`：单向通知，结果通过 `on_notify_sent(seq_num, ..)` 回调；
/// - `Request`：期待应用层响应的请求，写入成功后转入响应等待队列；
/// - `Internal`：握手、心跳等内部报文，没有回调对象。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemKind {
    Notify { seq_num: u32 },
    Request { req_id: u32 },
    Internal,
}

impl ItemKind {
    /// 写入成功后是否仍需等待应用层响应。
    pub fn expects_response(self) -> bool {
        matches!(self, ItemKind::Request { .. })
    }

    pub fn is_internal(self) -> bool {
        matches!(self, ItemKind::Internal)
    }
}

/// 写入项的存储来源。
///
/// 池化存储在写入项结束生命周期时归还槽位；堆存储随写入项一起释放。
#[derive(Debug)]
pub enum Storage {
    Heap,
    Pooled(PoolLease),
}

/// 一次出站发送的最小单元。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 将“负载 + 交付元数据”封装为独立实体，使其在等待队列、写入中队列与响应等待队列之间迁移时
///   只发生所有权转移，不存在跨队列的共享指针；
/// - 结束生命周期的三个出口（[`WriteItem::resolve`]、[`WriteItem::discard`]、以及被移交给响应
///   等待队列后由上层处理）都消费 `self`，编译器即可保证“恰好释放一次”。
///
/// ## 契约（What）
/// - `payload`：待加密的明文字节，创建后不可变；
/// - `enqueued_at` + `timeout`：超时判定依据，`timeout == None` 表示永不过期；
/// - `storage`：池化槽位或堆分配，释放时分别归还或丢弃。
pub struct WriteItem {
    kind: ItemKind,
    payload: Bytes,
    enqueued_at: Instant,
    timeout: Option<Duration>,
    storage: Storage,
}

impl WriteItem {
    pub fn new(kind: ItemKind, payload: Bytes, timeout: Option<Duration>) -> Self {
        Self {
            kind,
            payload,
            enqueued_at: Instant::now(),
            timeout,
            storage: Storage::Heap,
        }
    }

    pub fn notify(seq_num: u32, payload: Bytes, timeout: Option<Duration>) -> Self {
        Self::new(ItemKind::Notify { seq_num }, payload, timeout)
    }

    pub fn request(req_id: u32, payload: Bytes, timeout: Option<Duration>) -> Self {
        Self::new(ItemKind::Request { req_id }, payload, timeout)
    }

    /// 内部报文不设超时。
    pub fn internal(payload: Bytes) -> Self {
        Self::new(ItemKind::Internal, payload, None)
    }

    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = storage;
        self
    }

    /// 覆盖入队时间，便于回放历史写入项或在测试中构造确定性时钟。
    pub fn with_enqueued_at(mut self, enqueued_at: Instant) -> Self {
        self.enqueued_at = enqueued_at;
        self
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn has_timeout(&self) -> bool {
        self.timeout.is_some()
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self.storage, Storage::Pooled(_))
    }

    /// 自入队起经过的时间超过超时阈值即视为过期。
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.timeout {
            Some(limit) => now.saturating_duration_since(self.enqueued_at) > limit,
            None => false,
        }
    }

    /// 以给定状态结束写入项：按种类触发回调，然后释放负载与存储。
    ///
    /// - `Notify` → `on_notify_sent(seq_num, status)`；
    /// - `Request` → `on_request_resolved(req_id, status, None)`；
    /// - `Internal` → 无回调。
    pub fn resolve(self, status: Status, client: &dyn ClientSink) {
        match self.kind {
            ItemKind::Notify { seq_num } => {
                if status == Status::Timeout {
                    warn!(seq_num, "notify timeout");
                }
                client.on_notify_sent(seq_num, status);
            }
            ItemKind::Request { req_id } => {
                if status == Status::Timeout {
                    warn!(req_id, "request timeout");
                }
                client.on_request_resolved(req_id, status, None);
            }
            ItemKind::Internal => {}
        }
        self.discard();
    }

    /// 不触发任何回调地释放写入项。
    pub fn discard(self) {
        let WriteItem { storage, .. } = self;
        if let Storage::Pooled(lease) = storage {
            lease.release();
        }
    }
}

impl fmt::Debug for WriteItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteItem")
            .field("kind", &self.kind)
            .field("len", &self.payload.len())
            .field("timeout", &self.timeout)
            .field("pooled", &self.is_pooled())
            .finish_non_exhaustive()
    }
}

/// 预分配的写入项槽位池。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 高频通知/请求若每次都走堆分配，会在长连接场景产生可观的分配抖动；
///   固定数量的槽位让绝大多数写入项复用同一批元数据空间。
///
/// ## 逻辑（How）
/// - 每个槽位是一个 `AtomicBool`，`true` 表示被占用；
/// - [`ItemPool::try_lease`] 通过 `compare_exchange` 抢占空闲槽位，失败时返回 `None`，
///   调用方回退为堆存储；
/// - [`PoolLease`] 在 `release` 或 `Drop` 时把槽位标记为空闲，二者只会生效一次。
///
/// ## 契约（What）
/// - `idle()` + 已租出数量 == `capacity()`；
/// - `released()` 统计累计归还次数，供观测与测试断言使用。
#[derive(Clone)]
pub struct ItemPool {
    inner: Arc<PoolSlots>,
}

struct PoolSlots {
    busy: Box<[AtomicBool]>,
    released: AtomicUsize,
}

impl ItemPool {
    pub fn new(capacity: usize) -> Self {
        let busy = (0..capacity).map(|_| AtomicBool::new(false)).collect();
        Self {
            inner: Arc::new(PoolSlots {
                busy,
                released: AtomicUsize::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.busy.len()
    }

    pub fn idle(&self) -> usize {
        self.inner
            .busy
            .iter()
            .filter(|slot| !slot.load(Ordering::Acquire))
            .count()
    }

    pub fn released(&self) -> usize {
        self.inner.released.load(Ordering::Acquire)
    }

    pub fn try_lease(&self) -> Option<PoolLease> {
        self.inner.busy.iter().enumerate().find_map(|(index, slot)| {
            slot.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .ok()
                .map(|_| PoolLease {
                    pool: Arc::clone(&self.inner),
                    index,
                    active: true,
                })
        })
    }

    /// 优先租用槽位，池满时回退为堆存储。
    pub fn storage(&self) -> Storage {
        match self.try_lease() {
            Some(lease) => Storage::Pooled(lease),
            None => Storage::Heap,
        }
    }
}

impl fmt::Debug for ItemPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemPool")
            .field("capacity", &self.capacity())
            .field("idle", &self.idle())
            .finish()
    }
}

/// 池槽位的占用凭证。
pub struct PoolLease {
    pool: Arc<PoolSlots>,
    index: usize,
    active: bool,
}

impl PoolLease {
    pub fn index(&self) -> usize {
        self.index
    }

    /// 归还槽位。
    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.pool.busy[self.index].store(false, Ordering::Release);
        self.pool.released.fetch_add(1, Ordering::AcqRel);
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.give_back();
    }
}

impl fmt::Debug for PoolLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolLease")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}
