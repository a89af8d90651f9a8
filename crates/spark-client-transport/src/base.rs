use std::{io, time::Instant};

use bytes::Bytes;
use tracing::debug;

use crate::{client::ClientSink, queue::QueueHandle, status::Status};

/// 基础传输的连接状态。
///
/// 只有 `Done` 会影响写路径：进入 `Done` 后，建连等待队列中的写入项才会被提升到等待队列。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnState {
    #[default]
    Connecting,
    Handshaking,
    Done,
}

/// 安全通道之下的基础传输接口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - TLS 状态机只需要底层提供“单写者的原始写入”“重连”“共享队列”等少量能力；
///   以 trait 隔离后，真实的 Tokio 驱动与测试替身可以共用同一套状态机代码。
///
/// ## 契约（What）
/// - `submit_raw_write`：发起一次原始套接字写入；完成后驱动方必须以写入结果回调状态机的
///   `on_write_done`。调用方保证同一时刻至多一次未完成的写入；
/// - `wake_writer`：请求在稍后的事件中再次运行写调度器，禁止同步重入；
/// - `reconnect`：请求进入重连流程，驱动方在当前事件处理结束后执行；
/// - `reset`：重置套接字与底层队列（重连前调用），通常以 [`BaseTransport::recycle_queues`] 实现队列部分；
/// - `on_read_error`：底层读失败（含 EOF），由基础传输决定如何通知与重连；
/// - `feed_frames`：把解密后的明文交给帧解析器；
/// - `check_timeouts`：扫描底层队列中的过期写入项，返回是否仍有带超时的写入项。
pub trait BaseTransport {
    fn queues(&self) -> &QueueHandle;

    fn client(&self) -> &dyn ClientSink;

    fn submit_raw_write(&mut self, bytes: Bytes);

    fn wake_writer(&mut self);

    fn reconnect(&mut self);

    fn reset(&mut self);

    fn on_read_error(&mut self, error: io::Error);

    fn feed_frames(&mut self, plaintext: &[u8]);

    fn check_timeouts(&mut self, now: Instant) -> bool {
        let (expired, remaining) = {
            let mut queues = self.queues().lock();
            let expired = queues.take_expired(now);
            (expired, queues.has_timeout_bearing())
        };
        for item in expired {
            item.resolve(Status::Timeout, self.client());
        }
        remaining
    }

    /// 回收底层队列并静默释放旧连接的内部报文。
    fn recycle_queues(&mut self) {
        let stale = self.queues().lock().recycle_for_reconnect();
        if !stale.is_empty() {
            debug!(count = stale.len(), "dropping internal items of the previous connection");
        }
        for item in stale {
            item.discard();
        }
    }

    /// 以 `Error` 结算全部底层队列，用于连接拆除。
    fn fail_all(&mut self) {
        let items = self.queues().lock().drain_all();
        for item in items {
            item.resolve(Status::Error, self.client());
        }
    }
}
