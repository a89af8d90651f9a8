use bytes::Bytes;

use crate::status::{Status, TransportEvent};

/// 传输层回调应用层的出口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 每个写入项的结果都必须回到它的发起者；回调以关联 ID（`seq_num`/`req_id`）定位发起者，
///   避免传输层持有应用层的任何 Future 或闭包。
///
/// ## 契约（What）
/// - `on_event`：连接级事件，`detail` 为简短原因描述；
/// - `on_notify_sent`：通知类写入项的最终结果，每个 `seq_num` 至多回调一次；
/// - `on_request_resolved`：请求类写入项的失败结果（成功时由应用层在收到响应后自行完成）；
/// - **前置条件**：实现必须可跨线程共享，回调期间不得阻塞事件循环；
/// - **后置条件**：传输层保证回调时不持有共享队列锁，实现可以在回调中继续提交写入项。
pub trait ClientSink: Send + Sync {
    fn on_event(&self, event: TransportEvent, detail: &str);

    fn on_notify_sent(&self, seq_num: u32, status: Status);

    fn on_request_resolved(&self, req_id: u32, status: Status, response: Option<Bytes>);
}

/// 消费解密后明文字节的帧解析器。
///
/// 实现需要自行处理跨块拼接：一次 `feed` 可能只携带半个帧，也可能携带多个帧。
/// 连接重置时调用 `reset` 丢弃旧连接残留的半帧。
pub trait FrameSink {
    fn feed(&mut self, bytes: &[u8]);

    fn reset(&mut self) {}
}

impl<F> FrameSink for F
where
    F: FnMut(&[u8]),
{
    fn feed(&mut self, bytes: &[u8]) {
        self(bytes)
    }
}
