use bytes::Bytes;
use spark_client_transport::WriteItem;

/// 被安全通道以 would-block 拒绝的写入项及其字节副本。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 会话要求以完全相同的字节重试，而写入项的负载可能在重试前被发起方复用；
///   因此待重试状态同时持有写入项本身与一份私有副本；
/// - 以和类型表达后，“副本存在当且仅当持有写入项”由类型保证，不再依赖两个可空字段的约定。
///
/// ## 契约（What）
/// - `Idle`：没有待重试的写入；
/// - `Pending`：`bytes` 是 `item` 负载在被拒绝时刻的副本，重试只提交 `bytes`；
/// - 每条连接至多存在一个 `Pending`。
#[derive(Debug, Default)]
pub enum RetryState {
    #[default]
    Idle,
    Pending { item: WriteItem, bytes: Bytes },
}

impl RetryState {
    /// 以写入项负载的私有副本进入待重试状态。
    pub fn hold(item: WriteItem) -> Self {
        let bytes = Bytes::copy_from_slice(item.payload());
        RetryState::Pending { item, bytes }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RetryState::Pending { .. })
    }

    pub fn item(&self) -> Option<&WriteItem> {
        match self {
            RetryState::Pending { item, .. } => Some(item),
            RetryState::Idle => None,
        }
    }

    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            RetryState::Pending { bytes, .. } => Some(bytes),
            RetryState::Idle => None,
        }
    }

    /// 取出持有的写入项并回到 `Idle`，副本随之丢弃。
    pub fn take(&mut self) -> Option<WriteItem> {
        match std::mem::take(self) {
            RetryState::Pending { item, .. } => Some(item),
            RetryState::Idle => None,
        }
    }
}
