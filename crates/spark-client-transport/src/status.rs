use core::fmt;

/// 写入项的最终结果码。
///
/// # 契约（What）
/// - `Ok`：字节已成功交付到套接字；
/// - `Error`：套接字写失败，或连接在交付前被拆除；
/// - `Timeout`：写入项在超时窗口内未能交付。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    Error,
    Timeout,
}

impl Status {
    /// 根据底层写入结果推导状态码。
    pub fn from_write<E>(result: &Result<(), E>) -> Self {
        match result {
            Ok(()) => Status::Ok,
            Err(_) => Status::Error,
        }
    }

    /// 稳定的文本标识，用于日志字段。
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Error => "error",
            Status::Timeout => "timeout",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 传输层向应用层广播的连接事件。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 应用层只关心“连接是否可用”，而不关心失败源自 TCP 还是 TLS；事件枚举将两者统一。
///
/// ## 契约（What）
/// - `UnexpectedDisconnect`：安全通道出现致命错误或被对端关闭，传输层随即进入重连流程；
/// - `ConnectError`：单次建连失败，若重连策略允许会继续尝试；
/// - `ConnectFailed`：重连次数耗尽，连接任务终止；
/// - `Disconnect`：连接被显式关闭。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportEvent {
    Connected,
    ConnectError,
    ConnectFailed,
    Disconnect,
    UnexpectedDisconnect,
}

impl TransportEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportEvent::Connected => "connected",
            TransportEvent::ConnectError => "connect_error",
            TransportEvent::ConnectFailed => "connect_failed",
            TransportEvent::Disconnect => "disconnect",
            TransportEvent::UnexpectedDisconnect => "unexpected_disconnect",
        }
    }
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
