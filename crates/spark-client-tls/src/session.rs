use bytes::Bytes;

use crate::error::SessionError;

/// 一次加密尝试的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptOutcome {
    /// 明文已被会话完整接收。
    Written(usize),
    /// 会话暂时无法接收；调用方必须稍后以完全相同的字节重试。
    WouldBlock,
}

/// 一次解密拉取的结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// 新解密出的明文，非空。
    Data(Bytes),
    /// 现有密文已耗尽，需要更多输入。
    Drained,
}

/// 握手/记录层引擎与两块密文暂存区的组合。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 状态机只通过“推入密文、拉出明文、加密明文、拉出密文”四个动作与会话交互，
///   会话内部的握手推进、记录分片与告警对状态机完全不透明；
/// - 以 trait 抽象后，生产环境使用 rustls 实现，测试可以注入脚本化的会话精确复现 would-block 与致命错误。
///
/// ## 契约（What）
/// - `push_ciphertext_in`：把套接字读到的密文追加到入站暂存区；
/// - `read_plaintext`：推进解密并返回下一块明文；返回 `Drained` 表示需要更多输入。
///   推进过程中产生的握手/告警字节写入出站暂存区；
/// - `encrypt`：要么完整接收明文，要么返回 `WouldBlock` 且不改变任何状态；
/// - `pull_ciphertext_out`：取走出站暂存区的全部字节，可能为空；
/// - `reset`：丢弃全部握手状态与暂存区，得到一个可重新握手的新会话；
/// - **前置条件**：调用方保证单线程访问，同一时刻只有一个加密或解密调用。
pub trait SecureSession {
    fn push_ciphertext_in(&mut self, ciphertext: &[u8]);

    fn read_plaintext(&mut self) -> Result<ReadOutcome, SessionError>;

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<EncryptOutcome, SessionError>;

    fn pull_ciphertext_out(&mut self) -> Bytes;

    fn is_handshaking(&self) -> bool;

    fn reset(&mut self) -> Result<(), SessionError>;
}
