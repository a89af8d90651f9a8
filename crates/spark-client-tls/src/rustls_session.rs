use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rustls::{ClientConnection, pki_types::ServerName};
use tracing::trace;

use crate::{
    error::SessionError,
    hot_reload::HotReloadingClientConfig,
    session::{EncryptOutcome, ReadOutcome, SecureSession},
};

/// 基于 rustls 的安全通道会话。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 套接字 IO 由事件循环完成，TLS 引擎只与内存暂存区打交道：`inbound` 保存尚未喂给 rustls 的密文，
///   `outbound` 保存 rustls 产出、尚未交给套接字的密文；
/// - rustls 本身不会因为输出积压而拒绝明文，因此“would-block”由本会话以 `outbound_limit`
///   为阈值显式给出，语义与内存 BIO 写满一致。
///
/// ## 逻辑（How）
/// - `read_plaintext` 先尝试读出已解密的明文；没有明文时再把 `inbound` 中的密文喂给 rustls
///   并 `process_new_packets`，随后把 rustls 需要发出的握手/告警字节搬到 `outbound`；
/// - `encrypt` 在阈值以内整体写入明文（rustls 缓冲上限已关闭，保证不会部分接收），
///   随后把记录搬到 `outbound`；
/// - `reset` 基于热更新配置的最新快照重建 `ClientConnection`，并清空两块暂存区。
///
/// ## 契约（What）
/// - 对端 close_notify 返回 [`SessionError::Closed`]；未发送 close_notify 的断连返回 `Io(UnexpectedEof)`；
/// - 握手完成前写入的明文由 rustls 暂存，握手完成后随下一次 `read_plaintext` 一并加密输出。
pub struct RustlsSession {
    config: HotReloadingClientConfig,
    server_name: ServerName<'static>,
    conn: ClientConnection,
    inbound: BytesMut,
    outbound: BytesMut,
    outbound_limit: usize,
    read_chunk: usize,
}

impl RustlsSession {
    pub fn new(
        config: HotReloadingClientConfig,
        server_name: ServerName<'static>,
        outbound_limit: usize,
        read_chunk: usize,
    ) -> Result<Self, SessionError> {
        let conn = config.open(server_name.clone())?;
        Ok(Self {
            config,
            server_name,
            conn,
            inbound: BytesMut::new(),
            outbound: BytesMut::new(),
            outbound_limit: outbound_limit.max(1),
            read_chunk: read_chunk.max(1),
        })
    }

    pub fn server_name(&self) -> &ServerName<'static> {
        &self.server_name
    }

    /// 协商出的 ALPN 标识（若有）。
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.conn.alpn_protocol()
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    fn stage_outbound(&mut self) -> io::Result<()> {
        let mut sink = (&mut self.outbound).writer();
        while self.conn.wants_write() {
            self.conn.write_tls(&mut sink)?;
        }
        Ok(())
    }

    /// 把入站密文喂给 rustls，返回本次是否消费了任何字节。
    fn feed_engine(&mut self) -> Result<bool, SessionError> {
        if self.inbound.is_empty() || !self.conn.wants_read() {
            return Ok(false);
        }
        let mut source: &[u8] = &self.inbound;
        let consumed = self.conn.read_tls(&mut source)?;
        self.inbound.advance(consumed);
        let processed = self.conn.process_new_packets();
        // 失败时 rustls 已排入告警，尽量带给对端。
        self.stage_outbound()?;
        processed?;
        Ok(consumed > 0)
    }
}

impl SecureSession for RustlsSession {
    fn push_ciphertext_in(&mut self, ciphertext: &[u8]) {
        self.inbound.extend_from_slice(ciphertext);
    }

    fn read_plaintext(&mut self) -> Result<ReadOutcome, SessionError> {
        let mut chunk = vec![0u8; self.read_chunk];
        loop {
            match self.conn.reader().read(&mut chunk) {
                Ok(0) => return Err(SessionError::Closed),
                Ok(read) => {
                    chunk.truncate(read);
                    return Ok(ReadOutcome::Data(Bytes::from(chunk)));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(SessionError::Io(err)),
            }
            if !self.feed_engine()? {
                self.stage_outbound()?;
                return Ok(ReadOutcome::Drained);
            }
        }
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<EncryptOutcome, SessionError> {
        if self.outbound.len() >= self.outbound_limit {
            trace!(
                pending = self.outbound.len(),
                limit = self.outbound_limit,
                "outbound staging full"
            );
            return Ok(EncryptOutcome::WouldBlock);
        }
        self.conn.writer().write_all(plaintext)?;
        self.stage_outbound()?;
        Ok(EncryptOutcome::Written(plaintext.len()))
    }

    fn pull_ciphertext_out(&mut self) -> Bytes {
        self.outbound.split().freeze()
    }

    fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    fn reset(&mut self) -> Result<(), SessionError> {
        self.inbound.clear();
        self.outbound.clear();
        self.conn = self.config.open(self.server_name.clone())?;
        Ok(())
    }
}
