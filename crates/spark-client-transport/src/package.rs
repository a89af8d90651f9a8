//! 长度前缀的应用层分帧。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - TLS 读泵按“解密出多少就交多少”的节奏输出明文，帧边界与 TLS 记录边界毫无关系；
//!   解析器必须能在任意切分点上暂停并续接。
//!
//! ## 契约（What）
//! - 帧头 4 字节：1 字节类型 + 3 字节大端长度，随后是 `length` 字节的帧体；
//! - 帧体上限为 `2^24 - 1` 字节；
//! - 未知类型视为协议错误，解析器随即进入失效状态，后续输入被忽略，直到调用 `reset`。
//!
//! ## 实现（How）
//! - 以 `BytesMut` 累积未完成的输入，每凑齐一帧即 `split_to` 切出帧体，零拷贝交付。

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::client::FrameSink;

const HEADER_LEN: usize = 4;
const MAX_BODY_LEN: usize = (1 << 24) - 1;

/// 帧类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageKind {
    Handshake,
    HandshakeAck,
    Heartbeat,
    Data,
    Kick,
}

impl PackageKind {
    pub fn code(self) -> u8 {
        match self {
            PackageKind::Handshake => 1,
            PackageKind::HandshakeAck => 2,
            PackageKind::Heartbeat => 3,
            PackageKind::Data => 4,
            PackageKind::Kick => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(PackageKind::Handshake),
            2 => Some(PackageKind::HandshakeAck),
            3 => Some(PackageKind::Heartbeat),
            4 => Some(PackageKind::Data),
            5 => Some(PackageKind::Kick),
            _ => None,
        }
    }
}

/// 一个完整的应用层帧。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Package {
    pub kind: PackageKind,
    pub body: Bytes,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackageError {
    #[error("unknown package type: {0}")]
    UnknownKind(u8),
    #[error("package body of {0} bytes exceeds the 24-bit length field")]
    TooLarge(usize),
}

/// 构造出站帧。
pub fn encode_package(kind: PackageKind, body: &[u8]) -> Result<Bytes, PackageError> {
    if body.len() > MAX_BODY_LEN {
        return Err(PackageError::TooLarge(body.len()));
    }
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u8(kind.code());
    buf.put_uint(body.len() as u64, 3);
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// 增量帧解析器，解析结果交给 `handler`。
pub struct PackageParser<H> {
    pending: BytesMut,
    failed: bool,
    handler: H,
}

impl<H> PackageParser<H>
where
    H: FnMut(Result<Package, PackageError>),
{
    pub fn new(handler: H) -> Self {
        Self {
            pending: BytesMut::new(),
            failed: false,
            handler,
        }
    }

    /// 丢弃未完成的半帧并恢复可用状态，重连后调用。
    pub fn reset(&mut self) {
        self.pending.clear();
        self.failed = false;
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    fn drain_frames(&mut self) {
        while !self.failed && self.pending.len() >= HEADER_LEN {
            let code = self.pending[0];
            let Some(kind) = PackageKind::from_code(code) else {
                self.failed = true;
                self.pending.clear();
                (self.handler)(Err(PackageError::UnknownKind(code)));
                return;
            };
            let body_len = (usize::from(self.pending[1]) << 16)
                | (usize::from(self.pending[2]) << 8)
                | usize::from(self.pending[3]);
            if self.pending.len() < HEADER_LEN + body_len {
                return;
            }
            let mut frame = self.pending.split_to(HEADER_LEN + body_len);
            let body = frame.split_off(HEADER_LEN).freeze();
            (self.handler)(Ok(Package { kind, body }));
        }
    }
}

impl<H> FrameSink for PackageParser<H>
where
    H: FnMut(Result<Package, PackageError>),
{
    fn feed(&mut self, bytes: &[u8]) {
        if self.failed {
            return;
        }
        self.pending.extend_from_slice(bytes);
        self.drain_frames();
    }

    fn reset(&mut self) {
        PackageParser::reset(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(chunks: &[&[u8]]) -> Vec<Result<Package, PackageError>> {
        let mut out = Vec::new();
        {
            let mut parser = PackageParser::new(|frame| out.push(frame));
            for chunk in chunks {
                parser.feed(chunk);
            }
        }
        out
    }

    #[test]
    fn frames_survive_arbitrary_split_points() {
        let mut wire = encode_package(PackageKind::Data, b"hello").expect("编码").to_vec();
        wire.extend_from_slice(&encode_package(PackageKind::Heartbeat, b"").expect("编码"));

        let frames = collect(&[&wire[..2], &wire[2..7], &wire[7..]]);

        assert_eq!(
            frames,
            vec![
                Ok(Package {
                    kind: PackageKind::Data,
                    body: Bytes::from_static(b"hello"),
                }),
                Ok(Package {
                    kind: PackageKind::Heartbeat,
                    body: Bytes::new(),
                }),
            ]
        );
    }

    #[test]
    fn unknown_kind_poisons_parser_until_reset() {
        let mut seen = Vec::new();
        let mut parser = PackageParser::new(|frame| seen.push(frame));
        parser.feed(&[9, 0, 0, 0]);
        parser.feed(&encode_package(PackageKind::Kick, b"").expect("编码"));
        assert_eq!(parser.buffered(), 0);

        parser.reset();
        parser.feed(&encode_package(PackageKind::Kick, b"").expect("编码"));
        drop(parser);

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], Err(PackageError::UnknownKind(9)));
        assert!(matches!(&seen[1], Ok(p) if p.kind == PackageKind::Kick));
    }

    #[test]
    fn oversized_body_is_rejected() {
        let body = vec![0u8; MAX_BODY_LEN + 1];
        assert_eq!(
            encode_package(PackageKind::Data, &body),
            Err(PackageError::TooLarge(MAX_BODY_LEN + 1))
        );
    }
}
