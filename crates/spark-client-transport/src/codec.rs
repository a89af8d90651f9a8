use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

/// 消息体编解码失败。
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message body encode failed: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("message body decode failed: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("decode offset {offset} is beyond the {len}-byte buffer")]
    Offset { offset: usize, len: usize },
}

/// 无状态的消息体编解码契约。
///
/// 传输层不关心消息结构，只需要在写入项创建前把消息编码成字节、在帧交付后把字节还原。
pub trait BodyCodec {
    type Message;

    fn encode(&self, message: &Self::Message) -> Result<Bytes, CodecError>;

    /// 从 `data[offset..]` 解码消息体，`offset` 用于跳过路由等前置字段。
    fn decode(&self, data: &[u8], offset: usize) -> Result<Self::Message, CodecError>;
}

/// 紧凑 JSON 消息体。
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonBodyCodec;

impl BodyCodec for JsonBodyCodec {
    type Message = Value;

    fn encode(&self, message: &Value) -> Result<Bytes, CodecError> {
        serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(CodecError::Encode)
    }

    fn decode(&self, data: &[u8], offset: usize) -> Result<Value, CodecError> {
        let body = data.get(offset..).ok_or(CodecError::Offset {
            offset,
            len: data.len(),
        })?;
        serde_json::from_slice(body).map_err(CodecError::Decode)
    }
}
