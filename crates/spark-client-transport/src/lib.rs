#![deny(unsafe_code)]
#![doc = "spark-client-transport: 客户端传输层契约与共享数据结构。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：TLS 传输状态机与底层 TCP 传输共享同一组写入队列，需要一份双方都认可的数据模型与回调契约。"]
#![doc = "- **What**：定义写入项（[`WriteItem`]）、写入项池、共享队列、状态码、客户端回调以及 [`BaseTransport`] 接口。"]
#![doc = "- **How**：写入项以值语义在队列之间移动，所有权即归属；跨线程访问仅通过 [`QueueHandle`] 的互斥锁完成。"]

pub mod base;
pub mod client;
pub mod codec;
pub mod config;
pub mod item;
pub mod package;
pub mod queue;
pub mod status;

pub use base::{BaseTransport, ConnState};
pub use client::{ClientSink, FrameSink};
pub use codec::{BodyCodec, CodecError, JsonBodyCodec};
pub use config::{
    DEFAULT_READ_BUF_SIZE, DEFAULT_TIMEOUT_CHECK_INTERVAL, ReconnectPolicy, TransportConfig,
    WITHOUT_TIMEOUT,
};
pub use item::{ItemKind, ItemPool, PoolLease, Storage, WriteItem};
pub use package::{Package, PackageError, PackageKind, PackageParser, encode_package};
pub use queue::{QueueHandle, SharedQueues, take_expired};
pub use status::{Status, TransportEvent};
