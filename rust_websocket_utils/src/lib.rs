//! `rust_websocket_utils` 是设备控制台的 WebSocket 工具 crate。
//!
//! 它把"字节如何上线/下线"与"连接该如何管理"分开：本 crate 只负责前者，
//! 连接生命周期、重试、去重和节流都在 `device_console` 中。
//!
//! 主要模块包括：
//! - `message`: 帧编解码器。把入站文本帧解码为 `InboundFrame`，把 `OutboundRequest` 编码为线上文本。
//! - `error`: 统一错误类型 `WsError`。
//! - `client`: 基于 `tokio-tungstenite` 的客户端传输层。
//! - `server`: 最小化的服务端传输层，用于在测试中模拟设备端。

pub mod client;
pub mod error;
pub mod message;
pub mod server;

pub use error::WsError;
pub use message::{decode_frame, InboundFrame, OutboundRequest};
