// DeviceConsole/src/ws_client/mod.rs

//! 实时遥测连接管理器。
//!
//! - `service`: 管理器句柄与独占状态的内部任务。
//! - `session`: 单次连接尝试的会话任务。
//! - `outbound`: 出站队列与准入控制。
//! - `dedup`: 入站遥测去重窗口。
//! - `transport`: 连接器与帧传输的接缝。

pub mod dedup;
pub mod outbound;
pub mod service;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use service::TelemetryConnectionManager;
pub use transport::{Connector, FrameTransport, TungsteniteConnector};
