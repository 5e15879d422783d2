//! `common_models` 公共模型库 crate。
//!
//! 本 crate 集中定义了设备控制台各个 Rust 组件（`rust_websocket_utils` 传输/编解码层、
//! `device_console` 实时遥测连接管理器）以及浏览器仪表盘之间共享的数据结构和枚举类型。
//!
//! 主要包含以下类型的模型：
//! - **通用枚举 (`enums`)**: 连接状态 (`ConnectionState`)、事件日志条目类别 (`LogEntryKind`)。
//! - **WebSocket 消息负载 (`ws_payloads`)**: 设备端 (`ws://<host>:81/ws`) 收发的 JSON 负载结构体，
//!   例如传感器轮询请求、遥测推送、错误通知、设备状态变更。
//! - **遥测模型 (`telemetry_models`)**: 解码之后在管理器内部流转的值类型，
//!   如 `TelemetrySample`、`DeviceStateChange`、`EventLogEntry`。
//!
//! 所有模型都派生 `Serialize`/`Deserialize`、`Debug` 与 `Clone`，以便跨 Rust 与前端边界保持一致。

pub mod enums;
pub mod telemetry_models;
pub mod ws_payloads;

pub use enums::{ConnectionState, LogEntryKind};
pub use telemetry_models::{DeviceStateChange, EventLogEntry, TelemetrySample};
pub use ws_payloads::SensorValue;
