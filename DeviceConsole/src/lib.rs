// DeviceConsole/src/lib.rs

//! `device_console` 是 ESP32 设备仪表盘的实时遥测连接管理器。
//!
//! 它维护与设备端 `ws://<host>:81/ws` 的唯一一条实时连接，负责重试与自动停用、
//! 出站请求的去重与节流、入站遥测的去重，并通过读模型与推送事件向界面层公开结果。
//!
//! - `config`: 应用配置与连接调优参数。
//! - `error`: 应用级错误类型。
//! - `event`: 推送给订阅者的事件。
//! - `state`: 仪表盘读模型。
//! - `ws_client`: 连接管理器本体。

pub mod config;
pub mod error;
pub mod event;
pub mod state;
pub mod ws_client;

pub use config::AppConfig;
pub use error::AppError;
pub use event::ManagerEvent;
pub use state::{DashboardView, EventLog};
pub use ws_client::TelemetryConnectionManager;
