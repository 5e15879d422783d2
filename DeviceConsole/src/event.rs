// DeviceConsole/src/event.rs

//! 连接管理器向订阅者推送的事件定义模块。
//!
//! 仪表盘面板不轮询管理器，而是订阅这里定义的事件：管理器内部任务每完成一次
//! 状态变更、日志追加或数值更新，就通过 `tokio::sync::broadcast` 推送一个 `ManagerEvent`。
//! 每种事件都有一个稳定的事件名常量，桥接到前端事件总线时直接使用。

use common_models::{ConnectionState, DeviceStateChange, EventLogEntry, TelemetrySample};
use serde::Serialize;

/// 事件名称常量：连接状态发生转换。
pub const WS_CONNECTION_STATE_EVENT: &str = "ws-connection-state";
/// 事件名称常量：事件日志追加了一条记录。
pub const WS_LOG_APPENDED_EVENT: &str = "ws-log-appended";
/// 事件名称常量：某个 `deviceId_metric` 的最新值被更新。
pub const WS_TELEMETRY_EVENT: &str = "ws-telemetry";
/// 事件名称常量：设备推送了状态变更。
pub const WS_DEVICE_UPDATED_EVENT: &str = "ws-device-updated";
/// 事件名称常量：可见的错误字段被设置或清除。
pub const WS_ERROR_CHANGED_EVENT: &str = "ws-error-changed";

/// 推送给订阅者的事件。
#[derive(Clone, Serialize, Debug, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum ManagerEvent {
    StateChanged(ConnectionState),
    LogAppended(EventLogEntry),
    Telemetry(TelemetrySample),
    DeviceUpdated(DeviceStateChange),
    ErrorChanged(Option<String>),
}

impl ManagerEvent {
    /// 对应的事件名称常量。
    pub fn name(&self) -> &'static str {
        match self {
            ManagerEvent::StateChanged(_) => WS_CONNECTION_STATE_EVENT,
            ManagerEvent::LogAppended(_) => WS_LOG_APPENDED_EVENT,
            ManagerEvent::Telemetry(_) => WS_TELEMETRY_EVENT,
            ManagerEvent::DeviceUpdated(_) => WS_DEVICE_UPDATED_EVENT,
            ManagerEvent::ErrorChanged(_) => WS_ERROR_CHANGED_EVENT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_and_payload_shape() {
        let event = ManagerEvent::StateChanged(ConnectionState::Connected);
        assert_eq!(event.name(), WS_CONNECTION_STATE_EVENT);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"stateChanged","payload":"connected"}"#);

        let cleared = ManagerEvent::ErrorChanged(None);
        assert_eq!(cleared.name(), WS_ERROR_CHANGED_EVENT);
    }
}
