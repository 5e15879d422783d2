// common_models/src/telemetry_models.rs

//! 解码之后在连接管理器内部流转、并最终展示到仪表盘上的值类型。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::LogEntryKind;
use crate::ws_payloads::SensorValue;

/// 一次遥测观测：(设备, 指标, 值, 时间)。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySample {
    pub device_id: String,
    pub metric: String,
    pub value: SensorValue,
    pub observed_at: DateTime<Utc>,
}

impl TelemetrySample {
    pub fn new(device_id: impl Into<String>, metric: impl Into<String>, value: SensorValue) -> Self {
        Self {
            device_id: device_id.into(),
            metric: metric.into(),
            value,
            observed_at: Utc::now(),
        }
    }

    /// `LatestValues` 映射的键：`deviceId_metric`，例如 `temp1_temperature`。
    pub fn latest_key(&self) -> String {
        format!("{}_{}", self.device_id, self.metric)
    }

    /// 入站去重窗口的键：设备 + 指标 + 字符串化后的精确值。
    pub fn dedup_key(&self) -> String {
        format!("{}\u{1f}{}\u{1f}{}", self.device_id, self.metric, self.value)
    }
}

/// 设备推送的一次状态变更。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStateChange {
    pub device_id: String,
    pub state: String,
    pub observed_at: DateTime<Utc>,
}

impl DeviceStateChange {
    pub fn new(device_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            state: state.into(),
            observed_at: Utc::now(),
        }
    }
}

/// 仪表盘滚动日志中的一条记录。只追加，最新的在末尾。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub kind: LogEntryKind,
}

impl EventLogEntry {
    pub fn new(kind: LogEntryKind, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            text: text.into(),
            kind,
        }
    }
}
