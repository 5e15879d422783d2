// common_models/src/ws_payloads.rs

//! 设备端 WebSocket (`ws://<host>:81/ws`) 上收发的 JSON 负载结构体。
//!
//! 设备固件不使用统一的消息信封，而是依据出现了哪些字段来区分消息种类：
//! - 出站传感器轮询: `{ "deviceId": string, "sensor": string }`
//! - 入站遥测: `{ "deviceId": string, "sensor": string, "value": string|number }`
//! - 入站错误: `{ "error": string }`
//! - 入站提示: `{ "type": "info", ... }`
//! - 入站设备状态变更: `{ "type": "device_update"?, "deviceId": string, "state": string|number }`
//!
//! 按字段探测的逻辑集中在 `rust_websocket_utils::message::decode_frame`，这里只定义形状。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 遥测值。设备有时以字符串、有时以数字推送同一个读数。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum SensorValue {
    Text(String),
    Number(serde_json::Number),
}

impl SensorValue {
    /// 尝试解析为浮点数，供仪表/曲线使用。无法解析时返回 `None`。
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Text(text) => text.trim().parse::<f64>().ok(),
            SensorValue::Number(number) => number.as_f64(),
        }
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Text(text) => f.write_str(text),
            SensorValue::Number(number) => write!(f, "{}", number),
        }
    }
}

impl From<&str> for SensorValue {
    fn from(value: &str) -> Self {
        SensorValue::Text(value.to_string())
    }
}

/// 出站传感器轮询请求，向设备索要某个传感器的当前读数。
///
/// `deny_unknown_fields` 使得只有恰好这两个字段的 JSON 才会被识别为轮询请求。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SensorPollRequest {
    pub device_id: String,
    pub sensor: String,
}

/// 入站遥测推送。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPayload {
    pub device_id: String,
    pub sensor: String,
    pub value: SensorValue,
}

/// 入站错误通知。不会终止连接。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    pub error: String,
}

/// `"type"` 字段取值为 `"info"` 的标记。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoMarker {
    #[serde(rename = "info")]
    Info,
}

/// 入站提示消息。除 `type` 之外的字段一律忽略。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InfoPayload {
    #[serde(rename = "type")]
    pub kind: InfoMarker,
}

/// 入站设备状态变更推送（继电器开合、LED 亮灭等）。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceUpdatePayload {
    pub device_id: String,
    pub state: SensorValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_poll_request_wire_shape() {
        let request = SensorPollRequest {
            device_id: "temp1".to_string(),
            sensor: "temperature".to_string(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"deviceId":"temp1","sensor":"temperature"}"#);
    }

    #[test]
    /// 多出一个字段的 JSON 不是轮询请求。
    fn test_sensor_poll_request_rejects_extra_fields() {
        let parsed = serde_json::from_str::<SensorPollRequest>(
            r#"{"deviceId":"temp1","sensor":"temperature","value":3}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_sensor_value_accepts_string_and_number() {
        let text: TelemetryPayload =
            serde_json::from_str(r#"{"deviceId":"t","sensor":"s","value":"21.5"}"#).unwrap();
        let number: TelemetryPayload =
            serde_json::from_str(r#"{"deviceId":"t","sensor":"s","value":21.5}"#).unwrap();
        assert_eq!(text.value.to_string(), "21.5");
        assert_eq!(number.value.to_string(), "21.5");
        assert_eq!(text.value.as_f64(), Some(21.5));
        assert_eq!(number.value.as_f64(), Some(21.5));
    }

    #[test]
    fn test_info_payload_requires_info_marker() {
        assert!(serde_json::from_str::<InfoPayload>(r#"{"type":"info","message":"boot"}"#).is_ok());
        assert!(serde_json::from_str::<InfoPayload>(r#"{"type":"device_update"}"#).is_err());
    }
}
