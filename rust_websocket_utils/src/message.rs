// rust_websocket_utils/src/message.rs

//! 设备端 WebSocket 帧的编解码器。
//!
//! 入站方向：每个文本帧只做一次结构化解码，得到带标签的 `InboundFrame`，
//! 之后由调用方穷尽匹配，不再反复探测字段。解码失败的帧退化为 `InboundFrame::Raw`，
//! 永远不会让连接出错。
//!
//! 出站方向：`OutboundRequest` 要么是结构化的传感器轮询请求，要么是原样发送的文本。
//!
//! 本模块不持有任何状态。

use common_models::ws_payloads::{
    DeviceUpdatePayload, ErrorPayload, InfoPayload, SensorPollRequest, TelemetryPayload,
};
use common_models::{DeviceStateChange, TelemetrySample};
use log::debug;
use serde::Deserialize;

use crate::error::WsError;

/// 一个入站文本帧解码之后的结果。
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// `{"type":"info", ...}` 且不含任何可操作字段。调用方应静默吸收。
    Info,
    /// `{"error": "..."}`。设置可见的错误字段，但不终止连接。
    Error(String),
    /// `{"deviceId","sensor","value"}`。
    Telemetry(TelemetrySample),
    /// `{"deviceId","state"}`。
    DeviceUpdate(DeviceStateChange),
    /// 任何其他内容（包括非 JSON 文本），逐字记录。
    Raw(String),
}

/// 结构化解码的候选形状。`untagged` 按声明顺序尝试，
/// 因此错误优先于遥测，遥测优先于状态变更，提示排在最后。
#[derive(Deserialize)]
#[serde(untagged)]
enum StructuredFrame {
    Error(ErrorPayload),
    Telemetry(TelemetryPayload),
    DeviceUpdate(DeviceUpdatePayload),
    Info(InfoPayload),
}

/// 解码一个入站文本帧。
///
/// 此函数不会失败：无法识别的内容一律返回 `InboundFrame::Raw`。
pub fn decode_frame(text: &str) -> InboundFrame {
    match serde_json::from_str::<StructuredFrame>(text) {
        Ok(StructuredFrame::Error(payload)) => InboundFrame::Error(payload.error),
        Ok(StructuredFrame::Telemetry(payload)) => InboundFrame::Telemetry(TelemetrySample::new(
            payload.device_id,
            payload.sensor,
            payload.value,
        )),
        Ok(StructuredFrame::DeviceUpdate(payload)) => InboundFrame::DeviceUpdate(
            DeviceStateChange::new(payload.device_id, payload.state.to_string()),
        ),
        Ok(StructuredFrame::Info(_)) => InboundFrame::Info,
        Err(e) => {
            debug!("编解码器：帧无法结构化解码，按原始文本处理 ({})", e);
            InboundFrame::Raw(text.to_string())
        }
    }
}

/// 发往设备的一个出站请求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundRequest {
    /// 向设备索要某个传感器的当前读数。属于受限速的"遥测轮询"类。
    SensorPoll(SensorPollRequest),
    /// 原样发送的文本。
    Text(String),
}

impl OutboundRequest {
    pub fn sensor_poll(device_id: impl Into<String>, sensor: impl Into<String>) -> Self {
        OutboundRequest::SensorPoll(SensorPollRequest {
            device_id: device_id.into(),
            sensor: sensor.into(),
        })
    }

    pub fn text(text: impl Into<String>) -> Self {
        OutboundRequest::Text(text.into())
    }

    /// 对用户输入的一行文本分类：恰好是 `{"deviceId","sensor"}` 的 JSON 视为传感器轮询，
    /// 其余按原样文本处理。
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        match serde_json::from_str::<SensorPollRequest>(&text) {
            Ok(request) => OutboundRequest::SensorPoll(request),
            Err(_) => OutboundRequest::Text(text),
        }
    }

    /// 是否属于遥测轮询类（受出站限速规则约束）。
    pub fn is_sensor_poll(&self) -> bool {
        matches!(self, OutboundRequest::SensorPoll(_))
    }

    /// 编码为线上文本。
    pub fn encode(&self) -> Result<String, WsError> {
        match self {
            OutboundRequest::SensorPoll(request) => serde_json::to_string(request)
                .map_err(|e| WsError::SerializationError(format!("序列化传感器轮询请求失败: {}", e))),
            OutboundRequest::Text(text) => Ok(text.clone()),
        }
    }
}

impl From<String> for OutboundRequest {
    fn from(text: String) -> Self {
        OutboundRequest::from_text(text)
    }
}

impl From<&str> for OutboundRequest {
    fn from(text: &str) -> Self {
        OutboundRequest::from_text(text)
    }
}
