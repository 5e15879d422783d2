//! 通用枚举模块。
//!
//! 本模块定义了在连接管理器、传输层与仪表盘之间共享的枚举类型，
//! 保证"连接处于什么状态"、"日志条目属于哪一类"这类概念在整个系统中有一致的表示。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 实时遥测连接的生命周期状态。
///
/// 每个目标端点恰好存在一个实例；只能通过连接管理器内部的状态转换来修改。
///
/// ```text
/// Disabled --enable()--> Connecting --open--> Connected
/// Connecting/Connected --close--> WaitingToRetry | Failed
/// WaitingToRetry --重试定时器--> Connecting
/// Failed --自动--> Disabled
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// 未启用。初始状态，也是重试耗尽后的终态；只有 `enable()` 可以离开。
    #[default]
    Disabled,
    /// 正在打开套接字，等待握手完成。
    Connecting,
    /// 套接字已打开，出站队列可以排空。
    Connected,
    /// 上一次连接已关闭，固定延时后发起下一次尝试。
    WaitingToRetry,
    /// 尝试次数达到上限。随即自动转入 `Disabled`。
    Failed,
}

impl ConnectionState {
    /// 仪表盘是否应当退回到 REST 轮询 (`getDeviceState`，5 秒一次)。
    ///
    /// 只要实时连接不处于 `Connected`，设备状态就不会被推送过来。
    pub fn needs_rest_fallback(self) -> bool {
        self != ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 事件日志条目的类别。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum LogEntryKind {
    /// 生命周期提示，例如"连接已建立"、"已被用户停用"。
    Info,
    /// 出站请求已写入套接字。
    Sent,
    /// 传输错误或设备回报的错误。
    Error,
    /// 设备推送的原始文本，逐字记录。
    Raw,
}
