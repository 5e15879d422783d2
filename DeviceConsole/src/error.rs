// DeviceConsole/src/error.rs

//! 设备控制台的应用级错误类型。
//!
//! 传输层的各种状况（连接失败、连接中断、畸形帧）不会以错误的形式越过连接管理器的边界，
//! 它们只体现为状态转换、日志条目和错误字段。这里只收录真正需要调用方处理的情况。

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// 端点配置无效（主机为空、URL 无法解析等）。构造管理器时立即失败。
    #[error("无效的设备端点: {0}")]
    InvalidEndpoint(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("I/O错误: {0}")]
    Io(#[from] std::io::Error),

    /// 管理器已被拆除，内部任务不再接受命令。
    #[error("连接管理器已停止")]
    ManagerStopped,
}
