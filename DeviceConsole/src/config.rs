// DeviceConsole/src/config.rs

//! 设备控制台配置管理模块。
//!
//! 本模块定义应用配置 (`AppConfig`) 与连接管理器的调优参数 (`ConnectionSettings`)，
//! 负责从 `app_settings.json` 加载配置、在文件缺失或损坏时回落到默认值并写回，
//! 以及根据设备地址构造并校验实时连接的 WebSocket URL。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

/// 配置文件的默认文件名。
pub const CONFIG_FILE_NAME: &str = "app_settings.json";
/// 设备固件中 WebSocket 服务监听的端口。
pub const DEFAULT_WS_PORT: u16 = 81;
/// 设备固件中 WebSocket 服务的路径。
pub const DEFAULT_WS_PATH: &str = "/ws";

/// 连接管理器的调优参数。
///
/// 其中的几个时间窗口（入站去重 1000ms、轮询限速 3000ms）表达的是对"吵闹/重发"的设备
/// 能容忍到什么程度的策略选择，而不是协议要求，因此全部可配置。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionSettings {
    /// 进入 `WaitingToRetry` 之后到下一次尝试的固定延时（毫秒）。
    pub retry_delay_ms: u64,
    /// 连续失败尝试次数上限，达到后转入 `Failed` 并自动停用。
    pub max_connect_attempts: u32,
    /// 出站队列排空节拍（毫秒），每个节拍最多发送一条。
    pub drain_interval_ms: u64,
    /// 入站遥测去重窗口（毫秒）。
    pub inbound_dedup_window_ms: u64,
    /// 传感器轮询类请求的限速窗口（毫秒）。
    pub sensor_poll_window_ms: u64,
    /// 出站近期发送窗口（毫秒）：与刚发出的请求逐字节相同的请求在窗口内被拒绝。
    pub outbound_dedup_window_ms: u64,
    /// 事件日志环形缓冲的容量。
    pub event_log_capacity: usize,
    /// 出站队列容量，满了之后拒绝新请求。
    pub outbound_queue_capacity: usize,
    /// 每个 `deviceId_metric` 保留的历史样本数（曲线数据）。
    pub sample_history_capacity: usize,
    /// 每个设备保留的状态变更历史条数。
    pub state_history_capacity: usize,
    /// 单次握手的超时时间（毫秒）。
    pub connect_timeout_ms: u64,
    /// 关闭旧连接时等待其优雅退出的最长时间（毫秒），超时后强制中止。
    pub close_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            retry_delay_ms: 3000,
            max_connect_attempts: 5,
            drain_interval_ms: 100,
            inbound_dedup_window_ms: 1000,
            sensor_poll_window_ms: 3000,
            outbound_dedup_window_ms: 1000,
            event_log_capacity: 500,
            outbound_queue_capacity: 64,
            sample_history_capacity: 20,
            state_history_capacity: 50,
            connect_timeout_ms: 5000,
            close_timeout_ms: 1000,
        }
    }
}

impl ConnectionSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn inbound_dedup_window(&self) -> Duration {
        Duration::from_millis(self.inbound_dedup_window_ms)
    }

    pub fn sensor_poll_window(&self) -> Duration {
        Duration::from_millis(self.sensor_poll_window_ms)
    }

    pub fn outbound_dedup_window(&self) -> Duration {
        Duration::from_millis(self.outbound_dedup_window_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// 拒绝会让状态机失去意义的取值。
    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_connect_attempts == 0 {
            return Err(AppError::ConfigError("max_connect_attempts 必须大于 0".to_string()));
        }
        if self.drain_interval_ms == 0 {
            return Err(AppError::ConfigError("drain_interval_ms 必须大于 0".to_string()));
        }
        if self.event_log_capacity == 0 || self.outbound_queue_capacity == 0 {
            return Err(AppError::ConfigError("日志与出站队列容量必须大于 0".to_string()));
        }
        Ok(())
    }
}

/// 应用配置结构体，对应于配置文件 (`app_settings.json`) 中的内容。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// 设备的地址，IPv4 字面量或主机名。例如 `"192.168.4.1"`、`"esp32.local"`。
    pub device_host: String,
    /// 实时连接端口，设备固件固定为 81。
    pub ws_port: u16,
    /// 实时连接路径，设备固件固定为 `/ws`。
    pub ws_path: String,
    /// `true` 时使用 `wss`，否则使用 `ws`。
    pub use_tls: bool,
    /// 启动时是否自动调用 `enable()`。
    pub auto_enable: bool,
    /// 日志级别: `"trace"`, `"debug"`, `"info"`, `"warn"`, `"error"`。
    pub log_level: String,
    /// 连接管理器调优参数。
    pub connection: ConnectionSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_host: "192.168.4.1".to_string(), // ESP32 软 AP 模式下的默认网关地址
            ws_port: DEFAULT_WS_PORT,
            ws_path: DEFAULT_WS_PATH.to_string(),
            use_tls: false,
            auto_enable: true,
            log_level: "info".to_string(),
            connection: ConnectionSettings::default(),
        }
    }
}

impl AppConfig {
    /// 构造并校验实时连接的 URL：`ws(s)://<host>:<port><path>`。
    ///
    /// 主机为空或无法组成合法 URL 属于编程/配置错误，返回 `AppError::InvalidEndpoint`。
    pub fn ws_url(&self) -> Result<Url, AppError> {
        let host = self.device_host.trim();
        if host.is_empty() {
            return Err(AppError::InvalidEndpoint("设备主机地址为空".to_string()));
        }
        if host.contains('/') || host.contains(char::is_whitespace) {
            return Err(AppError::InvalidEndpoint(format!("设备主机地址 '{}' 含有非法字符", host)));
        }
        let scheme = if self.use_tls { "wss" } else { "ws" };
        let path = if self.ws_path.starts_with('/') {
            self.ws_path.clone()
        } else {
            format!("/{}", self.ws_path)
        };
        let raw = format!("{}://{}:{}{}", scheme, host, self.ws_port, path);
        let url = Url::parse(&raw)
            .map_err(|e| AppError::InvalidEndpoint(format!("无法解析 '{}': {}", raw, e)))?;
        if url.host_str().is_none() {
            return Err(AppError::InvalidEndpoint(format!("'{}' 中缺少主机", raw)));
        }
        Ok(url)
    }

    /// 对应的 REST 接口基地址（`http(s)://<host>`），供外部的设备控制 API 协作方使用。
    pub fn rest_base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}", scheme, self.device_host.trim())
    }
}

/// 从指定路径加载配置。文件不存在或内容无法解析时返回错误。
pub fn load_config(path: &Path) -> Result<AppConfig, AppError> {
    let content = fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)
        .map_err(|e| AppError::ConfigError(format!("解析配置文件 '{}' 失败: {}", path.display(), e)))?;
    config.connection.validate()?;
    Ok(config)
}

/// 把配置以便于阅读的 JSON 格式写入指定路径，必要时创建父目录。
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| AppError::ConfigError(format!("序列化配置失败: {}", e)))?;
    fs::write(path, content)?;
    Ok(())
}

/// 加载配置；文件缺失或损坏时使用默认配置并尝试写回，写回失败只记录警告。
pub fn load_or_create_config(path: &Path) -> AppConfig {
    match load_config(path) {
        Ok(config) => {
            info!("[配置模块] 已成功从配置文件 {:?} 加载应用配置。", path);
            config
        }
        Err(e) => {
            warn!("[配置模块] 无法从 {:?} 加载配置 ({}). 将使用默认配置并尝试写回。", path, e);
            let default_config = AppConfig::default();
            if let Err(save_err) = save_config(path, &default_config) {
                warn!("[配置模块] 将默认配置写入 {:?} 失败: {}", path, save_err);
            }
            default_config
        }
    }
}

/// 默认配置文件路径：当前工作目录下的 `app_settings.json`。
pub fn default_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(CONFIG_FILE_NAME)
}
