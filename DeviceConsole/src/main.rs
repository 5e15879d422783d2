// DeviceConsole/src/main.rs

//! 设备控制台命令行入口。
//!
//! 用法: `device_console [host]`
//!
//! 启动后加载 `app_settings.json`（不存在时写出默认配置），按配置启用连接管理器，
//! 把推送事件逐行打印到标准输出；标准输入的每一行被当作一个出站请求：
//! `poll <deviceId> <sensor>` 发送传感器轮询，`enable` / `disable` 切换连接，其余文本原样发送。
//! Ctrl-C 时拆除管理器并退出。

use std::str::FromStr;

use anyhow::Context;
use device_console::config::{default_config_path, load_or_create_config};
use device_console::{ManagerEvent, TelemetryConnectionManager};
use log::{info, warn, LevelFilter};
use rust_websocket_utils::OutboundRequest;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = default_config_path();
    let mut config = load_or_create_config(&config_path);
    if let Some(host) = std::env::args().nth(1) {
        config.device_host = host;
    }

    let level = LevelFilter::from_str(&config.log_level).unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .try_init()
        .context("初始化 env_logger 日志服务失败")?;

    info!("[设备控制台] 正在启动，配置文件: {:?}", config_path);

    let manager = TelemetryConnectionManager::with_tungstenite(&config)
        .with_context(|| format!("无法为设备 '{}' 创建连接管理器", config.device_host))?;
    info!("[设备控制台] 实时连接端点: {}", manager.endpoint());
    if config.auto_enable {
        manager.enable().await?;
    }

    let mut events = manager.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("[设备控制台] 输出跟不上，跳过了 {} 个事件", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("[设备控制台] 收到 Ctrl-C，正在退出...");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => handle_line(&manager, line.trim()).await?,
                None => {
                    info!("[设备控制台] 标准输入已结束，等待 Ctrl-C 退出。");
                    tokio::signal::ctrl_c().await?;
                    break;
                }
            },
        }
    }

    manager.shutdown().await;
    printer.abort();
    info!("[设备控制台] 已退出。");
    Ok(())
}

async fn handle_line(manager: &TelemetryConnectionManager, line: &str) -> anyhow::Result<()> {
    if line.is_empty() {
        return Ok(());
    }
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("enable"), None, _, _) => manager.enable().await?,
        (Some("disable"), None, _, _) => manager.disable().await?,
        (Some("poll"), Some(device_id), Some(sensor), None) => {
            let accepted = manager.send(OutboundRequest::sensor_poll(device_id, sensor)).await;
            println!("poll {}/{}: {}", device_id, sensor, if accepted { "queued" } else { "dropped" });
        }
        _ => {
            let accepted = manager.send(line).await;
            if !accepted {
                println!("dropped: {}", line);
            }
        }
    }
    Ok(())
}

fn print_event(event: &ManagerEvent) {
    match event {
        ManagerEvent::StateChanged(state) => println!("[state] {}", state),
        ManagerEvent::LogAppended(entry) => {
            let local = entry.timestamp.with_timezone(&chrono::Local);
            println!("[{}] {:?}: {}", local.format("%H:%M:%S%.3f"), entry.kind, entry.text)
        }
        ManagerEvent::Telemetry(sample) => {
            println!("[telemetry] {} = {}", sample.latest_key(), sample.value)
        }
        ManagerEvent::DeviceUpdated(change) => {
            println!("[device] {} -> {}", change.device_id, change.state)
        }
        ManagerEvent::ErrorChanged(Some(error)) => println!("[error] {}", error),
        ManagerEvent::ErrorChanged(None) => {}
    }
}
