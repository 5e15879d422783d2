// DeviceConsole/src/ws_client/session.rs

//! 单次连接尝试的会话任务。
//!
//! 每次连接尝试对应一个独立的 Tokio 任务，它独占该次尝试的底层连接，
//! 把连接的四类事件（打开、收到帧、出错、关闭）按到达顺序转交给管理器任务。
//! 所有事件都带有会话编号，管理器据此丢弃已被取代的会话发来的事件。

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::transport::{Connector, FrameTransport};

pub type SessionId = u64;

/// 会话任务发给管理器任务的事件。
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Opened { session: SessionId },
    Frame { session: SessionId, text: String },
    /// 传输层错误。不会直接引起状态转换，随后总会跟着一个 `Closed`。
    Error { session: SessionId, message: String },
    Closed { session: SessionId },
}

impl SessionEvent {
    pub fn session(&self) -> SessionId {
        match self {
            SessionEvent::Opened { session }
            | SessionEvent::Frame { session, .. }
            | SessionEvent::Error { session, .. }
            | SessionEvent::Closed { session } => *session,
        }
    }
}

#[derive(Debug)]
enum SessionCommand {
    Send(String),
    Close,
}

/// 管理器持有的会话句柄。底层连接只能经由这里写入或关闭。
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    commands: mpsc::UnboundedSender<SessionCommand>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// 启动一个新的会话任务，立即开始连接。
    pub fn spawn(
        id: SessionId,
        connector: Arc<dyn Connector>,
        url: String,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(id, connector, url, command_rx, events));
        Self { id, commands, task }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// 把一条已编码的文本交给会话写出。会话已结束时原样退回文本。
    pub fn send(&self, text: String) -> Result<(), String> {
        self.commands.send(SessionCommand::Send(text)).map_err(|e| match e.0 {
            SessionCommand::Send(text) => text,
            SessionCommand::Close => String::new(),
        })
    }

    /// 请求会话关闭连接并等待任务结束；超过 `close_timeout` 则强制中止。
    pub async fn shutdown(self, close_timeout: Duration) {
        let SessionHandle { id, commands, mut task } = self;
        let _ = commands.send(SessionCommand::Close);
        drop(commands);
        match tokio::time::timeout(close_timeout, &mut task).await {
            Ok(_) => debug!("[会话 #{}] 会话任务已退出。", id),
            Err(_) => {
                warn!("[会话 #{}] 会话任务未能在 {:?} 内退出，强制中止。", id, close_timeout);
                task.abort();
                let _ = task.await;
            }
        }
    }
}

async fn run_session(
    id: SessionId,
    connector: Arc<dyn Connector>,
    url: String,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    debug!("[会话 #{}] 开始连接 {}", id, url);
    let connect_result = tokio::select! {
        result = connector.connect(&url) => result,
        _ = wait_for_close(&mut commands) => {
            debug!("[会话 #{}] 连接尚未建立即被要求关闭。", id);
            let _ = events.send(SessionEvent::Closed { session: id });
            return;
        }
    };

    let mut transport = match connect_result {
        Ok(transport) => transport,
        Err(e) => {
            warn!("[会话 #{}] 连接 {} 失败: {}", id, url, e);
            let _ = events.send(SessionEvent::Error { session: id, message: e.to_string() });
            let _ = events.send(SessionEvent::Closed { session: id });
            return;
        }
    };

    info!("[会话 #{}] 已连接到 {}", id, url);
    if events.send(SessionEvent::Opened { session: id }).is_err() {
        let _ = transport.close().await;
        return;
    }

    pump(id, &mut transport, &mut commands, &events).await;

    if let Err(e) = transport.close().await {
        debug!("[会话 #{}] 关闭连接时出错（忽略）: {}", id, e);
    }
    let _ = events.send(SessionEvent::Closed { session: id });
}

/// 在入站帧与出站命令之间循环，直到连接关闭、出错或被要求关闭。
async fn pump(
    id: SessionId,
    transport: &mut Box<dyn FrameTransport>,
    commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    events: &mpsc::UnboundedSender<SessionEvent>,
) {
    loop {
        tokio::select! {
            frame = transport.next_frame() => match frame {
                Some(Ok(text)) => {
                    if events.send(SessionEvent::Frame { session: id, text }).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!("[会话 #{}] 接收帧时发生传输错误: {}", id, e);
                    let _ = events.send(SessionEvent::Error { session: id, message: e.to_string() });
                    break;
                }
                None => {
                    info!("[会话 #{}] 对端关闭了连接。", id);
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(SessionCommand::Send(text)) => {
                    if let Err(e) = transport.send_text(text).await {
                        warn!("[会话 #{}] 发送帧失败: {}", id, e);
                        let _ = events.send(SessionEvent::Error { session: id, message: e.to_string() });
                        break;
                    }
                }
                Some(SessionCommand::Close) | None => {
                    debug!("[会话 #{}] 收到关闭请求。", id);
                    break;
                }
            },
        }
    }
}

/// 连接阶段只关心关闭请求，其余命令丢弃。
async fn wait_for_close(commands: &mut mpsc::UnboundedReceiver<SessionCommand>) {
    while let Some(command) = commands.recv().await {
        if matches!(command, SessionCommand::Close) {
            return;
        }
    }
}
