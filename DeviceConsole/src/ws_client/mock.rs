// DeviceConsole/src/ws_client/mock.rs

//! 测试用的脚本化连接器。每次 `connect` 按顺序取出一条脚本：拒绝、挂起或接受。
//! 接受时返回一个内存连接，测试通过对应的 `MockDevice` 扮演设备端。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_websocket_utils::WsError;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::transport::{Connector, FrameTransport};

enum Script {
    Refuse,
    /// 握手永远不会完成。
    Hang,
    Accept(MockTransport),
}

enum DeviceAction {
    Frame(String),
    Error(String),
    HangUp,
}

#[derive(Default)]
pub struct MockStats {
    connects: Mutex<Vec<Instant>>,
    open: AtomicUsize,
    max_open: AtomicUsize,
}

impl MockStats {
    /// 所有连接尝试的时间（包括被拒绝和挂起的）。
    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }
}

/// 设备端的遥控器。
pub struct MockDevice {
    actions: mpsc::UnboundedSender<DeviceAction>,
    received: Arc<Mutex<Vec<(Instant, String)>>>,
}

impl MockDevice {
    pub fn push(&self, text: &str) {
        let _ = self.actions.send(DeviceAction::Frame(text.to_string()));
    }

    pub fn fail(&self, message: &str) {
        let _ = self.actions.send(DeviceAction::Error(message.to_string()));
    }

    pub fn hang_up(&self) {
        let _ = self.actions.send(DeviceAction::HangUp);
    }

    /// 设备收到的帧及其到达时间。
    pub fn received(&self) -> Vec<(Instant, String)> {
        self.received.lock().unwrap().clone()
    }

    pub fn received_texts(&self) -> Vec<String> {
        self.received().into_iter().map(|(_, text)| text).collect()
    }
}

struct MockTransport {
    actions: mpsc::UnboundedReceiver<DeviceAction>,
    received: Arc<Mutex<Vec<(Instant, String)>>>,
    stats: Arc<MockStats>,
    hung_up: bool,
    /// 只有真正交给过管理器的连接才计入打开数。
    counted: bool,
}

#[async_trait]
impl FrameTransport for MockTransport {
    async fn send_text(&mut self, text: String) -> Result<(), WsError> {
        if self.hung_up {
            return Err(WsError::SendErrorClosed);
        }
        self.received.lock().unwrap().push((Instant::now(), text));
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<String, WsError>> {
        if self.hung_up {
            return None;
        }
        match self.actions.recv().await {
            Some(DeviceAction::Frame(text)) => Some(Ok(text)),
            Some(DeviceAction::Error(message)) => Some(Err(WsError::Message(message))),
            Some(DeviceAction::HangUp) | None => {
                self.hung_up = true;
                None
            }
        }
    }

    async fn close(&mut self) -> Result<(), WsError> {
        self.hung_up = true;
        Ok(())
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        if self.counted {
            self.stats.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// 脚本用完之后的连接一律被拒绝。
#[derive(Default)]
pub struct MockConnector {
    scripts: Mutex<VecDeque<Script>>,
    stats: Arc<MockStats>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }

    pub fn refuse_next(&self) {
        self.scripts.lock().unwrap().push_back(Script::Refuse);
    }

    pub fn hang_next(&self) {
        self.scripts.lock().unwrap().push_back(Script::Hang);
    }

    pub fn accept_next(&self) -> MockDevice {
        let (actions_tx, actions_rx) = mpsc::unbounded_channel();
        let received = Arc::new(Mutex::new(Vec::new()));
        let transport = MockTransport {
            actions: actions_rx,
            received: received.clone(),
            stats: self.stats.clone(),
            hung_up: false,
            counted: false,
        };
        self.scripts.lock().unwrap().push_back(Script::Accept(transport));
        MockDevice {
            actions: actions_tx,
            received,
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameTransport>, WsError> {
        self.stats.connects.lock().unwrap().push(Instant::now());
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Refuse);
        match script {
            Script::Refuse => Err(WsError::Message(format!("连接 {} 被拒绝", url))),
            Script::Hang => std::future::pending().await,
            Script::Accept(mut transport) => {
                transport.counted = true;
                let open = self.stats.open.fetch_add(1, Ordering::SeqCst) + 1;
                self.stats.max_open.fetch_max(open, Ordering::SeqCst);
                Ok(Box::new(transport))
            }
        }
    }
}
