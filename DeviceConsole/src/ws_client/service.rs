// DeviceConsole/src/ws_client/service.rs

//! 实时遥测连接管理器。
//!
//! 该模块负责维护与设备端的唯一一条实时连接：按需建立连接、失败后固定延时重试、
//! 达到尝试上限后自动停用；对出站请求做准入控制并按固定节拍排空；
//! 对入站遥测做去重，并把结果写入仪表盘读模型、推送给订阅者。
//!
//! 所有状态由一个内部任务独占。对外的 `TelemetryConnectionManager` 句柄只通过命令通道与它交互，
//! 连接会话的事件也经由通道按到达顺序送达，因此状态转换、队列变更和日志追加天然串行。
//! 重试定时器与排空节拍是该任务 `select!` 中的截止时间，清除截止时间即等于取消。

use std::collections::HashMap;
use std::sync::Arc;

use common_models::{
    ConnectionState, DeviceStateChange, EventLogEntry, LogEntryKind, TelemetrySample,
};
use log::{debug, error, info, warn};
use rust_websocket_utils::{decode_frame, InboundFrame, OutboundRequest};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use url::Url;

use super::dedup::InboundDedup;
use super::outbound::{Admission, OutboundQueue};
use super::session::{SessionEvent, SessionHandle, SessionId};
use super::transport::{Connector, TungsteniteConnector};
use crate::config::{AppConfig, ConnectionSettings};
use crate::error::AppError;
use crate::event::ManagerEvent;
use crate::state::DashboardView;

/// 推送事件广播通道的容量。落后太多的订阅者会收到 `Lagged`。
const EVENT_CHANNEL_CAPACITY: usize = 256;

const LOG_CONNECTION_ESTABLISHED: &str = "WebSocket connection established";
const LOG_CONNECTION_CLOSED: &str = "WebSocket connection closed";
const LOG_ENABLED_BY_USER: &str = "WebSocket enabled by user";
const LOG_DISABLED_BY_USER: &str = "WebSocket disabled by user";
const TRANSPORT_ERROR_TEXT: &str = "WebSocket error occurred";

enum ManagerCommand {
    Enable { ack: oneshot::Sender<()> },
    Disable { ack: oneshot::Sender<()> },
    Send { request: OutboundRequest, ack: oneshot::Sender<bool> },
    ClearPending { ack: oneshot::Sender<usize> },
    Shutdown { ack: oneshot::Sender<()> },
}

/// 实时遥测连接管理器的句柄。
///
/// 构造时启动内部任务（必须在 Tokio 运行时中调用），初始状态为 `Disabled`。
/// 句柄被丢弃时内部任务随之中止，连接会话在命令通道断开后自行关闭。
pub struct TelemetryConnectionManager {
    endpoint: Url,
    commands: mpsc::UnboundedSender<ManagerCommand>,
    view: Arc<RwLock<DashboardView>>,
    events: broadcast::Sender<ManagerEvent>,
    actor: Option<JoinHandle<()>>,
}

impl TelemetryConnectionManager {
    /// 使用给定的连接器创建管理器。端点配置无效时立即失败。
    pub fn new(config: &AppConfig, connector: Arc<dyn Connector>) -> Result<Self, AppError> {
        let endpoint = config.ws_url()?;
        config.connection.validate()?;
        info!("[连接管理器] 正在初始化，目标端点: {}", endpoint);

        let settings = config.connection.clone();
        let view = Arc::new(RwLock::new(DashboardView::new(&settings)));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();

        let actor = ManagerActor {
            url: endpoint.to_string(),
            outbound: OutboundQueue::new(
                settings.outbound_queue_capacity,
                settings.sensor_poll_window(),
                settings.outbound_dedup_window(),
            ),
            inbound: InboundDedup::new(settings.inbound_dedup_window()),
            settings,
            connector,
            view: view.clone(),
            events: events.clone(),
            state: ConnectionState::Disabled,
            attempts: 0,
            session: None,
            next_session_id: 1,
            session_tx,
            retry_at: None,
            drain_at: None,
            last_sent_at: None,
        };
        let actor = tokio::spawn(actor.run(command_rx, session_rx));

        Ok(Self {
            endpoint,
            commands,
            view,
            events,
            actor: Some(actor),
        })
    }

    /// 使用基于 `tokio-tungstenite` 的默认连接器创建管理器。
    pub fn with_tungstenite(config: &AppConfig) -> Result<Self, AppError> {
        let connector = Arc::new(TungsteniteConnector::new(config.connection.connect_timeout()));
        Self::new(config, connector)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// 离开 `Disabled` 并立即发起一次连接尝试。已启用时不做任何事。
    pub async fn enable(&self) -> Result<(), AppError> {
        let (ack, done) = oneshot::channel();
        self.request(ManagerCommand::Enable { ack }, done).await
    }

    /// 转入 `Disabled`：关闭当前连接并取消待定的重试与排空。已停用时不做任何事。
    pub async fn disable(&self) -> Result<(), AppError> {
        let (ack, done) = oneshot::channel();
        self.request(ManagerCommand::Disable { ack }, done).await
    }

    /// 提交一个出站请求。返回 `true` 表示已入队（不代表已送达）。
    ///
    /// 队列中已有或刚刚发出过相同请求、轮询类请求过于频繁、队列已满时返回 `false`。
    pub async fn send(&self, request: impl Into<OutboundRequest>) -> bool {
        let (ack, done) = oneshot::channel();
        let request = request.into();
        self.request(ManagerCommand::Send { request, ack }, done)
            .await
            .unwrap_or_else(|e| {
                warn!("[连接管理器] 发送请求被忽略: {}", e);
                false
            })
    }

    /// 显式清空出站队列，返回被丢弃的请求数。
    pub async fn clear_pending(&self) -> Result<usize, AppError> {
        let (ack, done) = oneshot::channel();
        self.request(ManagerCommand::ClearPending { ack }, done).await
    }

    /// 订阅推送事件。
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    /// 整个读模型的快照。
    pub async fn snapshot(&self) -> DashboardView {
        self.view.read().await.clone()
    }

    pub async fn current_state(&self) -> ConnectionState {
        self.view.read().await.state
    }

    /// 事件日志，最新的在末尾。
    pub async fn log(&self) -> Vec<EventLogEntry> {
        self.view.read().await.log.to_vec()
    }

    pub async fn last_raw_message(&self) -> Option<String> {
        self.view.read().await.last_raw_message.clone()
    }

    pub async fn latest_values(&self) -> HashMap<String, TelemetrySample> {
        self.view.read().await.latest_values.clone()
    }

    pub async fn latest_value(&self, device_id: &str, metric: &str) -> Option<TelemetrySample> {
        let key = format!("{}_{}", device_id, metric);
        self.view.read().await.latest_values.get(&key).cloned()
    }

    /// 某个 `deviceId_metric` 最近的样本，旧的在前。
    pub async fn sample_history(&self, key: &str) -> Vec<TelemetrySample> {
        self.view
            .read()
            .await
            .sample_history
            .get(key)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn device_states(&self) -> HashMap<String, String> {
        self.view.read().await.device_states.clone()
    }

    /// 某个设备的状态变更历史，最新的在前。
    pub async fn device_state_history(&self, device_id: &str) -> Vec<DeviceStateChange> {
        self.view
            .read()
            .await
            .device_state_history
            .get(device_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn error(&self) -> Option<String> {
        self.view.read().await.error.clone()
    }

    pub async fn attempt_count(&self) -> u32 {
        self.view.read().await.attempt_count
    }

    pub async fn pending_requests(&self) -> usize {
        self.view.read().await.pending_requests
    }

    /// 未处于 `Connected` 时，外部应回落到 REST 轮询设备状态。
    pub async fn needs_rest_fallback(&self) -> bool {
        self.current_state().await.needs_rest_fallback()
    }

    /// 拆除管理器：关闭当前连接并等待内部任务退出。
    pub async fn shutdown(mut self) {
        info!("[连接管理器] 正在拆除 ({})", self.endpoint);
        let (ack, done) = oneshot::channel();
        if self.commands.send(ManagerCommand::Shutdown { ack }).is_ok() {
            let _ = done.await;
        }
        if let Some(actor) = self.actor.take() {
            if let Err(e) = actor.await {
                error!("[连接管理器] 内部任务异常退出: {}", e);
            }
        }
    }

    async fn request<T>(&self, command: ManagerCommand, done: oneshot::Receiver<T>) -> Result<T, AppError> {
        self.commands.send(command).map_err(|_| AppError::ManagerStopped)?;
        done.await.map_err(|_| AppError::ManagerStopped)
    }
}

impl Drop for TelemetryConnectionManager {
    fn drop(&mut self) {
        if let Some(actor) = self.actor.take() {
            actor.abort();
        }
    }
}

/// 独占全部连接状态的内部任务。
struct ManagerActor {
    url: String,
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    view: Arc<RwLock<DashboardView>>,
    events: broadcast::Sender<ManagerEvent>,
    state: ConnectionState,
    attempts: u32,
    session: Option<SessionHandle>,
    next_session_id: SessionId,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    retry_at: Option<Instant>,
    drain_at: Option<Instant>,
    last_sent_at: Option<Instant>,
    outbound: OutboundQueue,
    inbound: InboundDedup,
}

impl ManagerActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ManagerCommand>,
        mut session_events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        debug!("[连接管理器] 内部任务已启动。");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(ManagerCommand::Shutdown { ack }) => {
                        self.teardown().await;
                        let _ = ack.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
                Some(event) = session_events.recv() => self.handle_session_event(event).await,
                _ = wait_deadline(self.retry_at) => {
                    self.retry_at = None;
                    self.on_retry_timer().await;
                }
                _ = wait_deadline(self.drain_at) => {
                    self.drain_at = None;
                    self.drain_one().await;
                }
            }
        }
        debug!("[连接管理器] 内部任务已退出。");
    }

    async fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Enable { ack } => {
                self.enable().await;
                let _ = ack.send(());
            }
            ManagerCommand::Disable { ack } => {
                self.disable().await;
                let _ = ack.send(());
            }
            ManagerCommand::Send { request, ack } => {
                let accepted = self.admit(request).await;
                let _ = ack.send(accepted);
            }
            ManagerCommand::ClearPending { ack } => {
                let dropped = self.outbound.clear();
                self.drain_at = None;
                self.publish_counters().await;
                info!("[连接管理器] 出站队列已清空，丢弃 {} 个请求。", dropped);
                let _ = ack.send(dropped);
            }
            ManagerCommand::Shutdown { ack } => {
                // 由 run 循环处理，这里不会走到
                let _ = ack.send(());
            }
        }
    }

    async fn enable(&mut self) {
        if self.state != ConnectionState::Disabled {
            debug!("[连接管理器] enable(): 当前状态为 {}，忽略。", self.state);
            return;
        }
        self.attempts = 0;
        self.set_error(None).await;
        self.append_log(LogEntryKind::Info, LOG_ENABLED_BY_USER).await;
        self.begin_attempt().await;
    }

    async fn disable(&mut self) {
        if self.state == ConnectionState::Disabled {
            debug!("[连接管理器] disable(): 已处于 Disabled，忽略。");
            return;
        }
        self.retry_at = None;
        self.drain_at = None;
        self.close_session().await;
        self.set_state(ConnectionState::Disabled).await;
        self.append_log(LogEntryKind::Info, LOG_DISABLED_BY_USER).await;
    }

    async fn teardown(&mut self) {
        self.retry_at = None;
        self.drain_at = None;
        self.close_session().await;
    }

    async fn on_retry_timer(&mut self) {
        if self.state != ConnectionState::WaitingToRetry {
            debug!("[连接管理器] 重试定时器触发时状态为 {}，忽略。", self.state);
            return;
        }
        self.begin_attempt().await;
    }

    /// 关闭旧会话、重置两个去重窗口，然后启动新的会话。
    async fn begin_attempt(&mut self) {
        self.close_session().await;
        self.inbound.reset();
        self.outbound.reset_rate_window();
        self.attempts += 1;

        let id = self.next_session_id;
        self.next_session_id += 1;
        info!(
            "[连接管理器] 第 {}/{} 次连接尝试 (会话 #{}): {}",
            self.attempts, self.settings.max_connect_attempts, id, self.url
        );
        self.set_state(ConnectionState::Connecting).await;
        self.publish_counters().await;
        self.session = Some(SessionHandle::spawn(
            id,
            self.connector.clone(),
            self.url.clone(),
            self.session_tx.clone(),
        ));
    }

    async fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("[连接管理器] 正在关闭会话 #{}", session.id());
            session.shutdown(self.settings.close_timeout()).await;
        }
    }

    fn is_current(&self, session: SessionId) -> bool {
        self.session.as_ref().map(|s| s.id()) == Some(session)
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        if !self.is_current(event.session()) {
            debug!("[连接管理器] 丢弃已被取代的会话 #{} 的事件。", event.session());
            return;
        }
        match event {
            SessionEvent::Opened { .. } => self.on_opened().await,
            SessionEvent::Frame { text, .. } => self.on_frame(text).await,
            SessionEvent::Error { message, .. } => {
                warn!("[连接管理器] 传输错误: {}", message);
                self.set_error(Some(TRANSPORT_ERROR_TEXT.to_string())).await;
                self.append_log(LogEntryKind::Error, format!("{}: {}", TRANSPORT_ERROR_TEXT, message))
                    .await;
            }
            SessionEvent::Closed { .. } => self.on_closed().await,
        }
    }

    async fn on_opened(&mut self) {
        self.attempts = 0;
        self.set_state(ConnectionState::Connected).await;
        self.set_error(None).await;
        self.publish_counters().await;
        self.append_log(LogEntryKind::Info, LOG_CONNECTION_ESTABLISHED).await;
        self.schedule_drain();
    }

    async fn on_closed(&mut self) {
        self.drain_at = None;
        self.close_session().await;
        self.append_log(LogEntryKind::Info, LOG_CONNECTION_CLOSED).await;

        let ceiling = self.settings.max_connect_attempts;
        if self.attempts >= ceiling {
            let message = format!("WebSocket connection failed after {} attempts", ceiling);
            error!("[连接管理器] 连续 {} 次连接尝试失败，自动停用。", ceiling);
            self.set_state(ConnectionState::Failed).await;
            self.set_error(Some(message.clone())).await;
            self.append_log(LogEntryKind::Error, format!("{}. WebSocket disabled.", message))
                .await;
            self.set_state(ConnectionState::Disabled).await;
        } else {
            self.set_state(ConnectionState::WaitingToRetry).await;
            self.retry_at = Some(Instant::now() + self.settings.retry_delay());
            info!(
                "[连接管理器] 将在 {:?} 后重试 (已尝试 {}/{})",
                self.settings.retry_delay(),
                self.attempts,
                ceiling
            );
        }
    }

    async fn on_frame(&mut self, text: String) {
        match decode_frame(&text) {
            InboundFrame::Info => {
                debug!("[连接管理器] 吸收提示帧: {}", text);
                self.set_last_raw(text).await;
            }
            InboundFrame::Error(message) => {
                warn!("[连接管理器] 设备报告错误: {}", message);
                self.set_last_raw(text).await;
                self.set_error(Some(message.clone())).await;
                self.append_log(LogEntryKind::Error, message).await;
            }
            InboundFrame::Telemetry(sample) => {
                if !self.inbound.accept(sample.dedup_key(), Instant::now()) {
                    debug!("[连接管理器] 去重窗口内的重复遥测被吞掉: {}", text);
                    return;
                }
                self.set_last_raw(text.clone()).await;
                self.view.write().await.record_sample(sample.clone());
                self.append_log(LogEntryKind::Raw, text).await;
                self.emit(ManagerEvent::Telemetry(sample));
            }
            InboundFrame::DeviceUpdate(change) => {
                self.set_last_raw(text).await;
                let changed = self.view.write().await.record_device_state(change.clone());
                let summary = format!("Device {} state: {}", change.device_id, change.state);
                if changed {
                    info!("[连接管理器] {}", summary);
                }
                self.append_log(LogEntryKind::Info, summary).await;
                self.emit(ManagerEvent::DeviceUpdated(change));
            }
            InboundFrame::Raw(raw) => {
                self.set_last_raw(raw.clone()).await;
                self.append_log(LogEntryKind::Raw, raw).await;
            }
        }
    }

    async fn admit(&mut self, request: OutboundRequest) -> bool {
        let wire = match request.encode() {
            Ok(wire) => wire,
            Err(e) => {
                warn!("[连接管理器] 出站请求编码失败: {}", e);
                return false;
            }
        };
        let admission = self.outbound.admit(request, wire, Instant::now());
        match admission {
            Admission::Accepted => {
                self.publish_counters().await;
                if self.drain_at.is_none() {
                    self.schedule_drain();
                }
            }
            Admission::DuplicateQueued => debug!("[连接管理器] 队列中已有相同请求，丢弃。"),
            Admission::RecentlySent => debug!("[连接管理器] 相同请求刚刚发出，丢弃。"),
            Admission::RateLimited => debug!("[连接管理器] 传感器轮询过于频繁，丢弃。"),
            Admission::QueueFull => warn!("[连接管理器] 出站队列已满，丢弃请求。"),
        }
        admission.is_accepted()
    }

    /// 已连接且队列非空时安排下一次排空，与上一次发送至少间隔一个节拍。
    fn schedule_drain(&mut self) {
        if self.state != ConnectionState::Connected || self.outbound.is_empty() || self.session.is_none() {
            return;
        }
        let now = Instant::now();
        let at = match self.last_sent_at {
            Some(last) => (last + self.settings.drain_interval()).max(now),
            None => now,
        };
        self.drain_at = Some(at);
    }

    async fn drain_one(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let Some(pending) = self.outbound.pop_front() else {
            return;
        };
        match session.send(pending.wire.clone()) {
            Ok(()) => {
                let now = Instant::now();
                self.last_sent_at = Some(now);
                self.outbound.mark_sent(pending.wire.clone(), now);
                debug!(
                    "[连接管理器] 已发送请求 {} (排队 {:?})",
                    pending.id,
                    pending.enqueued_at.elapsed()
                );
                self.publish_counters().await;
                self.append_log(LogEntryKind::Sent, format!("Sent: {}", pending.wire)).await;
                self.schedule_drain();
            }
            Err(_) => {
                warn!("[连接管理器] 会话已结束，请求 {} 放回队首。", pending.id);
                self.outbound.push_front(pending);
            }
        }
    }

    async fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        info!("[连接管理器] 状态转换: {} -> {}", self.state, state);
        self.state = state;
        self.view.write().await.state = state;
        self.emit(ManagerEvent::StateChanged(state));
    }

    async fn set_error(&mut self, error: Option<String>) {
        {
            let mut view = self.view.write().await;
            if view.error == error {
                return;
            }
            view.error = error.clone();
        }
        self.emit(ManagerEvent::ErrorChanged(error));
    }

    async fn set_last_raw(&mut self, text: String) {
        self.view.write().await.last_raw_message = Some(text);
    }

    async fn publish_counters(&mut self) {
        let mut view = self.view.write().await;
        view.attempt_count = self.attempts;
        view.pending_requests = self.outbound.len();
    }

    async fn append_log(&mut self, kind: LogEntryKind, text: impl Into<String>) {
        let entry = EventLogEntry::new(kind, text);
        match kind {
            LogEntryKind::Error => warn!("[事件日志] {}", entry.text),
            LogEntryKind::Info => info!("[事件日志] {}", entry.text),
            LogEntryKind::Sent | LogEntryKind::Raw => debug!("[事件日志] {}", entry.text),
        }
        self.view.write().await.log.push(entry.clone());
        self.emit(ManagerEvent::LogAppended(entry));
    }

    fn emit(&self, event: ManagerEvent) {
        // 没有订阅者时发送失败是正常的
        let _ = self.events.send(event);
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws_client::mock::{MockConnector, MockDevice};
    use log::LevelFilter;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    const TELEMETRY_FRAME: &str = r#"{"deviceId":"temp1","sensor":"temperature","value":"21.5"}"#;

    fn init_test_logger() {
        let _ = env_logger::builder().filter_level(LevelFilter::Debug).is_test(true).try_init();
    }

    fn test_config() -> AppConfig {
        AppConfig {
            device_host: "esp32.test".to_string(),
            ..AppConfig::default()
        }
    }

    fn manager(connector: &Arc<MockConnector>) -> TelemetryConnectionManager {
        TelemetryConnectionManager::new(&test_config(), connector.clone()).expect("创建管理器失败")
    }

    /// 等待指定的状态转换，返回观察到它的时间。
    async fn wait_for_state(events: &mut broadcast::Receiver<ManagerEvent>, wanted: ConnectionState) -> Instant {
        timeout(Duration::from_secs(600), async {
            loop {
                match events.recv().await {
                    Ok(ManagerEvent::StateChanged(state)) if state == wanted => return Instant::now(),
                    Ok(_) => {}
                    Err(e) => panic!("事件通道出错: {}", e),
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("等待状态 {} 超时", wanted))
    }

    /// 等待一条文本包含 `needle` 的日志。
    async fn wait_for_log(events: &mut broadcast::Receiver<ManagerEvent>, needle: &str) {
        timeout(Duration::from_secs(60), async {
            loop {
                match events.recv().await {
                    Ok(ManagerEvent::LogAppended(entry)) if entry.text.contains(needle) => return,
                    Ok(_) => {}
                    Err(e) => panic!("事件通道出错: {}", e),
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("等待日志 '{}' 超时", needle))
    }

    async fn wait_for_received(device: &MockDevice, count: usize) {
        timeout(Duration::from_secs(60), async {
            while device.received().len() < count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("等待设备收到请求超时");
    }

    async fn connected_manager(
        connector: &Arc<MockConnector>,
    ) -> (TelemetryConnectionManager, MockDevice, broadcast::Receiver<ManagerEvent>) {
        let device = connector.accept_next();
        let manager = manager(connector);
        let mut events = manager.subscribe();
        manager.enable().await.unwrap();
        wait_for_state(&mut events, ConnectionState::Connected).await;
        (manager, device, events)
    }

    fn count_log(log: &[EventLogEntry], text: &str) -> usize {
        log.iter().filter(|entry| entry.text == text).count()
    }

    #[tokio::test(start_paused = true)]
    /// 打开 -> Connected；关闭且 3000ms 内没有新连接 -> WaitingToRetry；到期后 Connecting 且计数为 1。
    async fn test_open_close_then_retry_after_fixed_delay() {
        init_test_logger();
        let connector = MockConnector::new();
        let (manager, device, mut events) = connected_manager(&connector).await;

        assert_eq!(manager.current_state().await, ConnectionState::Connected);
        assert_eq!(manager.attempt_count().await, 0);
        assert_eq!(count_log(&manager.log().await, LOG_CONNECTION_ESTABLISHED), 1);
        assert!(!manager.needs_rest_fallback().await);

        connector.hang_next();
        device.hang_up();
        let waiting_at = wait_for_state(&mut events, ConnectionState::WaitingToRetry).await;
        assert!(manager.needs_rest_fallback().await);

        sleep(Duration::from_millis(2999)).await;
        assert_eq!(manager.current_state().await, ConnectionState::WaitingToRetry);

        let connecting_at = wait_for_state(&mut events, ConnectionState::Connecting).await;
        assert!(connecting_at - waiting_at >= Duration::from_millis(3000));
        assert_eq!(manager.current_state().await, ConnectionState::Connecting);
        assert_eq!(manager.attempt_count().await, 1);
        assert_eq!(connector.stats().connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    /// 连续 5 次失败后依次进入 Failed 与 Disabled，之后不再自动尝试，直到再次 enable。
    async fn test_attempt_ceiling_fails_then_disables() {
        init_test_logger();
        let connector = MockConnector::new();
        let manager = manager(&connector);
        let mut events = manager.subscribe();
        manager.enable().await.unwrap();

        let mut transitions = Vec::new();
        timeout(Duration::from_secs(600), async {
            loop {
                if let Ok(ManagerEvent::StateChanged(state)) = events.recv().await {
                    transitions.push(state);
                    if state == ConnectionState::Disabled {
                        break;
                    }
                }
            }
        })
        .await
        .expect("等待自动停用超时");

        let connecting = transitions.iter().filter(|s| **s == ConnectionState::Connecting).count();
        assert_eq!(connecting, 5);
        assert_eq!(
            &transitions[transitions.len() - 2..],
            &[ConnectionState::Failed, ConnectionState::Disabled]
        );
        assert_eq!(connector.stats().connect_count(), 5);
        assert_eq!(
            manager.error().await.as_deref(),
            Some("WebSocket connection failed after 5 attempts")
        );
        assert_eq!(manager.attempt_count().await, 5);

        // 相邻两次尝试之间至少间隔固定的重试延时
        let times = connector.stats().connect_times();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(3000));
        }

        sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.stats().connect_count(), 5);
        assert_eq!(manager.current_state().await, ConnectionState::Disabled);

        connector.hang_next();
        manager.enable().await.unwrap();
        assert_eq!(manager.current_state().await, ConnectionState::Connecting);
        assert_eq!(manager.attempt_count().await, 1);
        assert_eq!(manager.error().await, None);
    }

    #[tokio::test(start_paused = true)]
    /// 任意 enable/disable 序列下，同一时刻最多只有一条连接处于打开状态。
    async fn test_single_live_socket_across_toggles() {
        init_test_logger();
        let connector = MockConnector::new();
        let manager = manager(&connector);
        let stats = connector.stats();
        let mut events = manager.subscribe();

        let mut devices = Vec::new();
        for _ in 0..3 {
            devices.push(connector.accept_next());
            manager.enable().await.unwrap();
            wait_for_state(&mut events, ConnectionState::Connected).await;
            assert_eq!(stats.open(), 1);
            manager.enable().await.unwrap();
            manager.disable().await.unwrap();
            assert_eq!(stats.open(), 0);
        }

        // 握手挂起时 disable 同样会放弃该次尝试
        connector.hang_next();
        manager.enable().await.unwrap();
        manager.disable().await.unwrap();
        devices.push(connector.accept_next());
        manager.enable().await.unwrap();
        wait_for_state(&mut events, ConnectionState::Connected).await;

        // 对端断开后重连也先回收旧连接
        devices.push(connector.accept_next());
        devices[3].hang_up();
        wait_for_state(&mut events, ConnectionState::WaitingToRetry).await;
        wait_for_state(&mut events, ConnectionState::Connected).await;

        assert_eq!(stats.max_open(), 1);
        assert_eq!(stats.open(), 1);
        manager.shutdown().await;
        assert_eq!(stats.open(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_when_disabled_has_no_effect() {
        init_test_logger();
        let connector = MockConnector::new();
        let manager = manager(&connector);
        let mut events = manager.subscribe();

        manager.disable().await.unwrap();
        assert!(manager.log().await.is_empty());
        assert!(events.try_recv().is_err());

        let device = connector.accept_next();
        manager.enable().await.unwrap();
        wait_for_state(&mut events, ConnectionState::Connected).await;
        manager.disable().await.unwrap();
        let log_len = manager.log().await.len();
        assert_eq!(count_log(&manager.log().await, LOG_DISABLED_BY_USER), 1);

        while events.try_recv().is_ok() {}
        manager.disable().await.unwrap();
        assert_eq!(manager.log().await.len(), log_len);
        assert_eq!(manager.current_state().await, ConnectionState::Disabled);
        assert!(events.try_recv().is_err());

        // 停用之后不会有残留的重试定时器
        sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.stats().connect_count(), 1);
        drop(device);
    }

    #[tokio::test(start_paused = true)]
    /// 重试等待期间 disable 会取消定时器。
    async fn test_disable_cancels_pending_retry() {
        init_test_logger();
        let connector = MockConnector::new();
        connector.refuse_next();
        let manager = manager(&connector);
        let mut events = manager.subscribe();
        manager.enable().await.unwrap();
        wait_for_state(&mut events, ConnectionState::WaitingToRetry).await;
        manager.disable().await.unwrap();

        sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.stats().connect_count(), 1);
        assert_eq!(manager.current_state().await, ConnectionState::Disabled);
        // disable 不重置尝试计数
        assert_eq!(manager.attempt_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_send_is_accepted_once() {
        init_test_logger();
        let connector = MockConnector::new();
        let manager = manager(&connector);

        assert!(manager.send("LED ON").await);
        assert!(!manager.send("LED ON").await);
        assert!(manager.send("LED OFF").await);
        assert_eq!(manager.pending_requests().await, 2);

        assert_eq!(manager.clear_pending().await.unwrap(), 2);
        assert_eq!(manager.pending_requests().await, 0);
        assert!(manager.send("LED ON").await);
    }

    #[tokio::test(start_paused = true)]
    /// 已连接且队列空闲时，第一条立即发出；紧接着的相同请求仍被拒绝，设备只收到一次。
    async fn test_identical_send_while_connected_is_transmitted_once() {
        init_test_logger();
        let connector = MockConnector::new();
        let (manager, device, _events) = connected_manager(&connector).await;

        assert!(manager.send("LED ON").await);
        assert!(!manager.send("LED ON").await);
        wait_for_received(&device, 1).await;
        sleep(Duration::from_millis(200)).await;
        assert!(!manager.send("LED ON").await);
        assert_eq!(device.received_texts(), vec!["LED ON".to_string()]);
        assert_eq!(manager.pending_requests().await, 0);

        // 近期发送窗口过后可以再次发送
        sleep(Duration::from_millis(1000)).await;
        assert!(manager.send("LED ON").await);
        wait_for_received(&device, 2).await;
        assert_eq!(device.received_texts(), vec!["LED ON".to_string(), "LED ON".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_polls_less_than_window_apart() {
        init_test_logger();
        let connector = MockConnector::new();
        let manager = manager(&connector);

        assert!(manager.send(OutboundRequest::sensor_poll("temp1", "temperature")).await);
        assert!(!manager.send(OutboundRequest::sensor_poll("hum1", "humidity")).await);
        // 手工输入的轮询 JSON 同样受限
        assert!(!manager.send(r#"{"deviceId":"hum1","sensor":"humidity"}"#).await);
        assert!(manager.send("LED ON").await);

        sleep(Duration::from_millis(3000)).await;
        assert!(manager.send(OutboundRequest::sensor_poll("hum1", "humidity")).await);
        assert_eq!(manager.pending_requests().await, 3);
    }

    #[tokio::test(start_paused = true)]
    /// 同一遥测帧在 1000ms 内重复到达，只产生一次最新值更新和一条日志。
    async fn test_repeated_telemetry_within_window_is_swallowed() {
        init_test_logger();
        let connector = MockConnector::new();
        let (manager, device, mut events) = connected_manager(&connector).await;

        device.push(TELEMETRY_FRAME);
        wait_for_log(&mut events, "21.5").await;
        let sample = manager.latest_value("temp1", "temperature").await.expect("缺少最新值");
        assert_eq!(sample.value.to_string(), "21.5");
        let log_len = manager.log().await.len();

        sleep(Duration::from_millis(500)).await;
        device.push(TELEMETRY_FRAME);
        device.push("marker");
        wait_for_log(&mut events, "marker").await;
        assert_eq!(manager.log().await.len(), log_len + 1);
        assert_eq!(manager.sample_history("temp1_temperature").await.len(), 1);
        assert_eq!(manager.last_raw_message().await.as_deref(), Some("marker"));

        // 窗口过后同样的值再次被接受
        sleep(Duration::from_millis(600)).await;
        device.push(TELEMETRY_FRAME);
        wait_for_log(&mut events, "21.5").await;
        assert_eq!(manager.sample_history("temp1_temperature").await.len(), 2);
        assert_eq!(manager.latest_values().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    /// N 个排队请求按 FIFO 顺序发出，相邻两次至少间隔 100ms。
    async fn test_queued_requests_drain_in_order_with_pacing() {
        init_test_logger();
        let connector = MockConnector::new();
        let manager = manager(&connector);
        let texts = ["LED ON", "LED OFF", "SERVO 90", "RELAY 1", "RELAY 0"];
        for text in texts {
            assert!(manager.send(text).await);
        }

        let device = connector.accept_next();
        manager.enable().await.unwrap();
        wait_for_received(&device, texts.len()).await;

        let received = device.received();
        let order: Vec<_> = received.iter().map(|(_, text)| text.as_str()).collect();
        assert_eq!(order, texts);
        for pair in received.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(100));
        }

        let log = manager.log().await;
        let sent: Vec<_> = log.iter().filter(|e| e.kind == LogEntryKind::Sent).collect();
        assert_eq!(sent.len(), texts.len());
        assert_eq!(sent[0].text, "Sent: LED ON");
        assert_eq!(manager.pending_requests().await, 0);

        // 之后单独提交的请求也与上一次发送保持节拍
        assert!(manager.send("PING").await);
        wait_for_received(&device, texts.len() + 1).await;
        let received = device.received();
        let last_two = &received[received.len() - 2..];
        assert!(last_two[1].0 - last_two[0].0 >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    /// 断线期间排队的请求在重连后从队首继续发送。
    async fn test_queue_survives_reconnect() {
        init_test_logger();
        let connector = MockConnector::new();
        let (manager, device, mut events) = connected_manager(&connector).await;

        let second = connector.accept_next();
        device.hang_up();
        wait_for_state(&mut events, ConnectionState::WaitingToRetry).await;
        assert!(manager.send("LED ON").await);
        assert!(manager.send(OutboundRequest::sensor_poll("temp1", "temperature")).await);

        wait_for_received(&second, 2).await;
        assert_eq!(
            second.received_texts(),
            vec!["LED ON".to_string(), r#"{"deviceId":"temp1","sensor":"temperature"}"#.to_string()]
        );
        assert!(device.received().is_empty());
    }

    #[tokio::test(start_paused = true)]
    /// 设备报告的错误只设置错误字段；传输错误之后的关闭才驱动状态转换。
    async fn test_error_frames_and_transport_errors() {
        init_test_logger();
        let connector = MockConnector::new();
        let (manager, device, mut events) = connected_manager(&connector).await;

        device.push(r#"{"error":"sensor offline"}"#);
        wait_for_log(&mut events, "sensor offline").await;
        assert_eq!(manager.error().await.as_deref(), Some("sensor offline"));
        assert_eq!(manager.current_state().await, ConnectionState::Connected);

        device.push("{not json");
        wait_for_log(&mut events, "{not json").await;
        assert_eq!(manager.current_state().await, ConnectionState::Connected);

        connector.hang_next();
        device.fail("connection reset");
        wait_for_state(&mut events, ConnectionState::WaitingToRetry).await;
        assert_eq!(manager.error().await.as_deref(), Some(TRANSPORT_ERROR_TEXT));
        let log = manager.log().await;
        assert!(log.iter().any(|e| e.kind == LogEntryKind::Error && e.text.contains("connection reset")));
        assert_eq!(count_log(&log, LOG_CONNECTION_CLOSED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_info_and_device_update_frames() {
        init_test_logger();
        let connector = MockConnector::new();
        let (manager, device, mut events) = connected_manager(&connector).await;
        let log_len = manager.log().await.len();

        device.push(r#"{"type":"info","message":"booted"}"#);
        device.push(r#"{"type":"device_update","deviceId":"led1","state":"on"}"#);
        wait_for_log(&mut events, "led1").await;
        device.push(r#"{"deviceId":"led1","state":"on"}"#);
        device.push(r#"{"deviceId":"led1","state":"off"}"#);
        let mut updates = 0;
        timeout(Duration::from_secs(10), async {
            while updates < 3 {
                if let Ok(ManagerEvent::DeviceUpdated(_)) = events.recv().await {
                    updates += 1;
                }
            }
        })
        .await
        .expect("等待状态变更事件超时");

        // 提示帧不写日志
        assert_eq!(manager.log().await.len(), log_len + 3);
        assert_eq!(manager.device_states().await.get("led1").map(String::as_str), Some("off"));
        let history = manager.device_state_history("led1").await;
        let states: Vec<_> = history.iter().map(|c| c.state.as_str()).collect();
        assert_eq!(states, vec!["off", "on"]);
    }

    #[tokio::test]
    async fn test_invalid_endpoint_fails_at_construction() {
        let config = AppConfig {
            device_host: "  ".to_string(),
            ..AppConfig::default()
        };
        let result = TelemetryConnectionManager::new(&config, MockConnector::new());
        assert!(matches!(result, Err(AppError::InvalidEndpoint(_))));
    }
}
