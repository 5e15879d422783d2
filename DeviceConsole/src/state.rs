// DeviceConsole/src/state.rs

//! 仪表盘读模型。
//!
//! `DashboardView` 是连接管理器对外公开的快照：当前状态、滚动日志、最后一条原始消息、
//! 每个指标的最新值等。它由管理器内部任务独占写入（放在 `Arc<RwLock<_>>` 中），
//! 订阅者只读。所有字段都是快照读取，更新由事件推送驱动。

use std::collections::{HashMap, VecDeque};

use common_models::{ConnectionState, DeviceStateChange, EventLogEntry, TelemetrySample};

use crate::config::ConnectionSettings;

/// 有界、只追加的事件日志。容量满后淘汰最旧的条目，最新的条目在末尾。
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<EventLogEntry>,
    capacity: usize,
    evicted: u64,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            evicted: 0,
        }
    }

    pub fn push(&mut self, entry: EventLogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 因容量限制被淘汰的条目总数。
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn last(&self) -> Option<&EventLogEntry> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventLogEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<EventLogEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// 连接管理器对外公开的读模型。
#[derive(Debug, Clone)]
pub struct DashboardView {
    pub state: ConnectionState,
    pub log: EventLog,
    pub last_raw_message: Option<String>,
    /// 键为 `deviceId_metric`，值为该指标最近一次被接受的样本。
    pub latest_values: HashMap<String, TelemetrySample>,
    /// 每个 `deviceId_metric` 最近若干个样本，旧的在前。
    pub sample_history: HashMap<String, VecDeque<TelemetrySample>>,
    /// 每个设备最近一次推送的状态。
    pub device_states: HashMap<String, String>,
    /// 每个设备的状态变更历史，最新的在前；与上一条相同的状态不重复记录。
    pub device_state_history: HashMap<String, VecDeque<DeviceStateChange>>,
    pub error: Option<String>,
    pub attempt_count: u32,
    pub pending_requests: usize,
    sample_history_capacity: usize,
    state_history_capacity: usize,
}

impl DashboardView {
    pub fn new(settings: &ConnectionSettings) -> Self {
        Self {
            state: ConnectionState::Disabled,
            log: EventLog::new(settings.event_log_capacity),
            last_raw_message: None,
            latest_values: HashMap::new(),
            sample_history: HashMap::new(),
            device_states: HashMap::new(),
            device_state_history: HashMap::new(),
            error: None,
            attempt_count: 0,
            pending_requests: 0,
            sample_history_capacity: settings.sample_history_capacity.max(1),
            state_history_capacity: settings.state_history_capacity.max(1),
        }
    }

    /// 记录一个已通过去重的遥测样本：更新最新值并追加到历史。
    pub(crate) fn record_sample(&mut self, sample: TelemetrySample) {
        let key = sample.latest_key();
        let history = self.sample_history.entry(key.clone()).or_default();
        if history.len() == self.sample_history_capacity {
            history.pop_front();
        }
        history.push_back(sample.clone());
        self.latest_values.insert(key, sample);
    }

    /// 记录一次设备状态变更。返回该状态是否与上一次不同。
    pub(crate) fn record_device_state(&mut self, change: DeviceStateChange) -> bool {
        let history = self.device_state_history.entry(change.device_id.clone()).or_default();
        let changed = history.front().map(|last| last.state != change.state).unwrap_or(true);
        if changed {
            history.push_front(change.clone());
            history.truncate(self.state_history_capacity);
        }
        self.device_states.insert(change.device_id, change.state);
        changed
    }
}
