// DeviceConsole/src/ws_client/dedup.rs

//! 入站遥测去重窗口。

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// 映射超过这个大小时顺便清理已过期的键。
const PRUNE_THRESHOLD: usize = 256;

/// 记录每个去重键（设备 + 指标 + 值）最后一次被接受的时间。
///
/// 被吞掉的重复帧不刷新时间戳，所以一个持续重复的值每个窗口仍会放行一次。
#[derive(Debug)]
pub struct InboundDedup {
    window: Duration,
    seen: HashMap<String, Instant>,
}

impl InboundDedup {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// 返回 `true` 表示该样本应被处理，`false` 表示在窗口内重复、应被吞掉。
    pub fn accept(&mut self, key: String, now: Instant) -> bool {
        if let Some(last) = self.seen.get(&key) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }
        self.seen.insert(key, now);
        if self.seen.len() > PRUNE_THRESHOLD {
            let window = self.window;
            self.seen.retain(|_, last| now.saturating_duration_since(*last) < window);
        }
        true
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }
}
