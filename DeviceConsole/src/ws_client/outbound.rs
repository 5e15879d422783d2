// DeviceConsole/src/ws_client/outbound.rs

//! 出站请求队列与准入控制。
//!
//! 准入（是否接受一个请求）与节拍（何时发出）是分开的：本模块只负责前者和 FIFO 顺序，
//! 发送节拍由连接管理器的排空定时器驱动。

use std::collections::VecDeque;
use std::time::Duration;

use rust_websocket_utils::OutboundRequest;
use tokio::time::Instant;
use uuid::Uuid;

/// 队列中等待发送的一个请求。
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub id: Uuid,
    pub request: OutboundRequest,
    /// 编码后的线上文本，重复判定按它逐字节比较。
    pub wire: String,
    pub enqueued_at: Instant,
}

/// 一次准入判定的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// 队列中已有逐字节相同的请求。
    DuplicateQueued,
    /// 逐字节相同的请求刚刚发出，仍在近期发送窗口内。
    RecentlySent,
    /// 传感器轮询类请求距离上一次被接受的同类请求不足限速窗口。
    RateLimited,
    QueueFull,
}

impl Admission {
    pub fn is_accepted(self) -> bool {
        self == Admission::Accepted
    }
}

/// 有界 FIFO 出站队列。
#[derive(Debug)]
pub struct OutboundQueue {
    queue: VecDeque<PendingRequest>,
    capacity: usize,
    poll_window: Duration,
    last_poll_accepted: Option<Instant>,
    recent_window: Duration,
    last_sent: Option<(String, Instant)>,
}

impl OutboundQueue {
    pub fn new(capacity: usize, poll_window: Duration, recent_window: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity: capacity.max(1),
            poll_window,
            last_poll_accepted: None,
            recent_window,
            last_sent: None,
        }
    }

    /// 判定并（在接受时）入队。
    ///
    /// 判定顺序：先查队列中和刚发出的逐字节重复，再查容量，最后才查轮询限速，
    /// 这样被拒绝的请求不会占用限速窗口。
    pub fn admit(&mut self, request: OutboundRequest, wire: String, now: Instant) -> Admission {
        if self.queue.iter().any(|pending| pending.wire == wire) {
            return Admission::DuplicateQueued;
        }
        if let Some((last_wire, sent_at)) = &self.last_sent {
            if *last_wire == wire && now.saturating_duration_since(*sent_at) < self.recent_window {
                return Admission::RecentlySent;
            }
        }
        if self.queue.len() >= self.capacity {
            return Admission::QueueFull;
        }
        if request.is_sensor_poll() {
            if let Some(last) = self.last_poll_accepted {
                if now.saturating_duration_since(last) < self.poll_window {
                    return Admission::RateLimited;
                }
            }
            self.last_poll_accepted = Some(now);
        }
        self.queue.push_back(PendingRequest {
            id: Uuid::new_v4(),
            request,
            wire,
            enqueued_at: now,
        });
        Admission::Accepted
    }

    pub fn pop_front(&mut self) -> Option<PendingRequest> {
        self.queue.pop_front()
    }

    /// 记录刚写出的请求，供近期发送窗口判重。
    pub fn mark_sent(&mut self, wire: String, now: Instant) {
        self.last_sent = Some((wire, now));
    }

    /// 发送失败时把请求放回队首，保持 FIFO 顺序。
    pub fn push_front(&mut self, pending: PendingRequest) {
        self.queue.push_front(pending);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// 清空队列，返回被丢弃的请求数。
    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    /// 新的连接尝试开始时调用。
    pub fn reset_rate_window(&mut self) {
        self.last_poll_accepted = None;
    }
}
