//! 事件广播器
//!
//! 按用户扇出执行进度事件：publish 在用户锁内分配严格递增的序号，
//! 并发发布方之间有全序；慢订阅者不阻塞发布（无界通道），断开的通道被剪除。

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// 单条事件：序号在用户内严格递增、无空洞
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub user_id: String,
    pub topic: String,
    pub seq: u64,
    pub payload: serde_json::Value,
    /// 毫秒时间戳
    pub timestamp: i64,
}

struct UserChannel {
    seq: u64,
    subscribers: Vec<mpsc::UnboundedSender<Event>>,
}

/// 事件广播器
#[derive(Default)]
pub struct EventBroadcaster {
    users: Mutex<HashMap<String, UserChannel>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅某用户的事件流
    pub fn subscribe(&self, user_id: &str) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut users = match self.users.lock() {
            Ok(u) => u,
            Err(poisoned) => poisoned.into_inner(),
        };
        let channel = users.entry(user_id.to_string()).or_insert(UserChannel {
            seq: 0,
            subscribers: Vec::new(),
        });
        channel.subscribers.push(tx);
        rx
    }

    /// 发布事件：锁内分配序号并投递，send 失败的订阅者被移除
    pub fn publish(&self, user_id: &str, topic: &str, payload: serde_json::Value) -> u64 {
        let mut users = match self.users.lock() {
            Ok(u) => u,
            Err(poisoned) => poisoned.into_inner(),
        };
        let channel = users.entry(user_id.to_string()).or_insert(UserChannel {
            seq: 0,
            subscribers: Vec::new(),
        });

        channel.seq += 1;
        let event = Event {
            user_id: user_id.to_string(),
            topic: topic.to_string(),
            seq: channel.seq,
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        channel
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());

        event.seq
    }

    /// 当前订阅者数量（测试与运维用）
    pub fn subscriber_count(&self, user_id: &str) -> usize {
        let users = match self.users.lock() {
            Ok(u) => u,
            Err(poisoned) => poisoned.into_inner(),
        };
        users.get(user_id).map(|c| c.subscribers.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_strictly_increasing() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe("u1");

        for _ in 0..5 {
            broadcaster.publish("u1", "progress", serde_json::json!({}));
        }

        let mut last = 0;
        for _ in 0..5 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.seq, last + 1);
            last = event.seq;
        }
    }

    #[tokio::test]
    async fn test_users_isolated() {
        let broadcaster = EventBroadcaster::new();
        let mut rx1 = broadcaster.subscribe("u1");
        let mut rx2 = broadcaster.subscribe("u2");

        broadcaster.publish("u1", "progress", serde_json::json!({"n": 1}));
        broadcaster.publish("u2", "progress", serde_json::json!({"n": 2}));

        assert_eq!(rx1.recv().await.unwrap().seq, 1);
        assert_eq!(rx2.recv().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_pruned() {
        let broadcaster = EventBroadcaster::new();
        let rx = broadcaster.subscribe("u1");
        drop(rx);

        broadcaster.publish("u1", "progress", serde_json::json!({}));
        assert_eq!(broadcaster.subscriber_count("u1"), 0);

        // 序号在订阅者断开后继续递增
        let seq = broadcaster.publish("u1", "progress", serde_json::json!({}));
        assert_eq!(seq, 2);
    }
}
