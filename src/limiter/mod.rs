//! 限流器
//!
//! 按 (用户, 类别) 维护滑动窗口：每次 admit 先淘汰窗口外的时间戳再计数，
//! 未超配额则记录本次并放行。general 与 task 两个类别配额互相独立，不可借用。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// 请求类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    General,
    Task,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Task => "task",
        }
    }
}

/// 单类别配额：窗口内最多 max_requests 次
#[derive(Debug, Clone, Copy)]
pub struct CategoryLimit {
    pub max_requests: usize,
    pub window: Duration,
}

/// 滑动窗口限流器
pub struct RateLimiter {
    general: CategoryLimit,
    task: CategoryLimit,
    windows: Mutex<HashMap<(String, Category), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(general: CategoryLimit, task: CategoryLimit) -> Self {
        Self {
            general,
            task,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn limit(&self, category: Category) -> CategoryLimit {
        match category {
            Category::General => self.general,
            Category::Task => self.task,
        }
    }

    /// 检查并记录：窗口内未满返回 true 并计入本次，已满返回 false 不计入
    pub fn admit(&self, user_id: &str, category: Category) -> bool {
        let limit = self.limit(category);
        let now = Instant::now();
        let mut windows = match self.windows.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window = windows
            .entry((user_id.to_string(), category))
            .or_default();

        while let Some(front) = window.front() {
            if now.duration_since(*front) > limit.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < limit.max_requests {
            window.push_back(now);
            true
        } else {
            tracing::warn!(user = %user_id, category = %category.as_str(), "rate limited");
            false
        }
    }

    /// 剩余配额（淘汰窗口外记录后计算）
    pub fn remaining(&self, user_id: &str, category: Category) -> usize {
        let limit = self.limit(category);
        let now = Instant::now();
        let mut windows = match self.windows.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window = windows
            .entry((user_id.to_string(), category))
            .or_default();

        while let Some(front) = window.front() {
            if now.duration_since(*front) > limit.window {
                window.pop_front();
            } else {
                break;
            }
        }

        limit.max_requests.saturating_sub(window.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: usize, window_ms: u64) -> RateLimiter {
        let limit = CategoryLimit {
            max_requests: max,
            window: Duration::from_millis(window_ms),
        };
        RateLimiter::new(limit, limit)
    }

    #[test]
    fn test_quota_exhaustion() {
        let limiter = limiter(3, 60_000);
        assert!(limiter.admit("u1", Category::General));
        assert!(limiter.admit("u1", Category::General));
        assert!(limiter.admit("u1", Category::General));
        assert!(!limiter.admit("u1", Category::General));
        assert_eq!(limiter.remaining("u1", Category::General), 0);
    }

    #[test]
    fn test_categories_independent() {
        let limiter = limiter(1, 60_000);
        assert!(limiter.admit("u1", Category::General));
        assert!(!limiter.admit("u1", Category::General));
        assert!(limiter.admit("u1", Category::Task));
    }

    #[test]
    fn test_users_independent() {
        let limiter = limiter(1, 60_000);
        assert!(limiter.admit("u1", Category::Task));
        assert!(!limiter.admit("u1", Category::Task));
        assert!(limiter.admit("u2", Category::Task));
    }

    #[tokio::test]
    async fn test_window_expiry() {
        let limiter = limiter(1, 50);
        assert!(limiter.admit("u1", Category::General));
        assert!(!limiter.admit("u1", Category::General));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.admit("u1", Category::General));
    }
}
