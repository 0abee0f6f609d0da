//! 会话注册表实现
//!
//! busy 标志与 FIFO 等待队列在同一把锁下变更；引擎调用（open / close / read_state）
//! 都放在锁外，避免浏览器慢操作阻塞全表。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::automation::AutomationEngine;
use crate::error::ElchError;
use crate::session::{score_login, LoginStatus, SessionHandle, SessionKey};
use crate::storage::Storage;

struct SessionEntry {
    context: String,
    busy: bool,
    login_confidence: f32,
    last_used: Instant,
    epoch: u64,
    waiters: VecDeque<oneshot::Sender<SessionHandle>>,
    cancel: CancellationToken,
    credentials: serde_json::Value,
}

/// 会话注册表
pub struct SessionRegistry {
    engine: Arc<dyn AutomationEngine>,
    storage: Arc<dyn Storage>,
    entries: Mutex<HashMap<SessionKey, SessionEntry>>,
    idle_timeout: Duration,
    epoch_counter: std::sync::atomic::AtomicU64,
}

impl SessionRegistry {
    pub fn new(
        engine: Arc<dyn AutomationEngine>,
        storage: Arc<dyn Storage>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            storage,
            entries: Mutex::new(HashMap::new()),
            idle_timeout,
            epoch_counter: std::sync::atomic::AtomicU64::new(1),
        }
    }

    fn next_epoch(&self) -> u64 {
        self.epoch_counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// 获取会话：空闲则占用，占用时按 queue 排队或立即返回 SessionBusy，
    /// 不存在则新建（含凭据恢复与引擎 open）
    pub async fn acquire(
        &self,
        service: &str,
        profile: &str,
        queue: bool,
    ) -> Result<SessionHandle, ElchError> {
        let key = SessionKey::new(service, profile);

        let rx = {
            let mut entries = self.entries.lock().await;
            match entries.get_mut(&key) {
                Some(entry) if !entry.busy => {
                    entry.busy = true;
                    entry.last_used = Instant::now();
                    return Ok(SessionHandle {
                        key,
                        context: entry.context.clone(),
                        epoch: entry.epoch,
                        cancel: entry.cancel.clone(),
                    });
                }
                Some(entry) => {
                    if !queue {
                        return Err(ElchError::SessionBusy {
                            service: service.to_string(),
                            profile: profile.to_string(),
                        });
                    }
                    let (tx, rx) = oneshot::channel();
                    entry.waiters.push_back(tx);
                    rx
                }
                None => {
                    // 占位，其余请求在建会话期间视为 busy
                    let epoch = self.next_epoch();
                    entries.insert(
                        key.clone(),
                        SessionEntry {
                            context: String::new(),
                            busy: true,
                            login_confidence: 0.0,
                            last_used: Instant::now(),
                            epoch,
                            waiters: VecDeque::new(),
                            cancel: CancellationToken::new(),
                            credentials: serde_json::Value::Null,
                        },
                    );
                    drop(entries);
                    return self.create_session(key, epoch).await;
                }
            }
        };

        // FIFO 等待：发送端被丢弃说明会话被强制关闭
        rx.await.map_err(|_| ElchError::SessionTerminated {
            service: service.to_string(),
            profile: profile.to_string(),
        })
    }

    async fn create_session(
        &self,
        key: SessionKey,
        epoch: u64,
    ) -> Result<SessionHandle, ElchError> {
        let restored = match self.storage.get(&key.storage_key()).await {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!(error = %e, key = %key.storage_key(), "credential restore failed");
                None
            }
        };

        let opened = self.engine.open(&key.profile).await;

        let mut entries = self.entries.lock().await;
        let context = match opened {
            Ok(context) => context,
            Err(e) => {
                // 建会话失败：撤销占位，排进来的等待者收到 SessionTerminated
                entries.remove(&key);
                return Err(ElchError::Engine(format!("session open failed: {e}")));
            }
        };

        if let Some(entry) = entries.get_mut(&key) {
            entry.context = context.clone();
            if let Some(blob) = restored {
                entry.credentials = serde_json::from_str(&blob).unwrap_or(serde_json::Value::Null);
                tracing::info!(service = %key.service, profile = %key.profile, "restored session credentials");
            }
            Ok(SessionHandle {
                key: key.clone(),
                context,
                epoch,
                cancel: entry.cancel.clone(),
            })
        } else {
            // 占位在 open 期间被 cleanup 移除
            let _ = self.engine.close(&context).await;
            Err(ElchError::SessionTerminated {
                service: key.service,
                profile: key.profile,
            })
        }
    }

    /// 登录判定：读页面快照并按服务标记打分
    pub async fn check_login(&self, handle: &SessionHandle) -> Result<LoginStatus, ElchError> {
        let state = self
            .engine
            .read_state(&handle.context)
            .await
            .map_err(ElchError::ActionFailed)?;
        let status = score_login(&handle.key.service, &state);

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&handle.key) {
            entry.login_confidence = status.confidence;
        }
        Ok(status)
    }

    /// 释放会话：先持久化凭据快照，再交接给下一个等待者或置为空闲
    pub async fn release(&self, handle: SessionHandle) -> Result<(), ElchError> {
        // 凭据快照尽力而为，失败只记日志
        let credentials = match self.engine.read_state(&handle.context).await {
            Ok(state) => Some(state.credentials),
            Err(e) => {
                tracing::warn!(error = %e, "credential snapshot failed on release");
                None
            }
        };

        if let Some(ref creds) = credentials {
            if !creds.is_null() {
                let blob = creds.to_string();
                if let Err(e) = self.storage.put(&handle.key.storage_key(), &blob).await {
                    tracing::warn!(error = %e, "credential persist failed");
                }
            }
        }

        let mut entries = self.entries.lock().await;
        let entry = match entries.get_mut(&handle.key) {
            Some(entry) => entry,
            // 会话在持有期间被强制关闭
            None => return Ok(()),
        };

        entry.last_used = Instant::now();
        if let Some(creds) = credentials {
            if !creds.is_null() {
                entry.credentials = creds;
            }
        }

        // 交接：跳过已放弃等待的接收端
        while let Some(tx) = entry.waiters.pop_front() {
            let next = SessionHandle {
                key: handle.key.clone(),
                context: entry.context.clone(),
                epoch: entry.epoch,
                cancel: entry.cancel.clone(),
            };
            if tx.send(next).is_ok() {
                // busy 保持，直接移交
                return Ok(());
            }
        }

        entry.busy = false;
        Ok(())
    }

    /// 强制关闭匹配的会话（None 为通配）；无视 busy，持有者通过取消令牌观察到终止
    pub async fn cleanup(&self, service: Option<&str>, profile: Option<&str>) -> usize {
        let victims: Vec<(SessionKey, SessionEntry)> = {
            let mut entries = self.entries.lock().await;
            let keys: Vec<SessionKey> = entries
                .keys()
                .filter(|k| {
                    service.map(|s| k.service == s).unwrap_or(true)
                        && profile.map(|p| k.profile == p).unwrap_or(true)
                })
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|k| entries.remove(&k).map(|e| (k, e)))
                .collect()
        };

        let count = victims.len();
        for (key, entry) in victims {
            entry.cancel.cancel();
            // 丢弃 waiters 即向所有等待者宣告 SessionTerminated
            drop(entry.waiters);
            if !entry.context.is_empty() {
                if let Err(e) = self.engine.close(&entry.context).await {
                    tracing::warn!(error = %e, service = %key.service, "session close failed");
                }
            }
            tracing::info!(service = %key.service, profile = %key.profile, "session terminated");
        }
        count
    }

    /// 回收空闲超时的会话；busy 会话从不回收
    pub async fn sweep_idle(&self) -> usize {
        let victims: Vec<(SessionKey, SessionEntry)> = {
            let mut entries = self.entries.lock().await;
            let keys: Vec<SessionKey> = entries
                .iter()
                .filter(|(_, e)| !e.busy && e.last_used.elapsed() > self.idle_timeout)
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter()
                .filter_map(|k| entries.remove(&k).map(|e| (k, e)))
                .collect()
        };

        let count = victims.len();
        for (key, entry) in victims {
            entry.cancel.cancel();
            if let Err(e) = self.engine.close(&entry.context).await {
                tracing::warn!(error = %e, service = %key.service, "idle session close failed");
            }
            tracing::debug!(service = %key.service, profile = %key.profile, "idle session evicted");
        }
        count
    }

    /// 当前会话数
    pub async fn active_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// 启动后台清扫循环；shutdown 取消后退出
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = self.sweep_idle().await;
                        if evicted > 0 {
                            tracing::info!(evicted, "idle session sweep");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::MockEngine;
    use crate::storage::MemoryStorage;

    fn registry(engine: Arc<MockEngine>) -> SessionRegistry {
        SessionRegistry::new(
            engine,
            Arc::new(MemoryStorage::new()),
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_acquire_release_reuse() {
        let engine = Arc::new(MockEngine::new());
        let registry = registry(engine.clone());

        let h1 = registry.acquire("gmail", "p1", false).await.unwrap();
        let ctx1 = h1.context.clone();
        registry.release(h1).await.unwrap();

        let h2 = registry.acquire("gmail", "p1", false).await.unwrap();
        assert_eq!(h2.context, ctx1);
        // open 只发生一次
        let opens = engine.calls().iter().filter(|c| c.starts_with("open:")).count();
        assert_eq!(opens, 1);
    }

    #[tokio::test]
    async fn test_busy_without_queue() {
        let engine = Arc::new(MockEngine::new());
        let registry = registry(engine);

        let _h1 = registry.acquire("gmail", "p1", false).await.unwrap();
        let err = registry.acquire("gmail", "p1", false).await.unwrap_err();
        assert!(matches!(err, ElchError::SessionBusy { .. }));
    }

    #[tokio::test]
    async fn test_fifo_handoff() {
        let engine = Arc::new(MockEngine::new());
        let registry = Arc::new(registry(engine));

        let h1 = registry.acquire("gmail", "p1", false).await.unwrap();

        let registry2 = registry.clone();
        let waiter = tokio::spawn(async move { registry2.acquire("gmail", "p1", true).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.release(h1).await.unwrap();

        let h2 = waiter.await.unwrap().unwrap();
        assert_eq!(h2.key.service, "gmail");
        // 交接后会话仍是占用状态
        let err = registry.acquire("gmail", "p1", false).await.unwrap_err();
        assert!(matches!(err, ElchError::SessionBusy { .. }));
    }

    #[tokio::test]
    async fn test_cleanup_terminates_waiters() {
        let engine = Arc::new(MockEngine::new());
        let registry = Arc::new(registry(engine));

        let h1 = registry.acquire("gmail", "p1", false).await.unwrap();

        let registry2 = registry.clone();
        let waiter = tokio::spawn(async move { registry2.acquire("gmail", "p1", true).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let count = registry.cleanup(Some("gmail"), None).await;
        assert_eq!(count, 1);

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, ElchError::SessionTerminated { .. }));
        assert!(h1.terminated());
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_release_persists_credentials() {
        let engine = Arc::new(MockEngine::new());
        engine.set_default_state(MockEngine::state("https://mail.google.com", &["compose"]));
        let storage = Arc::new(MemoryStorage::new());
        let registry = SessionRegistry::new(engine, storage.clone(), Duration::from_secs(3600));

        let h = registry.acquire("gmail", "p1", false).await.unwrap();
        registry.release(h).await.unwrap();

        let blob = storage.get("session:gmail:p1").await.unwrap();
        assert!(blob.is_some());
    }

    #[tokio::test]
    async fn test_sweep_skips_busy() {
        let engine = Arc::new(MockEngine::new());
        let registry = SessionRegistry::new(
            engine,
            Arc::new(MemoryStorage::new()),
            Duration::from_millis(10),
        );

        let _busy = registry.acquire("gmail", "p1", false).await.unwrap();
        let idle = registry.acquire("skype", "p2", false).await.unwrap();
        registry.release(idle).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let evicted = registry.sweep_idle().await;
        assert_eq!(evicted, 1);
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_check_login() {
        let engine = Arc::new(MockEngine::new());
        engine.set_default_state(MockEngine::state(
            "https://mail.google.com/mail",
            &["compose", "inbox"],
        ));
        let registry = registry(engine);

        let h = registry.acquire("gmail", "p1", false).await.unwrap();
        let status = registry.check_login(&h).await.unwrap();
        assert!(status.logged_in);
    }
}
