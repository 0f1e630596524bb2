//! Turn-scoped access to tools.
//!
//! A [`ToolHost`] hands one conversation turn its combined tool set and
//! releases worker connections according to the [`LifetimePolicy`] on every
//! exit path: normal return, error, panic, or the turn future being dropped.

use crate::config::{LifetimePolicy, McpConfig};
use crate::manager::ConnectionManager;
use crate::router::ToolRouter;
use crate::transport::{StdioLauncher, WorkerLauncher};
use relay_types::{RelayError, ToolCall, ToolDefinition, ToolResult};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Owns worker configuration and decides how long connections live.
pub struct ToolHost {
    config: McpConfig,
    launcher: Arc<dyn WorkerLauncher>,
    pool: Arc<ConnectionManager>,
    policy: LifetimePolicy,
}

/// What a turn gets to work with.
#[derive(Clone)]
pub struct TurnTools {
    router: ToolRouter,
    definitions: Vec<ToolDefinition>,
}

impl TurnTools {
    /// Every tool available this turn.
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub async fn call(&self, call: ToolCall) -> ToolResult {
        self.router.call_tool(call).await
    }

    pub async fn call_all(&self, calls: Vec<ToolCall>) -> Vec<ToolResult> {
        self.router.call_tools(calls).await
    }
}

/// Closes a turn-private manager when dropped without being released.
struct TurnGuard {
    manager: Option<Arc<ConnectionManager>>,
}

impl TurnGuard {
    async fn release(mut self) {
        if let Some(manager) = self.manager.take() {
            manager.close_all().await;
        }
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let Some(manager) = self.manager.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("Turn ended early; closing its workers in the background");
                handle.spawn(async move { manager.close_all().await });
            }
            // Children are killed when their handles drop
            Err(_) => drop(manager),
        }
    }
}

impl ToolHost {
    pub fn new(
        config: McpConfig,
        launcher: Arc<dyn WorkerLauncher>,
        policy: LifetimePolicy,
    ) -> Self {
        let pool = Arc::new(ConnectionManager::new(&config, Arc::clone(&launcher)));
        Self {
            config,
            launcher,
            pool,
            policy,
        }
    }

    /// Host that launches workers as stdio child processes.
    pub fn with_stdio(config: McpConfig, policy: LifetimePolicy) -> Self {
        Self::new(config, Arc::new(StdioLauncher), policy)
    }

    pub fn policy(&self) -> LifetimePolicy {
        self.policy
    }

    /// The shared manager used by pooled turns and lifecycle controls.
    pub fn pool(&self) -> &Arc<ConnectionManager> {
        &self.pool
    }

    /// Run one turn with the combined tool set.
    pub async fn turn<F, Fut, T>(&self, op: F) -> T
    where
        F: FnOnce(TurnTools) -> Fut,
        Fut: Future<Output = T>,
    {
        let manager = match self.policy {
            LifetimePolicy::Pooled => Arc::clone(&self.pool),
            LifetimePolicy::Ephemeral => Arc::new(ConnectionManager::new(
                &self.config,
                Arc::clone(&self.launcher),
            )),
        };
        let guard = TurnGuard {
            manager: (self.policy == LifetimePolicy::Ephemeral).then(|| Arc::clone(&manager)),
        };

        let router = ToolRouter::new(manager);
        let definitions = router.list_all_tools().await;
        let output = op(TurnTools {
            router,
            definitions,
        })
        .await;

        guard.release().await;
        output
    }

    /// Like [`turn`](Self::turn), but aborts when `cancel` fires.
    pub async fn turn_with_cancel<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, RelayError>
    where
        F: FnOnce(TurnTools) -> Fut,
        Fut: Future<Output = T>,
    {
        tokio::select! {
            _ = cancel.cancelled() => Err(RelayError::Cancelled),
            output = self.turn(op) => Ok(output),
        }
    }

    /// Close every pooled worker; they respawn on next use.
    pub async fn close_all(&self) {
        self.pool.close_all().await;
    }

    /// Close one pooled worker; it respawns on next use.
    pub async fn close(&self, name: &str) -> Result<(), RelayError> {
        self.pool
            .close(name)
            .await
            .map_err(|e| RelayError::Other(e.to_string()))
    }

    /// Final shutdown of the pool.
    pub async fn shutdown(&self) {
        self.close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLauncher, FakeWorker, calc_worker, fake_config, files_worker};
    use serde_json::json;
    use std::time::Duration;

    fn host(launcher: &FakeLauncher, policy: LifetimePolicy) -> ToolHost {
        ToolHost::new(
            fake_config(&["calc", "files"]),
            Arc::new(launcher.clone()),
            policy,
        )
    }

    fn two_workers() -> (FakeWorker, FakeWorker, FakeLauncher) {
        let calc = calc_worker();
        let files = files_worker();
        let launcher = FakeLauncher::new()
            .with_worker("calc", calc.clone())
            .with_worker("files", files.clone());
        (calc, files, launcher)
    }

    #[tokio::test]
    async fn end_to_end_turn() {
        let (_, _, launcher) = two_workers();
        let host = host(&launcher, LifetimePolicy::Pooled);

        let (sum, read) = host
            .turn(|tools| async move {
                let names: Vec<&str> = tools.definitions().iter().map(|d| d.name.as_str()).collect();
                assert_eq!(names, vec!["add", "divide", "read_file"]);

                let sum = tools
                    .call(ToolCall::new("add", json!({"numbers": [15, 27]})))
                    .await;
                let read = tools
                    .call(ToolCall::new("read_file", json!({"path": "missing.txt"})))
                    .await;
                (sum, read)
            })
            .await;

        assert!(sum.is_success());
        assert!(sum.to_content().contains("42"));
        assert!(!read.is_success());
        assert!(read.error().unwrap().contains("Failed to read file"));
        host.shutdown().await;
    }

    #[tokio::test]
    async fn call_all_keeps_request_order_across_workers() {
        let (calc, files, launcher) = two_workers();
        let host = host(&launcher, LifetimePolicy::Ephemeral);

        let results = host
            .turn(|tools| async move {
                tools
                    .call_all(vec![
                        ToolCall::with_id("c1", "read_file", json!({"path": "a.txt"})),
                        ToolCall::with_id("c2", "add", json!({"numbers": [40, 2]})),
                        ToolCall::with_id("c3", "nope", json!({})),
                    ])
                    .await
            })
            .await;

        let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert!(!results[0].is_success());
        assert_eq!(results[1].result(), Some(&json!("42")));
        assert!(!results[2].is_success());
        assert_eq!(calc.shutdowns(), 1);
        assert_eq!(files.shutdowns(), 1);
    }

    #[tokio::test]
    async fn pooled_turns_reuse_workers() {
        let (calc, _, launcher) = two_workers();
        let host = host(&launcher, LifetimePolicy::Pooled);

        for _ in 0..3 {
            host.turn(|tools| async move {
                tools
                    .call(ToolCall::new("add", json!({"numbers": [1]})))
                    .await
            })
            .await;
        }
        assert_eq!(launcher.launches("calc"), 1);
        assert_eq!(calc.shutdowns(), 0);

        host.shutdown().await;
        assert_eq!(calc.shutdowns(), 1);
    }

    #[tokio::test]
    async fn ephemeral_turns_close_their_workers() {
        let (calc, files, launcher) = two_workers();
        let host = host(&launcher, LifetimePolicy::Ephemeral);

        for _ in 0..2 {
            let result = host
                .turn(|tools| async move {
                    tools
                        .call(ToolCall::new("add", json!({"numbers": [1, 2]})))
                        .await
                })
                .await;
            assert!(result.is_success());
        }
        assert_eq!(launcher.launches("calc"), 2);
        assert_eq!(calc.shutdowns(), 2);
        assert_eq!(files.shutdowns(), 2);
        assert!(host.pool().live_workers().is_empty());
    }

    #[tokio::test]
    async fn ephemeral_turn_cleans_up_after_panic() {
        let (calc, _, launcher) = two_workers();
        let host = Arc::new(host(&launcher, LifetimePolicy::Ephemeral));

        let task = {
            let host = Arc::clone(&host);
            tokio::spawn(async move {
                host.turn(|_tools| async move {
                    panic!("orchestration bug");
                })
                .await
            })
        };
        assert!(task.await.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calc.shutdowns(), 1);
    }

    #[tokio::test]
    async fn cancelled_turn_is_reported_and_cleaned_up() {
        let (calc, _, launcher) = two_workers();
        let host = host(&launcher, LifetimePolicy::Ephemeral);
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };

        let outcome = host
            .turn_with_cancel(&cancel, |_tools| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
            })
            .await;
        assert!(matches!(outcome, Err(RelayError::Cancelled)));
        canceller.await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calc.shutdowns(), 1);
    }

    #[tokio::test]
    async fn turn_sees_only_workers_that_connected() {
        let launcher = FakeLauncher::new().with_worker("calc", calc_worker());
        let host = host(&launcher, LifetimePolicy::Pooled);

        let count = host
            .turn(|tools| async move { tools.definitions().len() })
            .await;
        assert_eq!(count, 2);
        assert!(host.close("nope").await.is_err());
        host.shutdown().await;
    }
}
