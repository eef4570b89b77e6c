// [libs/gateway/toolcall/src/orchestrator.rs]
//! Iterative model↔tool loop with safety limits (§4.H).

use crate::cache::{idempotency_key, IdempotencyCache};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum ConversationMessage {
    User(String),
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolResult {
        tool_call_id: String,
        content: serde_json::Value,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ModelTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

#[async_trait]
pub trait ModelCaller: Send + Sync {
    async fn invoke(&self, tenant: &str, messages: &[ConversationMessage]) -> Result<ModelTurn, String>;
}

/// A tool call's own validation failure is distinct from a transient
/// execution failure — only the latter counts toward
/// `max_consecutive_failures` (§4.H).
pub enum ToolOutcome {
    Success(serde_json::Value),
    ValidationError(String),
    ExecutionError(String),
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tenant: &str, tool_name: &str, arguments: &serde_json::Value) -> ToolOutcome;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("TOOL_CALL_MAX_ITERATIONS: exceeded {0} iterations")]
    MaxIterations(u32),
    #[error("TOOL_CALL_CONSECUTIVE_FAILURES: {0} consecutive tool failures")]
    ConsecutiveFailures(u32),
    #[error("TOOL_CALL_WALL_TIME_EXCEEDED: exceeded {0}ms")]
    WallTimeExceeded(u64),
    #[error("TOOL_CALL_VALIDATION_FAILED: {0}")]
    ValidationFailed(String),
    #[error("model invocation failed: {0}")]
    ModelError(String),
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_iterations: u32,
    pub max_consecutive_failures: u32,
    pub wall_time_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_consecutive_failures: 3,
            wall_time_ms: 120_000,
        }
    }
}

pub struct ToolCallOrchestrator<'a> {
    config: OrchestratorConfig,
    cache: &'a IdempotencyCache,
}

impl<'a> ToolCallOrchestrator<'a> {
    pub fn new(config: OrchestratorConfig, cache: &'a IdempotencyCache) -> Self {
        Self { config, cache }
    }

    pub async fn run(
        &self,
        tenant: &str,
        initial_message: String,
        model: &dyn ModelCaller,
        executor: &dyn ToolExecutor,
    ) -> Result<ModelTurn, ToolCallError> {
        let started = Instant::now();
        let wall_time_budget = Duration::from_millis(self.config.wall_time_ms);
        let mut messages = vec![ConversationMessage::User(initial_message)];
        let mut consecutive_failures = 0u32;

        for iteration in 1..=self.config.max_iterations {
            if started.elapsed() > wall_time_budget {
                return Err(ToolCallError::WallTimeExceeded(self.config.wall_time_ms));
            }

            let turn = model
                .invoke(tenant, &messages)
                .await
                .map_err(ToolCallError::ModelError)?;

            if turn.tool_calls.is_empty() {
                return Ok(turn);
            }

            messages.push(ConversationMessage::Assistant {
                content: turn.content.clone(),
                tool_calls: turn.tool_calls.clone(),
            });

            for call in &turn.tool_calls {
                if started.elapsed() > wall_time_budget {
                    return Err(ToolCallError::WallTimeExceeded(self.config.wall_time_ms));
                }

                let key = idempotency_key(tenant, &call.name, &call.arguments);
                if let Some(cached) = self.cache.get(&key) {
                    tracing::debug!(tool = %call.name, "tool call served from idempotency cache");
                    messages.push(ConversationMessage::ToolResult {
                        tool_call_id: call.id.clone(),
                        content: cached,
                    });
                    continue;
                }

                match executor.execute(tenant, &call.name, &call.arguments).await {
                    ToolOutcome::Success(result) => {
                        consecutive_failures = 0;
                        self.cache.set(key, result.clone());
                        messages.push(ConversationMessage::ToolResult {
                            tool_call_id: call.id.clone(),
                            content: result,
                        });
                    }
                    ToolOutcome::ValidationError(reason) => {
                        return Err(ToolCallError::ValidationFailed(reason));
                    }
                    ToolOutcome::ExecutionError(reason) => {
                        consecutive_failures += 1;
                        tracing::warn!(tool = %call.name, reason, consecutive_failures, "tool execution failed");
                        if consecutive_failures >= self.config.max_consecutive_failures {
                            return Err(ToolCallError::ConsecutiveFailures(consecutive_failures));
                        }
                        messages.push(ConversationMessage::ToolResult {
                            tool_call_id: call.id.clone(),
                            content: serde_json::json!({"error": reason}),
                        });
                    }
                }
            }

            if iteration == self.config.max_iterations {
                return Err(ToolCallError::MaxIterations(self.config.max_iterations));
            }
        }

        Err(ToolCallError::MaxIterations(self.config.max_iterations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    struct ScriptedModel {
        turns: Mutex<Vec<ModelTurn>>,
    }

    #[async_trait]
    impl ModelCaller for ScriptedModel {
        async fn invoke(&self, _tenant: &str, _messages: &[ConversationMessage]) -> Result<ModelTurn, String> {
            let mut turns = self.turns.lock().unwrap();
            if turns.is_empty() {
                return Ok(ModelTurn::default());
            }
            Ok(turns.remove(0))
        }
    }

    struct AlwaysSucceedsExecutor;

    #[async_trait]
    impl ToolExecutor for AlwaysSucceedsExecutor {
        async fn execute(&self, _tenant: &str, _tool_name: &str, _arguments: &serde_json::Value) -> ToolOutcome {
            ToolOutcome::Success(serde_json::json!({"ok": true}))
        }
    }

    struct AlwaysFailsExecutor;

    #[async_trait]
    impl ToolExecutor for AlwaysFailsExecutor {
        async fn execute(&self, _tenant: &str, _tool_name: &str, _arguments: &serde_json::Value) -> ToolOutcome {
            ToolOutcome::ExecutionError("boom".to_string())
        }
    }

    struct CountingExecutor {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ToolExecutor for CountingExecutor {
        async fn execute(&self, _tenant: &str, _tool_name: &str, _arguments: &serde_json::Value) -> ToolOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ToolOutcome::Success(serde_json::json!({"ok": true}))
        }
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest {
            id: format!("call_{name}"),
            name: name.to_string(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn returns_immediately_when_no_tool_calls() {
        let model = ScriptedModel {
            turns: Mutex::new(vec![ModelTurn {
                content: Some("hi".to_string()),
                tool_calls: vec![],
            }]),
        };
        let cache = IdempotencyCache::default();
        let orchestrator = ToolCallOrchestrator::new(OrchestratorConfig::default(), &cache);

        let result = orchestrator
            .run("tenant-1", "hello".to_string(), &model, &AlwaysSucceedsExecutor)
            .await
            .unwrap();
        assert_eq!(result.content, Some("hi".to_string()));
    }

    #[tokio::test]
    async fn caches_repeated_identical_tool_calls() {
        let model = ScriptedModel {
            turns: Mutex::new(vec![
                ModelTurn {
                    content: None,
                    tool_calls: vec![call("search", serde_json::json!({"q": "rust"}))],
                },
                ModelTurn {
                    content: None,
                    tool_calls: vec![call("search", serde_json::json!({"q": "rust"}))],
                },
                ModelTurn {
                    content: Some("done".to_string()),
                    tool_calls: vec![],
                },
            ]),
        };
        let cache = IdempotencyCache::default();
        let executor = CountingExecutor { calls: AtomicU32::new(0) };
        let orchestrator = ToolCallOrchestrator::new(OrchestratorConfig::default(), &cache);

        orchestrator.run("tenant-1", "find rust docs".to_string(), &model, &executor).await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn consecutive_failures_abort_the_loop() {
        let turns: Vec<ModelTurn> = (0..5)
            .map(|i| ModelTurn {
                content: None,
                tool_calls: vec![call("flaky", serde_json::json!({"i": i}))],
            })
            .collect();
        let model = ScriptedModel { turns: Mutex::new(turns) };
        let cache = IdempotencyCache::default();
        let orchestrator = ToolCallOrchestrator::new(
            OrchestratorConfig {
                max_consecutive_failures: 3,
                ..Default::default()
            },
            &cache,
        );

        let result = orchestrator.run("tenant-1", "go".to_string(), &model, &AlwaysFailsExecutor).await;
        assert_eq!(result, Err(ToolCallError::ConsecutiveFailures(3)));
    }

    #[tokio::test]
    async fn wall_time_budget_is_enforced() {
        struct SlowModel;
        #[async_trait]
        impl ModelCaller for SlowModel {
            async fn invoke(&self, _tenant: &str, _messages: &[ConversationMessage]) -> Result<ModelTurn, String> {
                tokio::time::sleep(StdDuration::from_millis(30)).await;
                Ok(ModelTurn {
                    content: None,
                    tool_calls: vec![call("search", serde_json::json!({"q": "x"}))],
                })
            }
        }

        let cache = IdempotencyCache::default();
        let orchestrator = ToolCallOrchestrator::new(
            OrchestratorConfig {
                wall_time_ms: 10,
                ..Default::default()
            },
            &cache,
        );

        let result = orchestrator.run("tenant-1", "go".to_string(), &SlowModel, &AlwaysSucceedsExecutor).await;
        assert_eq!(result, Err(ToolCallError::WallTimeExceeded(10)));
    }
}
