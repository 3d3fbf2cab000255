// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Named asynchronous tasks and fire-and-forget dispatch.
//!
//! Handlers are registered by name on a mutable [`TaskRegistry`] at startup,
//! after which the registry is shared read-only (usually in an `Arc`).
//! Positional arguments arrive as a JSON array and are deserialized straight
//! into the handler's argument type, so `[10]` becomes `(10u32,)`.
//!
//! [`TaskRegistry::dispatch`] never blocks and never fails the caller: an
//! unknown name is logged, and argument errors, task errors and panics are
//! contained in the task's own supervised execution unit.

mod builtin;

pub use builtin::{CalcFib, builtin_registry, fib};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::supervise::spawn_supervised;

/// Task invocation errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// No handler is registered under the name.
    #[error("task '{0}' not found")]
    UnknownTask(String),

    /// The stored arguments do not match the handler's parameters.
    #[error("invalid arguments for task '{task}': {source}")]
    InvalidArguments {
        /// Task name.
        task: String,
        /// Deserialization failure.
        #[source]
        source: serde_json::Error,
    },

    /// The task ran and failed.
    #[error("task failed: {0}")]
    Failed(String),
}

/// A named task with strongly-typed arguments.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Registry name.
    const NAME: &'static str;

    /// Positional arguments, deserialized from a JSON array.
    type Args: DeserializeOwned + Send + 'static;

    /// Execute the task.
    async fn run(&self, args: Self::Args) -> Result<(), TaskError>;
}

type TaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send>>;
type Handler = Arc<dyn Fn(Value) -> TaskFuture + Send + Sync>;

fn decode<A: DeserializeOwned>(task: &str, args: Value) -> Result<A, TaskError> {
    serde_json::from_value(args).map_err(|source| TaskError::InvalidArguments {
        task: task.to_string(),
        source,
    })
}

/// Name-indexed task handlers.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Handler>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a [`Task`] under its `NAME`.
    pub fn register<T: Task>(&mut self, task: T) -> &mut Self {
        let task = Arc::new(task);
        let handler: Handler = Arc::new(move |args: Value| {
            let task = task.clone();
            Box::pin(async move {
                let args = decode::<T::Args>(T::NAME, args)?;
                task.run(args).await
            }) as TaskFuture
        });
        self.insert(T::NAME, handler);
        self
    }

    /// Register a closure under `name`.
    pub fn register_fn<A, F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let f = Arc::new(f);
        let task_name = name.to_string();
        let handler: Handler = Arc::new(move |args: Value| {
            let f = f.clone();
            let task_name = task_name.clone();
            Box::pin(async move {
                let args = decode::<A>(&task_name, args)?;
                f(args).await
            }) as TaskFuture
        });
        self.insert(name, handler);
        self
    }

    fn insert(&mut self, name: &str, handler: Handler) {
        if self.handlers.insert(name.to_string(), handler).is_some() {
            warn!(task = %name, "Task handler replaced");
        }
    }

    /// Whether a handler exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run `name` with `args` and wait for the outcome.
    pub async fn invoke(&self, name: &str, args: Vec<Value>) -> Result<(), TaskError> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| TaskError::UnknownTask(name.to_string()))?;
        handler(Value::Array(args)).await
    }

    /// Start `name` with `args` on its own supervised task.
    ///
    /// Returns `None` without spawning when `name` is unknown. The handle can
    /// be dropped; it never yields an error.
    pub fn dispatch(&self, name: &str, args: Vec<Value>) -> Option<JoinHandle<()>> {
        let Some(handler) = self.handlers.get(name) else {
            error!(task = %name, "Task handler not found");
            return None;
        };

        let fut = handler(Value::Array(args));
        let task_name = name.to_string();
        Some(spawn_supervised(format!("task:{}", name), async move {
            match fut.await {
                Ok(()) => debug!(task = %task_name, "Task completed"),
                Err(e) => error!(task = %task_name, error = %e, "Task failed"),
            }
        }))
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Add {
        total: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Task for Add {
        const NAME: &'static str = "Add";
        type Args = (u64, u64);

        async fn run(&self, args: Self::Args) -> Result<(), TaskError> {
            let (a, b) = args;
            self.total.fetch_add(a + b, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_typed_task_receives_tuple_args() {
        let total = Arc::new(AtomicU64::new(0));
        let mut registry = TaskRegistry::new();
        registry.register(Add {
            total: total.clone(),
        });

        registry
            .invoke("Add", vec![json!(2), json!(3)])
            .await
            .unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_invoke_reports_bad_arguments() {
        let mut registry = TaskRegistry::new();
        registry.register(Add {
            total: Arc::new(AtomicU64::new(0)),
        });

        let err = registry
            .invoke("Add", vec![json!("two")])
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidArguments { ref task, .. } if task == "Add"));
    }

    #[tokio::test]
    async fn test_invoke_unknown_task() {
        let registry = TaskRegistry::new();
        assert!(matches!(
            registry.invoke("Missing", vec![]).await,
            Err(TaskError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn test_register_fn_and_names() {
        let mut registry = TaskRegistry::new();
        registry
            .register_fn("Echo", |(_msg,): (String,)| async { Ok::<(), TaskError>(()) })
            .register_fn("Noop", |_: Vec<Value>| async { Ok::<(), TaskError>(()) });

        assert_eq!(registry.names(), vec!["Echo".to_string(), "Noop".to_string()]);
        assert!(registry.contains("Echo"));
        assert_eq!(registry.len(), 2);
        registry.invoke("Echo", vec![json!("hi")]).await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_unknown_returns_none() {
        let registry = TaskRegistry::new();
        assert!(registry.dispatch("Missing", vec![]).is_none());
    }

    #[tokio::test]
    async fn test_dispatch_contains_panic_and_errors() {
        let mut registry = TaskRegistry::new();
        registry
            .register_fn("Panics", |(n,): (u32,)| async move {
                if n > 0 {
                    panic!("task exploded");
                }
                Ok::<(), TaskError>(())
            })
            .register_fn("Fails", |_: Vec<Value>| async {
                Err::<(), TaskError>(TaskError::Failed("nope".to_string()))
            });

        registry.dispatch("Panics", vec![json!(1)]).unwrap().await.unwrap();
        registry.dispatch("Fails", vec![]).unwrap().await.unwrap();
    }
}
