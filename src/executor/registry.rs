//! Handler lookup for the worker pool.
//!
//! Workers stay generic: a task names its handler under the `handler` key of
//! its options, and the registry resolves that name to an async closure.

use crate::grid::types::Invocation;

use anyhow::Result;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A registered handler, boxed so handlers with different futures share one map.
pub type TaskHandlerFn =
    Arc<dyn Fn(Invocation) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

pub struct TaskHandlerRegistry {
    handlers: DashMap<String, TaskHandlerFn>,
}

impl TaskHandlerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Installs `handler` under `handler_name`, replacing any earlier one.
    pub fn register<F, Fut>(&self, handler_name: &str, handler: F)
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler_fn: TaskHandlerFn = Arc::new(move |invocation: Invocation| {
            Box::pin(handler(invocation)) as Pin<Box<dyn Future<Output = Result<()>> + Send>>
        });

        if self
            .handlers
            .insert(handler_name.to_string(), handler_fn)
            .is_some()
        {
            tracing::warn!("Replaced task handler: {}", handler_name);
        } else {
            tracing::info!("Registered task handler: {}", handler_name);
        }
    }

    /// Runs the handler the invocation's options name.
    ///
    /// Fails without running anything when the options name no handler or an
    /// unregistered one.
    pub async fn execute(&self, invocation: Invocation) -> Result<()> {
        let handler_name = invocation
            .options
            .handler()
            .ok_or_else(|| anyhow::anyhow!("Task {} names no handler", invocation.task_id))?
            .to_string();

        // The map guard must not be held across the await.
        let handler_fn = self
            .handlers
            .get(&handler_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                tracing::error!("Task {} names unknown handler {}", invocation.task_id, handler_name);
                anyhow::anyhow!("Unknown task handler: {}", handler_name)
            })?;

        tracing::debug!(
            "Task {} -> '{}' ({} payload bytes, {} dependencies)",
            invocation.task_id,
            handler_name,
            invocation.payload.len(),
            invocation.dependencies.len()
        );

        handler_fn(invocation).await
    }

    pub fn list_handlers(&self) -> Vec<String> {
        self.handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn has_handler(&self, handler_name: &str) -> bool {
        self.handlers.contains_key(handler_name)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for TaskHandlerRegistry {
    fn default() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }
}
