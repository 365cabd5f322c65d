//! Tool registry and invocation seam.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::Result;

use super::inference::ToolSchema;

/// Future returned by a tool invocation.
///
/// `'static` so the runner can detach it when the session is cancelled
/// mid-call instead of blocking on it.
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'static>>;

/// An external capability the model can call.
pub trait Tool: Send + Sync {
    /// Schema advertised to the model.
    fn schema(&self) -> ToolSchema;

    /// Invoke the tool with model-supplied arguments.
    fn invoke(&self, arguments: Value) -> ToolFuture;
}

/// Tool built from a closure.
struct FnTool<F> {
    schema: ToolSchema,
    handler: F,
}

impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    fn invoke(&self, arguments: Value) -> ToolFuture {
        Box::pin((self.handler)(arguments))
    }
}

/// Name-indexed set of tools available to a session.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tool` under its schema name, replacing any previous entry.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.schema().name;
        self.tools.insert(name, tool);
    }

    /// Register a closure as a tool.
    pub fn register_fn<F, Fut>(
        &mut self,
        name: &str,
        description: &str,
        parameters: Value,
        handler: F,
    ) where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(Arc::new(FnTool {
            schema: ToolSchema {
                name: name.to_owned(),
                description: description.to_owned(),
                parameters,
            },
            handler,
        }));
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Schemas of every registered tool, sorted by name.
    #[must_use]
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
