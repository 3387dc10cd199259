//! Caller-supplied tools and the registry that dispatches to them
//!
//! A [`Toolkit`] is fixed at construction. It never performs side effects of
//! its own; it looks a tool up by name, checks the model-produced arguments
//! against the tool's declared JSON schema and hands them to the tool.

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use jsonschema::JSONSchema;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::core_types::ProviderToolDefinition;
use crate::errors::LlmError;

#[derive(Debug, Clone, PartialEq)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolMetadata {
    pub fn to_definition(&self) -> ProviderToolDefinition {
        ProviderToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

// Core Tool trait that all tools must implement
#[async_trait]
pub trait Tool: Send + Sync {
    fn metadata(&self) -> ToolMetadata;
    async fn execute(&self, arguments: Value) -> Result<Value, LlmError>;
}

type ToolFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, LlmError>> + Send + Sync>;

/// Tool backed by a closure.
pub struct FnTool {
    metadata: ToolMetadata,
    func: ToolFn,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        func: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, LlmError>> + Send + 'static,
    {
        Self {
            metadata: ToolMetadata {
                name: name.into(),
                description: description.into(),
                parameters,
            },
            func: Arc::new(move |args| func(args).boxed()),
        }
    }

    /// Builds a tool from a synchronous closure.
    pub fn sync<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        func: F,
    ) -> Self
    where
        F: Fn(Value) -> Result<Value, LlmError> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        Self::new(name, description, parameters, move |args| {
            let func = func.clone();
            async move { func(args) }
        })
    }
}

#[async_trait]
impl Tool for FnTool {
    fn metadata(&self) -> ToolMetadata {
        self.metadata.clone()
    }

    async fn execute(&self, arguments: Value) -> Result<Value, LlmError> {
        (self.func)(arguments).await
    }
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    metadata: ToolMetadata,
    validator: Option<JSONSchema>,
}

/// Immutable registry of tools, in registration order.
pub struct Toolkit {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl Toolkit {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Result<Self, LlmError> {
        let mut registered = Vec::with_capacity(tools.len());
        let mut index = HashMap::new();

        for tool in tools {
            let metadata = tool.metadata();
            if index.contains_key(&metadata.name) {
                return Err(LlmError::Config(format!(
                    "Duplicate tool name '{}'",
                    metadata.name
                )));
            }

            let validator = if has_schema(&metadata.parameters) {
                let compiled = JSONSchema::compile(&metadata.parameters).map_err(|e| {
                    LlmError::Config(format!(
                        "Invalid parameter schema for tool '{}': {}",
                        metadata.name, e
                    ))
                })?;
                Some(compiled)
            } else {
                None
            };

            index.insert(metadata.name.clone(), registered.len());
            registered.push(RegisteredTool {
                tool,
                metadata,
                validator,
            });
        }

        Ok(Self {
            tools: registered,
            index,
        })
    }

    pub fn empty() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn metadata(&self) -> Vec<ToolMetadata> {
        self.tools.iter().map(|t| t.metadata.clone()).collect()
    }

    pub fn definitions(&self) -> Vec<ProviderToolDefinition> {
        self.tools.iter().map(|t| t.metadata.to_definition()).collect()
    }

    /// Invokes `name` with the raw argument string produced by the model.
    /// Empty arguments are treated as an empty object.
    pub async fn call(&self, name: &str, arguments: &str) -> Result<Value, LlmError> {
        let entry = self
            .index
            .get(name)
            .and_then(|i| self.tools.get(*i))
            .ok_or_else(|| LlmError::ToolNotFound(name.to_string()))?;

        let args: Value = if arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(arguments).map_err(|e| LlmError::ToolArguments {
                tool_name: name.to_string(),
                message: format!("arguments are not valid JSON: {}", e),
            })?
        };

        if let Some(validator) = &entry.validator {
            if let Err(errors) = validator.validate(&args) {
                let message = errors
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(LlmError::ToolArguments {
                    tool_name: name.to_string(),
                    message,
                });
            }
        }

        entry.tool.execute(args).await
    }
}

impl Default for Toolkit {
    fn default() -> Self {
        Self::empty()
    }
}

fn has_schema(parameters: &Value) -> bool {
    match parameters {
        Value::Object(map) => !map.is_empty(),
        _ => false,
    }
}
