//! Picks the entry point a tool call runs through.

use std::fmt;
use std::sync::Arc;

use taskrelay_traits::{FunctionTool, ToolHandler};

use crate::error::{Result, ToolExecutionError};

pub const NO_HANDLER_MESSAGE: &str = "Tool must have a valid handler or override 'run' method.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerMethod {
    /// A handler function attached to the tool.
    DecoratorHandler,
    /// The tool's own `call` entry point.
    Call,
    /// The legacy `run` entry point.
    Run,
}

impl HandlerMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecoratorHandler => "decorator_handler",
            Self::Call => "call",
            Self::Run => "run",
        }
    }
}

impl fmt::Display for HandlerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct ResolvedHandler {
    pub handler: Arc<dyn ToolHandler>,
    pub method: HandlerMethod,
}

impl fmt::Debug for ResolvedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedHandler")
            .field("method", &self.method)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MethodResolver;

impl MethodResolver {
    pub fn new() -> Self {
        Self
    }

    /// Attached handler first, then `call`, then `run`.
    pub fn resolve(&self, tool: &dyn FunctionTool) -> Result<ResolvedHandler> {
        let candidates = [
            (tool.handler(), HandlerMethod::DecoratorHandler),
            (tool.call(), HandlerMethod::Call),
            (tool.run(), HandlerMethod::Run),
        ];
        candidates
            .into_iter()
            .find_map(|(handler, method)| handler.map(|handler| ResolvedHandler { handler, method }))
            .ok_or_else(|| ToolExecutionError::MethodResolution {
                tool: tool.name().to_string(),
                message: NO_HANDLER_MESSAGE.to_string(),
            })
    }
}
