//! Checks call arguments against a handler's declared parameters.

use taskrelay_traits::{HandlerParam, ToolArgs, ToolHandler};
use tracing::debug;

use crate::error::{Result, ToolExecutionError};

#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterValidator;

impl ParameterValidator {
    pub fn new() -> Self {
        Self
    }

    /// Accept `args` if every key is declared and every required parameter is
    /// present. Handlers that declare nothing accept anything.
    pub fn validate(&self, handler: &dyn ToolHandler, args: &ToolArgs) -> Result<()> {
        let Some(params) = handler.parameters() else {
            return Ok(());
        };

        let unknown: Vec<&str> = args
            .keys()
            .filter(|key| !params.iter().any(|p| &p.name == *key))
            .map(String::as_str)
            .collect();
        let missing: Vec<&str> = params
            .iter()
            .filter(|p| p.is_required() && !args.contains_key(&p.name))
            .map(|p| p.name.as_str())
            .collect();

        if unknown.is_empty() && missing.is_empty() {
            return Ok(());
        }
        debug!(?unknown, ?missing, "Handler parameter mismatch");
        Err(ToolExecutionError::ParameterValidation(mismatch_message(
            &params,
        )))
    }
}

pub fn describe_parameters(params: &[HandlerParam]) -> String {
    if params.is_empty() {
        return "(no additional parameters)".to_string();
    }
    params
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn mismatch_message(params: &[HandlerParam]) -> String {
    format!(
        "Tool handler parameter mismatch, please check the handler definition. Handler parameters: {}",
        describe_parameters(params)
    )
}
