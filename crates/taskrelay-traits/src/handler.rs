//! Handler contract: the invocable unit of work behind a tool.
//!
//! A handler takes keyword arguments (a JSON object) and, if it wants one, the
//! triggering [`AgentEvent`]. It produces either one value or a stream of
//! incremental values; `None` items are allowed and carry no output.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::event::{AgentEvent, MessageChain};
use crate::tool::CallToolResult;

/// Keyword arguments passed to a handler, in call order.
pub type ToolArgs = Map<String, Value>;

/// Stream of raw values produced by one invocation.
pub type HandlerStream = BoxStream<'static, Result<Option<ToolValue>>>;

/// A raw value yielded by a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolValue {
    Text(String),
    Json(Value),
    /// Already structured; passed through untouched.
    CallResult(CallToolResult),
    /// Message meant for the user rather than the model.
    Message(MessageChain),
}

impl ToolValue {
    /// Plain-text rendering used for logs and task results.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Json(Value::String(text)) => text.clone(),
            Self::Json(value) => value.to_string(),
            Self::CallResult(result) => result.text(),
            Self::Message(chain) => chain.plain_text(),
        }
    }
}

impl From<String> for ToolValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for ToolValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Value> for ToolValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<CallToolResult> for ToolValue {
    fn from(value: CallToolResult) -> Self {
        Self::CallResult(value)
    }
}

impl From<MessageChain> for ToolValue {
    fn from(value: MessageChain) -> Self {
        Self::Message(value)
    }
}

/// What an invocation returned: a single value or a stream of them.
pub enum HandlerOutput {
    Value(Option<ToolValue>),
    Stream(HandlerStream),
}

impl HandlerOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Value(Some(ToolValue::Text(text.into())))
    }

    pub fn none() -> Self {
        Self::Value(None)
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: futures::Stream<Item = Result<Option<ToolValue>>> + Send + 'static,
    {
        Self::Stream(stream.boxed())
    }
}

impl fmt::Debug for HandlerOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// One declared keyword parameter of a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerParam {
    pub name: String,
    pub type_hint: Option<String>,
    /// `None` means the parameter is required.
    pub default: Option<Value>,
}

impl HandlerParam {
    pub fn required(name: impl Into<String>, type_hint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_hint: Some(type_hint.into()),
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, type_hint: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            type_hint: Some(type_hint.into()),
            default: Some(default),
        }
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

impl fmt::Display for HandlerParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(hint) = &self.type_hint {
            write!(f, ": {hint}")?;
        }
        if let Some(default) = &self.default {
            write!(f, " = {default}")?;
        }
        Ok(())
    }
}

/// An invocable unit of work.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Declared keyword parameters, or `None` to accept any arguments.
    fn parameters(&self) -> Option<Vec<HandlerParam>> {
        None
    }

    /// Whether the triggering event is passed to [`invoke`](Self::invoke).
    fn accepts_event(&self) -> bool {
        true
    }

    async fn invoke(&self, event: Option<Arc<AgentEvent>>, args: ToolArgs)
    -> Result<HandlerOutput>;
}

/// Flatten one invocation into a lazy stream of raw values.
///
/// Nothing runs until the stream is first polled; the invocation future and
/// every following item are awaited through the same `next()` calls.
pub fn invoke_stream(
    handler: Arc<dyn ToolHandler>,
    event: Option<Arc<AgentEvent>>,
    args: ToolArgs,
) -> HandlerStream {
    Box::pin(async_stream::try_stream! {
        match handler.invoke(event, args).await? {
            HandlerOutput::Value(value) => yield value,
            HandlerOutput::Stream(mut stream) => {
                while let Some(item) = stream.next().await {
                    yield item?;
                }
            }
        }
    })
}

/// Handler backed by an async closure.
pub struct FnHandler<F> {
    func: F,
    parameters: Option<Vec<HandlerParam>>,
    accepts_event: bool,
}

/// Wrap an async closure as a [`ToolHandler`].
pub fn handler_fn<F, Fut>(func: F) -> FnHandler<F>
where
    F: Fn(Option<Arc<AgentEvent>>, ToolArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerOutput>> + Send + 'static,
{
    FnHandler {
        func,
        parameters: None,
        accepts_event: true,
    }
}

impl<F> FnHandler<F> {
    pub fn with_parameters(mut self, parameters: Vec<HandlerParam>) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn without_event(mut self) -> Self {
        self.accepts_event = false;
        self
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Option<Arc<AgentEvent>>, ToolArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerOutput>> + Send + 'static,
{
    fn parameters(&self) -> Option<Vec<HandlerParam>> {
        self.parameters.clone()
    }

    fn accepts_event(&self) -> bool {
        self.accepts_event
    }

    async fn invoke(
        &self,
        event: Option<Arc<AgentEvent>>,
        args: ToolArgs,
    ) -> Result<HandlerOutput> {
        (self.func)(event, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use futures::TryStreamExt;

    #[test]
    fn test_param_display() {
        let required = HandlerParam::required("task_id", "str");
        let optional = HandlerParam::optional("lines", "int", Value::from(50));
        assert_eq!(required.to_string(), "task_id: str");
        assert_eq!(optional.to_string(), "lines: int = 50");
        assert!(required.is_required());
        assert!(!optional.is_required());
    }

    #[test]
    fn test_json_string_renders_without_quotes() {
        assert_eq!(ToolValue::Json(Value::from("plain")).to_text(), "plain");
        assert_eq!(
            ToolValue::Json(serde_json::json!({"a": 1})).to_text(),
            "{\"a\":1}"
        );
    }

    #[tokio::test]
    async fn test_invoke_stream_single_value() {
        let handler = Arc::new(handler_fn(|_event, _args| async {
            Ok(HandlerOutput::text("done"))
        }));
        let items: Vec<_> = invoke_stream(handler, None, ToolArgs::new())
            .try_collect()
            .await
            .expect("stream should succeed");
        assert_eq!(items, vec![Some(ToolValue::Text("done".into()))]);
    }

    #[tokio::test]
    async fn test_invoke_stream_flattens_inner_stream() {
        let handler = Arc::new(handler_fn(|_event, _args| async {
            Ok(HandlerOutput::stream(futures::stream::iter(vec![
                Ok(Some(ToolValue::from("a"))),
                Ok(None),
                Ok(Some(ToolValue::from("b"))),
            ])))
        }));
        let items: Vec<_> = invoke_stream(handler, None, ToolArgs::new())
            .try_collect()
            .await
            .expect("stream should succeed");
        assert_eq!(items.len(), 3);
        assert_eq!(items[2], Some(ToolValue::Text("b".into())));
    }

    #[tokio::test]
    async fn test_invoke_stream_propagates_error() {
        let handler = Arc::new(handler_fn(|_event, _args| async {
            Err(HandlerError::failed("RuntimeError", "nope"))
        }));
        let result: Result<Vec<_>> = invoke_stream(handler, None, ToolArgs::new())
            .try_collect()
            .await;
        assert_eq!(result.unwrap_err().kind(), "RuntimeError");
    }
}
