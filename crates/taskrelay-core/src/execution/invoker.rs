//! Turns a resolved handler into the raw value stream a tool call consumes.

use std::sync::Arc;

use futures::StreamExt;
use taskrelay_traits::{HandlerStream, ToolArgs, ToolValue, invoke_stream};
use tracing::debug;

use super::context::RunContext;
use super::resolver::ResolvedHandler;

/// Invoke `resolved` for the call described by `ctx`.
///
/// The stream always yields at least once: a handler that returns or yields
/// nothing produces a single `None`. A yielded [`MessageChain`] is parked on
/// the context for direct delivery and surfaces as `None`.
///
/// [`MessageChain`]: taskrelay_traits::MessageChain
pub fn invoke(ctx: Arc<RunContext>, resolved: &ResolvedHandler, args: ToolArgs) -> HandlerStream {
    let event = resolved
        .handler
        .accepts_event()
        .then(|| ctx.event().clone());
    debug!(method = %resolved.method, "Invoking tool handler");
    let mut inner = invoke_stream(resolved.handler.clone(), event, args);

    Box::pin(async_stream::try_stream! {
        let mut yielded = false;
        while let Some(item) = inner.next().await {
            yielded = true;
            match item? {
                Some(ToolValue::Message(chain)) => {
                    ctx.set_pending_result(chain);
                    yield None;
                }
                other => yield other,
            }
        }
        if !yielded {
            yield None;
        }
    })
}
