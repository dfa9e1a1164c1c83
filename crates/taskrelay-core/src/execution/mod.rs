//! Tool call execution
//!
//! [`ToolExecutor`] runs one call of a local tool: it resolves the entry
//! point, checks the arguments, bounds the call with the tool-call timeout and
//! on timeout hands the call over to a [`TimeoutHandler`]. The default
//! handler, [`BackgroundHandler`], restarts it as a background task.
//!
//! [`FunctionToolExecutor`] sits in front and routes local, remote and
//! handoff tools.

mod background_handler;
mod context;
mod dispatch;
mod executor;
mod invoker;
mod resolver;
mod result;
mod timeout;
mod validator;

pub use background_handler::{BackgroundHandler, TimeoutContext, TimeoutHandler, background_notice};
pub use context::RunContext;
pub use dispatch::{AgentTool, FunctionToolExecutor};
pub use executor::{ToolExecutor, ToolResultStream};
pub use invoker::invoke;
pub use resolver::{HandlerMethod, MethodResolver, NO_HANDLER_MESSAGE, ResolvedHandler};
pub use result::{DIRECT_RESULT_KIND, ResultProcessor};
pub use timeout::{TimeoutStrategy, should_enable_timeout};
pub use validator::{ParameterValidator, describe_parameters};
