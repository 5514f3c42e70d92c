//! The tool-calling conversation loop behind the todo assistant.
//!
//! A request starts from one user line. The model answers with JSON turns
//! (`plan`, `action` or `output`); every `action` is run against the
//! [`ToolRegistry`] and answered with an `observation` before the model is
//! asked again, until it produces an `output`.

pub mod conversation;
pub mod driver;
pub mod prompt;
pub mod registry;
pub mod reply;
pub mod turn;

pub use config::{PromptStyle, Scope as HistoryScope};
pub use conversation::{Conversation, LoopError, Observer};
pub use driver::{Driver, LineSource, is_exit};
pub use registry::{TOOL_FAILURE_OBSERVATION, TodoTool, ToolError, ToolRegistry, UNKNOWN_TOOL_OBSERVATION};
pub use reply::{MalformedReply, parse_reply};
pub use turn::{History, Turn};
