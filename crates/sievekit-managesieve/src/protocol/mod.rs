//! Sans-I/O pieces of the ManageSieve protocol: response parsing,
//! capability handling and the session state machine.

mod response;
mod state;

pub use response::{Capabilities, Completion, ResponseCode, ResponseStatus, ScriptEntry};
pub use state::SessionState;

pub(crate) use response::{literal_marker, parse_completion, unquote};
