//! Effect handlers: programs run against a [`Context`] whose handler stack
//! can record, replay or substitute sample sites.

pub mod handlers;
pub mod messenger;
pub mod trace;

pub use handlers::{
    replay, substitute, trace, Program, Replayed, SubstituteMessenger, Substituted, Traced,
};
pub use messenger::{Context, Message, Messenger, SharedMessenger};
pub use trace::{Node, Trace, TraceMessenger, TraceState};
