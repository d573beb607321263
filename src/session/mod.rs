//! Interactive-shell session protocol.
//!
//! This module turns a stream-oriented remote shell into a request/response
//! command interface. There is no message framing on the wire; command
//! completion is inferred from trailing prompt characters, with confirmation
//! prompts answered automatically along the way.

mod buffer;
mod completion;
mod shell;

pub use buffer::OutputBuffer;
pub use completion::{CommandClass, CompletionPredicate, settle_delay};
pub use shell::{Session, SessionState};
