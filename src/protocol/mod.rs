//! Wire protocol: AG-UI style events, SSE framing, inbound requests and the
//! client-side state mirror.

pub mod encoder;
pub mod events;
pub mod mirror;
pub mod request;

pub use encoder::{EventEncoder, StateTracker};
pub use events::{Envelope, Event, Role, RunContext, RunKind};
pub use mirror::StateMirror;
pub use request::{FeedbackPayload, RunAgentInput, RunRequest};
