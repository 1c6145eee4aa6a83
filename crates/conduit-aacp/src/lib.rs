//! Agent-to-Agent Communication Protocol: the reliable, ordered,
//! at-least-once messaging core.

pub mod envelope;
pub mod ledger;
pub mod retry;
pub mod session;

pub use envelope::{decode, encode, DecodeError, Destination, Envelope, EnvelopeMetadata, MessageType};
pub use ledger::{AppendOutcome, Ledger, MessageRecord, RequestRecord, Status};
pub use retry::{RetryPolicy, Retransmitter};
pub use session::SessionManager;
