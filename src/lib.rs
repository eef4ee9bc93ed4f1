//! Client library for a length-prefixed, request/response control protocol
//! multiplexed over a single long-lived Unix domain socket.
//!
//! The engine ([`Channel`]) is single-threaded and cooperative: it is driven
//! by repeated calls to [`Channel::poll`], and every callback (responses,
//! unsolicited events, loggers) runs synchronously on the calling thread,
//! inside that call.

pub mod codec;
pub mod error;
pub mod events;
#[macro_use]
mod macros;
pub mod parser;
pub mod queue;
pub mod request;
pub mod timing;

mod channel;

pub use channel::{Channel, ChannelBuilder, LogDirection, LoggerCallback};
pub use error::{ChannelError, Result};
pub use events::{Signal, SignalKind, SubscriptionId};
pub use queue::Queue;
pub use request::{Request, RequestStatus, RequestWriter, TIMEOUT_DEFAULT, TIMEOUT_NONE};
