//! A session engine for Media over QUIC (MoQ).
//!
//! One [Session] multiplexes many concurrent subscriptions and fetches over a
//! single WebTransport connection, correlating control messages with request
//! futures and routing data streams to application consumers. The transport
//! itself stays behind the [transport] traits; the session is generic over it.
//! The specification is a work in progress and will change.
//! See the [specification](https://datatracker.ietf.org/doc/draft-ietf-moq-transport/) for any updates.
pub mod coding;
pub mod data;
pub mod message;
pub mod setup;
pub mod transport;

mod consumer;
mod error;
mod session;
mod util;

pub use consumer::*;
pub use error::*;
pub use session::*;
