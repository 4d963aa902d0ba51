//! The SETUP exchange, the first messages on the control stream.
mod client;
mod server;
mod version;

pub use client::*;
pub use server::*;
pub use version::*;

/// Setup parameter keys.
pub mod param {
	/// The highest subscribe ID (exclusive) the sender will accept.
	pub const MAX_SUBSCRIBE_ID: u64 = 0x2;
}
