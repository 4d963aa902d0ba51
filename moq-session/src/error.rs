use thiserror::Error;

/// Why a publish or consume operation failed.
///
/// Each variant carries a human-readable reason.
#[derive(Error, Debug, Clone)]
pub enum PublishError {
	/// The caller violated the publisher/consumer contract: out-of-order
	/// object, double end, publish after done. The local stream is reset
	/// with INTERNAL_ERROR; the call is not retried.
	#[error("api error: {0}")]
	Api(String),

	/// The transport refused a new stream for flow control reasons; await
	/// stream credit and retry.
	#[error("blocked: {0}")]
	Blocked(String),

	/// A transport write failed; the underlying stream is unusable.
	#[error("write error: {0}")]
	Write(String),

	/// Peer stop-sending, local unsubscribe, or session close.
	#[error("cancelled: {0}")]
	Cancelled(String),
}

/// Whether a multi-chunk object still wants more payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PublishStatus {
	InProgress,
	Done,
}

/// Codes used when closing the whole session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CloseCode {
	NoError,
	InternalError,
	ProtocolViolation,
	TooManySubscribes,
}

impl From<CloseCode> for u32 {
	fn from(code: CloseCode) -> u32 {
		match code {
			CloseCode::NoError => 0x0,
			CloseCode::InternalError => 0x1,
			CloseCode::ProtocolViolation => 0x3,
			CloseCode::TooManySubscribes => 0x6,
		}
	}
}

/// Codes used when resetting or stopping a single data stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResetCode {
	InternalError,
	Cancelled,
	SessionClosed,

	/// A code we don't recognize, passed through from the transport.
	Unknown(u32),
}

impl From<ResetCode> for u32 {
	fn from(code: ResetCode) -> u32 {
		match code {
			ResetCode::InternalError => 0x0,
			ResetCode::Cancelled => 0x1,
			ResetCode::SessionClosed => 0x2,
			ResetCode::Unknown(code) => code,
		}
	}
}

impl From<u32> for ResetCode {
	fn from(code: u32) -> Self {
		match code {
			0x0 => Self::InternalError,
			0x1 => Self::Cancelled,
			0x2 => Self::SessionClosed,
			code => Self::Unknown(code),
		}
	}
}
