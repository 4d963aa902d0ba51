use thiserror::Error;

use crate::coding::{DecodeError, EncodeError, TrackNamespace};
use crate::setup::Versions;
use crate::transport::TransportError;
use crate::CloseCode;

/// A list of possible errors that can occur during the session.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
	#[error("transport error: {0}")]
	Transport(#[from] TransportError),

	#[error("encode error: {0}")]
	Encode(#[from] EncodeError),

	#[error("decode error: {0}")]
	Decode(#[from] DecodeError),

	#[error("unsupported versions: offered={0:?} supported={1:?}")]
	Version(Versions, Versions),

	#[error("setup timed out")]
	SetupTimeout,

	#[error("protocol violation: {0}")]
	ProtocolViolation(String),

	/// The peer used a subscribe ID at or above the advertised bound.
	#[error("too many subscribes: id={0}")]
	TooManySubscribes(u64),

	#[error("duplicate subscribe id: {0}")]
	Duplicate(u64),

	#[error("unknown subscribe id: {0}")]
	UnknownSubscribeId(u64),

	#[error("unknown track alias: {0}")]
	UnknownTrackAlias(u64),

	#[error("unknown namespace: {0:?}")]
	UnknownNamespace(TrackNamespace),

	/// A subscribe reply to a fetch ID, or vice versa.
	#[error("wrong request kind for id: {0}")]
	WrongKind(u64),

	#[error("publish error: {0}")]
	Publish(#[from] crate::PublishError),

	#[error("session closed")]
	Closed,
}

impl SessionError {
	/// The code used when this error closes the session.
	pub fn close_code(&self) -> CloseCode {
		match self {
			Self::Decode(_) => CloseCode::ProtocolViolation,
			Self::Version(..) => CloseCode::ProtocolViolation,
			Self::ProtocolViolation(_) => CloseCode::ProtocolViolation,
			Self::TooManySubscribes(_) => CloseCode::TooManySubscribes,
			Self::Duplicate(_) => CloseCode::ProtocolViolation,
			Self::Closed => CloseCode::NoError,
			_ => CloseCode::InternalError,
		}
	}
}
