use std::string::FromUtf8Error;

use thiserror::Error;

pub trait Decode: Sized {
	fn decode<B: bytes::Buf>(buf: &mut B) -> Result<Self, DecodeError>;

	// Helper function to make sure we have enough bytes to decode
	fn decode_remaining<B: bytes::Buf>(buf: &mut B, required: usize) -> Result<(), DecodeError> {
		let needed = required.saturating_sub(buf.remaining());
		if needed > 0 {
			Err(DecodeError::More(needed))
		} else {
			Ok(())
		}
	}
}

/// A decode error.
#[derive(Error, Debug, Clone)]
pub enum DecodeError {
	#[error("fill buffer")]
	More(usize),

	#[error("invalid string")]
	InvalidString(#[from] FromUtf8Error),

	#[error("invalid message: {0}")]
	InvalidMessage(u64),

	#[error("invalid stream type: {0}")]
	InvalidStreamType(u64),

	#[error("invalid object status: {0}")]
	InvalidObjectStatus(u64),

	#[error("invalid group order: {0}")]
	InvalidGroupOrder(u64),

	#[error("invalid value")]
	InvalidValue,

	#[error("bounds exceeded")]
	BoundsExceeded(#[from] super::BoundsExceeded),

	#[error("expected end")]
	ExpectedEnd,

	#[error("unexpected end")]
	UnexpectedEnd,

	#[error("duplicate parameter")]
	DuplicateParameter,
}

impl Decode for u8 {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Self::decode_remaining(r, 1)?;
		Ok(r.get_u8())
	}
}

impl Decode for String {
	/// Decode a string with a varint length prefix.
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let size = usize::decode(r)?;
		Self::decode_remaining(r, size)?;

		let mut buf = vec![0; size];
		r.copy_to_slice(&mut buf);
		let str = String::from_utf8(buf)?;

		Ok(str)
	}
}

impl Decode for bytes::Bytes {
	/// Decode a byte field with a varint length prefix.
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let size = usize::decode(r)?;
		Self::decode_remaining(r, size)?;

		Ok(r.copy_to_bytes(size))
	}
}

impl Decode for Option<u64> {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(match u64::decode(r)? {
			0 => None,
			v => Some(v - 1),
		})
	}
}
