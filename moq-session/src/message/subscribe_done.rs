use crate::coding::{Decode, DecodeError, Encode, EncodeError};

/// SUBSCRIBE_DONE status codes.
pub mod status {
	pub const INTERNAL_ERROR: u64 = 0x0;
	pub const UNAUTHORIZED: u64 = 0x1;
	pub const TRACK_ENDED: u64 = 0x2;
	pub const SUBSCRIPTION_ENDED: u64 = 0x3;
	pub const GOING_AWAY: u64 = 0x4;
	pub const EXPIRED: u64 = 0x5;
	pub const SESSION_CLOSED: u64 = 0x6;
}

/// Sent by the publisher when a subscription will receive no further objects.
#[derive(Clone, Debug)]
pub struct SubscribeDone {
	pub subscribe_id: u64,
	pub status_code: u64,
	pub reason: String,

	/// The last (group, object) delivered, if any.
	pub last: Option<(u64, u64)>,
}

impl Decode for SubscribeDone {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let subscribe_id = u64::decode(r)?;
		let status_code = u64::decode(r)?;
		let reason = String::decode(r)?;

		let last = match u8::decode(r)? {
			0 => None,
			1 => Some((u64::decode(r)?, u64::decode(r)?)),
			_ => return Err(DecodeError::InvalidValue),
		};

		Ok(Self {
			subscribe_id,
			status_code,
			reason,
			last,
		})
	}
}

impl Encode for SubscribeDone {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.subscribe_id.encode(w)?;
		self.status_code.encode(w)?;
		self.reason.encode(w)?;

		match self.last {
			None => 0u8.encode(w)?,
			Some((group, object)) => {
				1u8.encode(w)?;
				group.encode(w)?;
				object.encode(w)?;
			}
		}

		Ok(())
	}
}
