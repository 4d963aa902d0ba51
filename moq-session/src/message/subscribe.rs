use crate::coding::{Decode, DecodeError, Encode, EncodeError, FullTrackName, Params, TrackNamespace};

/// Sent by the subscriber to request all future objects for the given track.
///
/// Objects will use the track alias instead of the full track name, to save bytes.
#[derive(Clone, Debug)]
pub struct Subscribe {
	pub subscribe_id: u64,
	pub track_alias: u64,
	pub full_track_name: FullTrackName,
	pub subscriber_priority: u8,
	pub group_order: GroupOrder,
	pub params: Params,
}

impl Decode for Subscribe {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			subscribe_id: u64::decode(r)?,
			track_alias: u64::decode(r)?,
			full_track_name: FullTrackName {
				namespace: TrackNamespace::decode(r)?,
				name: bytes::Bytes::decode(r)?,
			},
			subscriber_priority: u8::decode(r)?,
			group_order: GroupOrder::decode(r)?,
			params: Params::decode(r)?,
		})
	}
}

impl Encode for Subscribe {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.subscribe_id.encode(w)?;
		self.track_alias.encode(w)?;
		self.full_track_name.namespace.encode(w)?;
		self.full_track_name.name.encode(w)?;
		self.subscriber_priority.encode(w)?;
		self.group_order.encode(w)?;
		self.params.encode(w)?;

		Ok(())
	}
}

/// Sent by the publisher to accept a [Subscribe].
#[derive(Clone, Debug)]
pub struct SubscribeOk {
	pub subscribe_id: u64,

	/// Milliseconds until the subscription expires, or 0 for never.
	pub expires: u64,

	/// The definitive delivery order for the track's groups.
	pub group_order: GroupOrder,

	/// The largest (group, object) published so far, if any content exists.
	pub largest: Option<(u64, u64)>,

	pub params: Params,
}

impl Decode for SubscribeOk {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let subscribe_id = u64::decode(r)?;
		let expires = u64::decode(r)?;
		let group_order = GroupOrder::decode(r)?;

		let largest = match u8::decode(r)? {
			0 => None,
			1 => Some((u64::decode(r)?, u64::decode(r)?)),
			_ => return Err(DecodeError::InvalidValue),
		};

		Ok(Self {
			subscribe_id,
			expires,
			group_order,
			largest,
			params: Params::decode(r)?,
		})
	}
}

impl Encode for SubscribeOk {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.subscribe_id.encode(w)?;
		self.expires.encode(w)?;
		self.group_order.encode(w)?;

		match self.largest {
			None => 0u8.encode(w)?,
			Some((group, object)) => {
				1u8.encode(w)?;
				group.encode(w)?;
				object.encode(w)?;
			}
		}

		self.params.encode(w)?;

		Ok(())
	}
}

/// Sent by the publisher to reject a [Subscribe].
#[derive(Clone, Debug)]
pub struct SubscribeError {
	pub subscribe_id: u64,
	pub code: u64,
	pub reason: String,

	/// The alias the subscriber proposed, freed for reuse.
	pub track_alias: u64,
}

impl Decode for SubscribeError {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			subscribe_id: u64::decode(r)?,
			code: u64::decode(r)?,
			reason: String::decode(r)?,
			track_alias: u64::decode(r)?,
		})
	}
}

impl Encode for SubscribeError {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.subscribe_id.encode(w)?;
		self.code.encode(w)?;
		self.reason.encode(w)?;
		self.track_alias.encode(w)?;

		Ok(())
	}
}

/// Sent by the subscriber to adjust a live subscription.
#[derive(Clone, Debug)]
pub struct SubscribeUpdate {
	pub subscribe_id: u64,
	pub subscriber_priority: u8,
	pub params: Params,
}

impl Decode for SubscribeUpdate {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			subscribe_id: u64::decode(r)?,
			subscriber_priority: u8::decode(r)?,
			params: Params::decode(r)?,
		})
	}
}

impl Encode for SubscribeUpdate {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.subscribe_id.encode(w)?;
		self.subscriber_priority.encode(w)?;
		self.params.encode(w)?;

		Ok(())
	}
}

/// Sent by the subscriber to terminate a subscription.
///
/// The publisher still replies with SUBSCRIBE_DONE.
#[derive(Clone, Debug)]
pub struct Unsubscribe {
	pub subscribe_id: u64,
}

impl Decode for Unsubscribe {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			subscribe_id: u64::decode(r)?,
		})
	}
}

impl Encode for Unsubscribe {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.subscribe_id.encode(w)
	}
}

/// The delivery order for groups within a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupOrder {
	/// Use the publisher's preference (only meaningful in requests).
	Publisher,
	OldestFirst,
	NewestFirst,
}

impl Decode for GroupOrder {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		match u8::decode(r)? {
			0x0 => Ok(Self::Publisher),
			0x1 => Ok(Self::OldestFirst),
			0x2 => Ok(Self::NewestFirst),
			o => Err(DecodeError::InvalidGroupOrder(o as u64)),
		}
	}
}

impl Encode for GroupOrder {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		let v: u8 = match self {
			Self::Publisher => 0x0,
			Self::OldestFirst => 0x1,
			Self::NewestFirst => 0x2,
		};
		v.encode(w)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::coding::TrackNamespace;
	use bytes::BytesMut;

	#[test]
	fn subscribe_coding() {
		let msg = Subscribe {
			subscribe_id: 0,
			track_alias: 0,
			full_track_name: FullTrackName::new(TrackNamespace::new(["a"]), "t"),
			subscriber_priority: 128,
			group_order: GroupOrder::Publisher,
			params: Params::new(),
		};

		let mut buf = BytesMut::new();
		msg.encode(&mut buf).unwrap();
		assert_eq!(buf.to_vec(), vec![0x00, 0x00, 0x01, 0x01, b'a', 0x01, b't', 0x80, 0x00, 0x00]);

		let decoded = Subscribe::decode(&mut buf).unwrap();
		assert_eq!(decoded.full_track_name, msg.full_track_name);
		assert_eq!(decoded.subscriber_priority, 128);
	}

	#[test]
	fn subscribe_ok_largest() {
		let msg = SubscribeOk {
			subscribe_id: 3,
			expires: 0,
			group_order: GroupOrder::OldestFirst,
			largest: Some((7, 9)),
			params: Params::new(),
		};

		let mut buf = BytesMut::new();
		msg.encode(&mut buf).unwrap();

		let decoded = SubscribeOk::decode(&mut buf).unwrap();
		assert_eq!(decoded.largest, Some((7, 9)));
		assert_eq!(decoded.group_order, GroupOrder::OldestFirst);
	}
}
