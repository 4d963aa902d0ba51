use crate::coding::{Decode, DecodeError, Encode, EncodeError, FullTrackName, Params, TrackNamespace};

use super::GroupOrder;

/// FETCH_ERROR codes.
pub mod fetch_error {
	pub const INTERNAL_ERROR: u64 = 0x0;
	pub const UNAUTHORIZED: u64 = 0x1;
	pub const TIMEOUT: u64 = 0x2;
	pub const NOT_SUPPORTED: u64 = 0x3;
	pub const TRACK_DOES_NOT_EXIST: u64 = 0x4;
	pub const INVALID_RANGE: u64 = 0x5;
}

/// A position within a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location {
	pub group: u64,
	pub object: u64,
}

impl Decode for Location {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			group: u64::decode(r)?,
			object: u64::decode(r)?,
		})
	}
}

impl Encode for Location {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.group.encode(w)?;
		self.object.encode(w)?;

		Ok(())
	}
}

/// Sent by the subscriber to retrieve a bounded range of objects.
#[derive(Clone, Debug)]
pub struct Fetch {
	pub subscribe_id: u64,
	pub full_track_name: FullTrackName,
	pub subscriber_priority: u8,
	pub group_order: GroupOrder,
	pub start: Location,
	pub end: Location,
	pub params: Params,
}

impl Decode for Fetch {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			subscribe_id: u64::decode(r)?,
			full_track_name: FullTrackName {
				namespace: TrackNamespace::decode(r)?,
				name: bytes::Bytes::decode(r)?,
			},
			subscriber_priority: u8::decode(r)?,
			group_order: GroupOrder::decode(r)?,
			start: Location::decode(r)?,
			end: Location::decode(r)?,
			params: Params::decode(r)?,
		})
	}
}

impl Encode for Fetch {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.subscribe_id.encode(w)?;
		self.full_track_name.namespace.encode(w)?;
		self.full_track_name.name.encode(w)?;
		self.subscriber_priority.encode(w)?;
		self.group_order.encode(w)?;
		self.start.encode(w)?;
		self.end.encode(w)?;
		self.params.encode(w)?;

		Ok(())
	}
}

/// Sent by the publisher to accept a [Fetch]; the data follows on a fetch stream.
#[derive(Clone, Debug)]
pub struct FetchOk {
	pub subscribe_id: u64,

	/// The definitive group order for the fetch stream.
	pub group_order: GroupOrder,

	/// Set when the fetch covers the end of the track.
	pub end_of_track: bool,

	/// The largest location the fetch will actually deliver.
	pub largest: Location,

	pub params: Params,
}

impl Decode for FetchOk {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			subscribe_id: u64::decode(r)?,
			group_order: GroupOrder::decode(r)?,
			end_of_track: match u8::decode(r)? {
				0 => false,
				1 => true,
				_ => return Err(DecodeError::InvalidValue),
			},
			largest: Location::decode(r)?,
			params: Params::decode(r)?,
		})
	}
}

impl Encode for FetchOk {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.subscribe_id.encode(w)?;
		self.group_order.encode(w)?;
		(self.end_of_track as u8).encode(w)?;
		self.largest.encode(w)?;
		self.params.encode(w)?;

		Ok(())
	}
}

/// Sent by the publisher to reject a [Fetch].
#[derive(Clone, Debug)]
pub struct FetchError {
	pub subscribe_id: u64,
	pub code: u64,
	pub reason: String,
}

impl Decode for FetchError {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			subscribe_id: u64::decode(r)?,
			code: u64::decode(r)?,
			reason: String::decode(r)?,
		})
	}
}

impl Encode for FetchError {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.subscribe_id.encode(w)?;
		self.code.encode(w)?;
		self.reason.encode(w)?;

		Ok(())
	}
}

/// Sent by the subscriber to abandon a pending or in-flight [Fetch].
#[derive(Clone, Debug)]
pub struct FetchCancel {
	pub subscribe_id: u64,
}

impl Decode for FetchCancel {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			subscribe_id: u64::decode(r)?,
		})
	}
}

impl Encode for FetchCancel {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.subscribe_id.encode(w)
	}
}
