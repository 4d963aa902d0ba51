use super::ObjectStatus;
use crate::coding::{Decode, DecodeError, Encode, EncodeError};

/// Everything known about a single object, minus its payload.
///
/// `track_identifier` is a TrackAlias on subgroup streams and datagrams, and a
/// SubscribeID on fetch streams.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectHeader {
	pub track_identifier: u64,
	pub group: u64,
	pub subgroup: u64,
	pub id: u64,
	pub priority: u8,
	pub status: ObjectStatus,

	/// The payload length, when known up front.
	pub length: Option<u64>,
}

/// The prefix of a subgroup stream, written once after the stream type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubgroupHeader {
	pub track_alias: u64,
	pub group: u64,
	pub subgroup: u64,
	pub publisher_priority: u8,
}

impl Decode for SubgroupHeader {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			track_alias: u64::decode(r)?,
			group: u64::decode(r)?,
			subgroup: u64::decode(r)?,
			publisher_priority: u8::decode(r)?,
		})
	}
}

impl Encode for SubgroupHeader {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.track_alias.encode(w)?;
		self.group.encode(w)?;
		self.subgroup.encode(w)?;
		self.publisher_priority.encode(w)?;

		Ok(())
	}
}

/// The prefix of a fetch stream, written once after the stream type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchHeader {
	pub subscribe_id: u64,
}

impl Decode for FetchHeader {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			subscribe_id: u64::decode(r)?,
		})
	}
}

impl Encode for FetchHeader {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.subscribe_id.encode(w)
	}
}

/// The per-object prefix on a subgroup stream: `(id, length, status when empty)`.
///
/// A zero length with NORMAL status is a valid empty object; any other status
/// is only legal with a zero length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubgroupObject {
	pub id: u64,
	pub length: u64,
	pub status: ObjectStatus,
}

impl Decode for SubgroupObject {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let id = u64::decode(r)?;
		let length = u64::decode(r)?;

		let status = match length {
			0 => ObjectStatus::decode(r)?,
			_ => ObjectStatus::Normal,
		};

		Ok(Self { id, length, status })
	}
}

impl Encode for SubgroupObject {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.id.encode(w)?;
		self.length.encode(w)?;

		if self.length == 0 {
			self.status.encode(w)?;
		}

		Ok(())
	}
}

/// The per-object prefix on a fetch stream; fetch objects span groups, so the
/// location comes with every object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchObject {
	pub group: u64,
	pub subgroup: u64,
	pub id: u64,
	pub length: u64,
	pub status: ObjectStatus,
}

impl Decode for FetchObject {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let group = u64::decode(r)?;
		let subgroup = u64::decode(r)?;
		let id = u64::decode(r)?;
		let length = u64::decode(r)?;

		let status = match length {
			0 => ObjectStatus::decode(r)?,
			_ => ObjectStatus::Normal,
		};

		Ok(Self {
			group,
			subgroup,
			id,
			length,
			status,
		})
	}
}

impl Encode for FetchObject {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.group.encode(w)?;
		self.subgroup.encode(w)?;
		self.id.encode(w)?;
		self.length.encode(w)?;

		if self.length == 0 {
			self.status.encode(w)?;
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use bytes::BytesMut;

	#[test]
	fn subgroup_object_status() {
		let end = SubgroupObject {
			id: 9,
			length: 0,
			status: ObjectStatus::EndOfGroup,
		};

		let mut buf = BytesMut::new();
		end.encode(&mut buf).unwrap();
		assert_eq!(buf.to_vec(), vec![0x09, 0x00, 0x03]);

		let decoded = SubgroupObject::decode(&mut buf).unwrap();
		assert_eq!(decoded, end);
	}

	#[test]
	fn subgroup_object_payload() {
		let obj = SubgroupObject {
			id: 3,
			length: 3,
			status: ObjectStatus::Normal,
		};

		let mut buf = BytesMut::new();
		obj.encode(&mut buf).unwrap();

		// No status byte when a payload follows.
		assert_eq!(buf.to_vec(), vec![0x03, 0x03]);
	}
}
