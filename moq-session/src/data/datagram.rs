use bytes::{Buf, Bytes};

use super::{ObjectHeader, ObjectStatus, StreamType};
use crate::coding::{Decode, DecodeError, Encode, EncodeError};

/// A single object delivered outside any stream.
#[derive(Clone, Debug)]
pub struct Datagram {
	pub header: ObjectHeader,
	pub payload: Bytes,
}

impl Datagram {
	/// Parse a datagram, validating the tag and that the payload length
	/// matches the header exactly.
	pub fn parse<B: Buf>(mut buf: B) -> Result<Self, DecodeError> {
		let t = StreamType::decode(&mut buf)?;
		if t != StreamType::ObjectDatagram {
			return Err(DecodeError::InvalidStreamType(0));
		}

		let track_identifier = u64::decode(&mut buf)?;
		let group = u64::decode(&mut buf)?;
		let subgroup = u64::decode(&mut buf)?;
		let id = u64::decode(&mut buf)?;
		let priority = u8::decode(&mut buf)?;
		let status = ObjectStatus::decode(&mut buf)?;
		let length = u64::decode(&mut buf)?;

		if buf.remaining() as u64 != length {
			return Err(DecodeError::InvalidValue);
		}

		let payload = buf.copy_to_bytes(length as usize);

		Ok(Self {
			header: ObjectHeader {
				track_identifier,
				group,
				subgroup,
				id,
				priority,
				status,
				length: Some(length),
			},
			payload,
		})
	}
}

impl Encode for Datagram {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		StreamType::ObjectDatagram.encode(w)?;
		self.header.track_identifier.encode(w)?;
		self.header.group.encode(w)?;
		self.header.subgroup.encode(w)?;
		self.header.id.encode(w)?;
		self.header.priority.encode(w)?;
		self.header.status.encode(w)?;
		(self.payload.len() as u64).encode(w)?;
		w.put_slice(&self.payload);

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use bytes::BytesMut;

	fn datagram() -> Datagram {
		Datagram {
			header: ObjectHeader {
				track_identifier: 4,
				group: 7,
				subgroup: 2,
				id: 2,
				priority: 128,
				status: ObjectStatus::Normal,
				length: Some(3),
			},
			payload: Bytes::from_static(b"abc"),
		}
	}

	#[test]
	fn roundtrip() {
		let mut buf = BytesMut::new();
		datagram().encode(&mut buf).unwrap();

		let parsed = Datagram::parse(buf).unwrap();
		assert_eq!(parsed.header, datagram().header);
		assert_eq!(parsed.payload, datagram().payload);
	}

	#[test]
	fn length_mismatch() {
		let mut buf = BytesMut::new();
		datagram().encode(&mut buf).unwrap();
		buf.extend_from_slice(b"extra");

		assert!(Datagram::parse(buf).is_err());
	}

	#[test]
	fn bad_tag() {
		let mut buf = BytesMut::new();
		StreamType::SubgroupHeader.encode(&mut buf).unwrap();

		assert!(Datagram::parse(buf).is_err());
	}
}
