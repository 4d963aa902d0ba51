//! Objects as they appear on unidirectional streams and datagrams.
mod datagram;
mod decoder;
mod header;

pub use datagram::*;
pub use decoder::*;
pub use header::*;

use crate::coding::{Decode, DecodeError, Encode, EncodeError};

/// The varint prefix of every unidirectional stream and datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamType {
	ObjectDatagram,
	SubgroupHeader,
	FetchHeader,
}

impl Decode for StreamType {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		match u64::decode(r)? {
			0x1 => Ok(Self::ObjectDatagram),
			0x4 => Ok(Self::SubgroupHeader),
			0x5 => Ok(Self::FetchHeader),
			t => Err(DecodeError::InvalidStreamType(t)),
		}
	}
}

impl Encode for StreamType {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		let v: u64 = match self {
			Self::ObjectDatagram => 0x1,
			Self::SubgroupHeader => 0x4,
			Self::FetchHeader => 0x5,
		};
		v.encode(w)
	}
}

/// The status carried by an object in place of a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectStatus {
	Normal,
	ObjectNotExist,
	GroupNotExist,
	EndOfGroup,
	EndOfTrackAndGroup,
	EndOfSubgroup,
}

impl Decode for ObjectStatus {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		match u64::decode(r)? {
			0x0 => Ok(Self::Normal),
			0x1 => Ok(Self::ObjectNotExist),
			0x2 => Ok(Self::GroupNotExist),
			0x3 => Ok(Self::EndOfGroup),
			0x4 => Ok(Self::EndOfTrackAndGroup),
			0x5 => Ok(Self::EndOfSubgroup),
			s => Err(DecodeError::InvalidObjectStatus(s)),
		}
	}
}

impl Encode for ObjectStatus {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		let v: u64 = match self {
			Self::Normal => 0x0,
			Self::ObjectNotExist => 0x1,
			Self::GroupNotExist => 0x2,
			Self::EndOfGroup => 0x3,
			Self::EndOfTrackAndGroup => 0x4,
			Self::EndOfSubgroup => 0x5,
		};
		v.encode(w)
	}
}
