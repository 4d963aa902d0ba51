use crate::coding::{Decode, DecodeError, Encode, EncodeError, FullTrackName, TrackNamespace};

/// Sent to query the status of a track without subscribing.
#[derive(Clone, Debug)]
pub struct TrackStatusRequest {
	pub full_track_name: FullTrackName,
}

impl Decode for TrackStatusRequest {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			full_track_name: FullTrackName {
				namespace: TrackNamespace::decode(r)?,
				name: bytes::Bytes::decode(r)?,
			},
		})
	}
}

impl Encode for TrackStatusRequest {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.full_track_name.namespace.encode(w)?;
		self.full_track_name.name.encode(w)?;

		Ok(())
	}
}

/// The answer to a [TrackStatusRequest].
#[derive(Clone, Debug)]
pub struct TrackStatus {
	pub full_track_name: FullTrackName,
	pub status_code: u64,
	pub last_group: u64,
	pub last_object: u64,
}

impl Decode for TrackStatus {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			full_track_name: FullTrackName {
				namespace: TrackNamespace::decode(r)?,
				name: bytes::Bytes::decode(r)?,
			},
			status_code: u64::decode(r)?,
			last_group: u64::decode(r)?,
			last_object: u64::decode(r)?,
		})
	}
}

impl Encode for TrackStatus {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.full_track_name.namespace.encode(w)?;
		self.full_track_name.name.encode(w)?;
		self.status_code.encode(w)?;
		self.last_group.encode(w)?;
		self.last_object.encode(w)?;

		Ok(())
	}
}
