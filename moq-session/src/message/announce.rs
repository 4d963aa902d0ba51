use crate::coding::{Decode, DecodeError, Encode, EncodeError, Params, TrackNamespace};

/// Sent by a publisher to advertise a namespace.
#[derive(Clone, Debug)]
pub struct Announce {
	pub namespace: TrackNamespace,
	pub params: Params,
}

impl Decode for Announce {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			namespace: TrackNamespace::decode(r)?,
			params: Params::decode(r)?,
		})
	}
}

impl Encode for Announce {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.namespace.encode(w)?;
		self.params.encode(w)?;

		Ok(())
	}
}

/// Sent to accept an [Announce].
#[derive(Clone, Debug)]
pub struct AnnounceOk {
	pub namespace: TrackNamespace,
}

impl Decode for AnnounceOk {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			namespace: TrackNamespace::decode(r)?,
		})
	}
}

impl Encode for AnnounceOk {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.namespace.encode(w)
	}
}

/// Sent to reject an [Announce].
#[derive(Clone, Debug)]
pub struct AnnounceError {
	pub namespace: TrackNamespace,
	pub code: u64,
	pub reason: String,
}

impl Decode for AnnounceError {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			namespace: TrackNamespace::decode(r)?,
			code: u64::decode(r)?,
			reason: String::decode(r)?,
		})
	}
}

impl Encode for AnnounceError {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.namespace.encode(w)?;
		self.code.encode(w)?;
		self.reason.encode(w)?;

		Ok(())
	}
}

/// Sent by the publisher to withdraw a previous [Announce].
#[derive(Clone, Debug)]
pub struct Unannounce {
	pub namespace: TrackNamespace,
}

impl Decode for Unannounce {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			namespace: TrackNamespace::decode(r)?,
		})
	}
}

impl Encode for Unannounce {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.namespace.encode(w)
	}
}

/// Sent by the subscriber to revoke its acceptance of an [Announce].
#[derive(Clone, Debug)]
pub struct AnnounceCancel {
	pub namespace: TrackNamespace,
	pub code: u64,
	pub reason: String,
}

impl Decode for AnnounceCancel {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			namespace: TrackNamespace::decode(r)?,
			code: u64::decode(r)?,
			reason: String::decode(r)?,
		})
	}
}

impl Encode for AnnounceCancel {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.namespace.encode(w)?;
		self.code.encode(w)?;
		self.reason.encode(w)?;

		Ok(())
	}
}
