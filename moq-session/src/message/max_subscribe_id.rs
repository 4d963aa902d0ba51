use crate::coding::{Decode, DecodeError, Encode, EncodeError};

/// Raises the exclusive upper bound on the peer's subscribe IDs.
///
/// The value must be strictly greater than any previously sent by the same side.
#[derive(Clone, Debug)]
pub struct MaxSubscribeId {
	pub subscribe_id: u64,
}

impl Decode for MaxSubscribeId {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			subscribe_id: u64::decode(r)?,
		})
	}
}

impl Encode for MaxSubscribeId {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.subscribe_id.encode(w)
	}
}
