use crate::coding::{Decode, DecodeError, Encode, EncodeError};

/// Sent by the server to ask the client to reconnect elsewhere.
#[derive(Clone, Debug)]
pub struct GoAway {
	/// Where to reconnect, or empty to reuse the current URI.
	pub new_session_uri: String,
}

impl Decode for GoAway {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			new_session_uri: String::decode(r)?,
		})
	}
}

impl Encode for GoAway {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.new_session_uri.encode(w)
	}
}
