use super::{param, Version};
use crate::coding::{Decode, DecodeError, Encode, EncodeError, Params};

/// Sent by the server in response to a [super::ClientSetup].
#[derive(Debug, Clone)]
pub struct ServerSetup {
	/// The version chosen from the client's list.
	pub selected_version: Version,

	/// Setup parameters; MAX_SUBSCRIBE_ID is the one we act on.
	pub params: Params,
}

impl ServerSetup {
	/// The MAX_SUBSCRIBE_ID parameter, or 0 when absent.
	pub fn max_subscribe_id(&self) -> u64 {
		self.params.get(param::MAX_SUBSCRIBE_ID).ok().flatten().unwrap_or(0)
	}
}

impl Decode for ServerSetup {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			selected_version: Version::decode(r)?,
			params: Params::decode(r)?,
		})
	}
}

impl Encode for ServerSetup {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.selected_version.encode(w)?;
		self.params.encode(w)?;

		Ok(())
	}
}
