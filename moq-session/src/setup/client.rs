use super::{param, Versions};
use crate::coding::{Decode, DecodeError, Encode, EncodeError, Params};

/// Sent by the client to open the session.
#[derive(Debug, Clone)]
pub struct ClientSetup {
	/// The list of supported versions in preferred order.
	pub versions: Versions,

	/// Setup parameters; MAX_SUBSCRIBE_ID is the one we act on.
	pub params: Params,
}

impl ClientSetup {
	/// The MAX_SUBSCRIBE_ID parameter, or 0 when absent.
	pub fn max_subscribe_id(&self) -> u64 {
		self.params.get(param::MAX_SUBSCRIBE_ID).ok().flatten().unwrap_or(0)
	}
}

impl Decode for ClientSetup {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			versions: Versions::decode(r)?,
			params: Params::decode(r)?,
		})
	}
}

impl Encode for ClientSetup {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.versions.encode(w)?;
		self.params.encode(w)?;

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::setup::Version;
	use bytes::BytesMut;

	#[test]
	fn client_coding() {
		let mut params = Params::new();
		params.set(param::MAX_SUBSCRIBE_ID, 100u64).unwrap();

		let client = ClientSetup {
			versions: [Version::CURRENT].into(),
			params,
		};

		let mut buf = BytesMut::new();
		client.encode(&mut buf).unwrap();
		assert_eq!(
			buf.to_vec(),
			vec![0x01, 0xc0, 0x00, 0x00, 0x00, 0xff, 0x00, 0x00, 0x07, 0x01, 0x02, 0x02, 0x40, 0x64]
		);

		let decoded = ClientSetup::decode(&mut buf).unwrap();
		assert_eq!(decoded.versions.as_slice(), &[Version::CURRENT]);
		assert_eq!(decoded.max_subscribe_id(), 100);
	}
}
