use std::collections::HashMap;
use std::io::Cursor;

use super::{Decode, DecodeError, Encode, EncodeError};

/// A list of key/value parameters, as carried by setup and control messages.
///
/// Unknown parameters are preserved so they round-trip untouched.
#[derive(Default, Debug, Clone)]
pub struct Params(HashMap<u64, Vec<u8>>);

impl Decode for Params {
	fn decode<R: bytes::Buf>(mut r: &mut R) -> Result<Self, DecodeError> {
		let mut params = HashMap::new();

		let count = u64::decode(r)?;
		for _ in 0..count {
			let kind = u64::decode(r)?;
			if params.contains_key(&kind) {
				return Err(DecodeError::DuplicateParameter);
			}

			let size = usize::decode(r)?;
			Self::decode_remaining(r, size)?;

			let mut data = vec![0; size];
			r.copy_to_slice(&mut data);
			params.insert(kind, data);
		}

		Ok(Params(params))
	}
}

impl Encode for Params {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.0.len().encode(w)?;

		for (kind, value) in self.0.iter() {
			kind.encode(w)?;
			value.encode(w)?;
		}

		Ok(())
	}
}

impl Params {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set<P: Encode>(&mut self, kind: u64, p: P) -> Result<(), EncodeError> {
		let mut value = Vec::new();
		p.encode(&mut value)?;
		self.0.insert(kind, value);

		Ok(())
	}

	pub fn has(&self, kind: u64) -> bool {
		self.0.contains_key(&kind)
	}

	pub fn get<P: Decode>(&self, kind: u64) -> Result<Option<P>, DecodeError> {
		if let Some(value) = self.0.get(&kind) {
			let mut cursor = Cursor::new(value);
			Ok(Some(P::decode(&mut cursor)?))
		} else {
			Ok(None)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use bytes::BytesMut;

	#[test]
	fn params_coding() {
		let mut params = Params::new();
		params.set(0x2, 100u64).unwrap();

		let mut buf = BytesMut::new();
		params.encode(&mut buf).unwrap();
		assert_eq!(buf.to_vec(), vec![0x01, 0x02, 0x02, 0x40, 0x64]);

		let decoded = Params::decode(&mut buf).unwrap();
		assert_eq!(decoded.get::<u64>(0x2).unwrap(), Some(100));
		assert_eq!(decoded.get::<u64>(0x3).unwrap(), None);
	}

	#[test]
	fn duplicate() {
		// count=2, both with kind=1
		let mut buf = BytesMut::from(&[0x02, 0x01, 0x01, 0x00, 0x01, 0x01, 0x00][..]);
		assert!(matches!(Params::decode(&mut buf), Err(DecodeError::DuplicateParameter)));
	}
}
