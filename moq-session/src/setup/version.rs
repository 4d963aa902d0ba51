use std::fmt;
use std::ops::Deref;

use crate::coding::{Decode, DecodeError, Encode, EncodeError};

/// A version number negotiated during the setup.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Version(pub u64);

impl Version {
	/// The current draft this crate implements.
	pub const CURRENT: Version = Version(0xff00_0007);
}

impl From<u64> for Version {
	fn from(v: u64) -> Self {
		Self(v)
	}
}

impl From<Version> for u64 {
	fn from(v: Version) -> Self {
		v.0
	}
}

impl Decode for Version {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self(u64::decode(r)?))
	}
}

impl Encode for Version {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.0.encode(w)
	}
}

impl fmt::Debug for Version {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{:x}", self.0)
	}
}

/// A list of versions in preferred order.
#[derive(Clone, Default, Debug)]
pub struct Versions(Vec<Version>);

impl Decode for Versions {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let count = u64::decode(r)?;
		let mut vs = Vec::new();

		for _ in 0..count {
			vs.push(Version::decode(r)?);
		}

		Ok(Self(vs))
	}
}

impl Encode for Versions {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.0.len().encode(w)?;

		for v in &self.0 {
			v.encode(w)?;
		}

		Ok(())
	}
}

impl Deref for Versions {
	type Target = Vec<Version>;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl From<Vec<Version>> for Versions {
	fn from(vs: Vec<Version>) -> Self {
		Self(vs)
	}
}

impl<const N: usize> From<[Version; N]> for Versions {
	fn from(vs: [Version; N]) -> Self {
		Self(vs.to_vec())
	}
}
