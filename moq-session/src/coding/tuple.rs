use std::fmt;

use bytes::Bytes;

use super::{Decode, DecodeError, Encode, EncodeError};

/// A track namespace: an ordered tuple of byte fields.
///
/// Prefix matching is used to correlate SUBSCRIBE_ANNOUNCES with ANNOUNCE.
#[derive(Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackNamespace {
	pub fields: Vec<Bytes>,
}

impl TrackNamespace {
	pub fn new<T: Into<Bytes>, I: IntoIterator<Item = T>>(fields: I) -> Self {
		Self {
			fields: fields.into_iter().map(Into::into).collect(),
		}
	}

	/// Returns true if `self` is a (non-strict) prefix of `other`.
	pub fn is_prefix_of(&self, other: &Self) -> bool {
		other.fields.len() >= self.fields.len() && self.fields == other.fields[..self.fields.len()]
	}
}

impl Decode for TrackNamespace {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let count = usize::decode(r)?;

		let mut fields = Vec::with_capacity(count);
		for _ in 0..count {
			fields.push(Bytes::decode(r)?);
		}

		Ok(Self { fields })
	}
}

impl Encode for TrackNamespace {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
		self.fields.len().encode(w)?;
		for field in &self.fields {
			field.encode(w)?;
		}

		Ok(())
	}
}

impl fmt::Debug for TrackNamespace {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut first = true;
		for field in &self.fields {
			if !first {
				write!(f, "/")?;
			}
			first = false;

			match std::str::from_utf8(field) {
				Ok(s) => write!(f, "{}", s)?,
				Err(_) => write!(f, "{:02x?}", field.as_ref())?,
			}
		}

		Ok(())
	}
}

/// The full name of a track: its namespace plus the track name.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FullTrackName {
	pub namespace: TrackNamespace,
	pub name: Bytes,
}

impl FullTrackName {
	pub fn new<N: Into<Bytes>>(namespace: TrackNamespace, name: N) -> Self {
		Self {
			namespace,
			name: name.into(),
		}
	}
}

impl fmt::Debug for FullTrackName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match std::str::from_utf8(&self.name) {
			Ok(s) => write!(f, "{:?}/{}", self.namespace, s),
			Err(_) => write!(f, "{:?}/{:02x?}", self.namespace, self.name.as_ref()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn prefix() {
		let root = TrackNamespace::new(["conf"]);
		let full = TrackNamespace::new(["conf", "alice"]);

		assert!(root.is_prefix_of(&full));
		assert!(root.is_prefix_of(&root));
		assert!(!full.is_prefix_of(&root));
		assert!(!TrackNamespace::new(["other"]).is_prefix_of(&full));
	}

	#[test]
	fn coding() {
		let ns = TrackNamespace::new(["a", "bc"]);

		let mut buf = bytes::BytesMut::new();
		ns.encode(&mut buf).unwrap();
		assert_eq!(buf.to_vec(), vec![0x02, 0x01, b'a', 0x02, b'b', b'c']);

		let decoded = TrackNamespace::decode(&mut buf).unwrap();
		assert_eq!(decoded, ns);
	}
}
