use std::io::Cursor;

use bytes::{Buf, Bytes, BytesMut};

use super::{FetchHeader, FetchObject, ObjectStatus, StreamType, SubgroupHeader, SubgroupObject};
use crate::coding::{Decode, DecodeError};

/// A decoded step of a subgroup or fetch stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
	/// The stream is a subgroup stream for the given alias.
	Subgroup(SubgroupHeader),

	/// The stream is a fetch stream for the given subscribe ID.
	Fetch(FetchHeader),

	/// A new object; `initial` holds whatever payload is already buffered.
	///
	/// `stream_complete` is only set when the object completed in the same
	/// chunk that carried the stream FIN; no EndOfStream follows in that case.
	ObjectBegin {
		group: u64,
		subgroup: u64,
		id: u64,
		length: u64,
		initial: Bytes,
		object_complete: bool,
		stream_complete: bool,
	},

	/// More payload for the in-progress object.
	ObjectPayload { payload: Bytes, object_complete: bool },

	/// A status-only object (no payload).
	ObjectStatus {
		group: u64,
		subgroup: u64,
		id: u64,
		status: ObjectStatus,
	},

	/// The stream finished cleanly between objects.
	EndOfStream,
}

enum State {
	Type,
	SubgroupHeader,
	FetchHeader,
	Object,
	Payload { remaining: u64 },
	Done,
}

/// Incremental decoder for a single unidirectional data stream.
///
/// Push transport chunks in, pull [StreamEvent]s out. The decoder never
/// consumes bytes for a partial prefix; it waits for more data instead.
pub struct ObjectStreamDecoder {
	buffer: BytesMut,
	fin: bool,
	state: State,

	// Whether this stream turned out to be a fetch stream.
	fetch: bool,

	// The location of the current object.
	group: u64,
	subgroup: u64,
}

impl Default for ObjectStreamDecoder {
	fn default() -> Self {
		Self::new()
	}
}

impl ObjectStreamDecoder {
	pub fn new() -> Self {
		Self {
			buffer: BytesMut::new(),
			fin: false,
			state: State::Type,
			fetch: false,
			group: 0,
			subgroup: 0,
		}
	}

	pub fn push(&mut self, data: Bytes, fin: bool) {
		self.buffer.extend_from_slice(&data);
		self.fin |= fin;
	}

	/// True once the stream has been fully decoded; no further events follow.
	pub fn is_done(&self) -> bool {
		matches!(self.state, State::Done)
	}

	/// The next event, or None when more data is needed.
	pub fn next(&mut self) -> Result<Option<StreamEvent>, DecodeError> {
		match self.state {
			State::Type => {
				if self.buffer.is_empty() && self.fin {
					// A stream with no bytes at all; nothing to deliver.
					self.state = State::Done;
					return Ok(Some(StreamEvent::EndOfStream));
				}

				let t = match self.try_decode::<StreamType>()? {
					Some(t) => t,
					None => return Ok(None),
				};

				match t {
					StreamType::SubgroupHeader => self.state = State::SubgroupHeader,
					StreamType::FetchHeader => self.state = State::FetchHeader,
					StreamType::ObjectDatagram => return Err(DecodeError::InvalidStreamType(0x1)),
				}

				self.next()
			}
			State::SubgroupHeader => {
				let header = match self.try_decode::<SubgroupHeader>()? {
					Some(h) => h,
					None => return Ok(None),
				};

				self.group = header.group;
				self.subgroup = header.subgroup;
				self.state = State::Object;

				Ok(Some(StreamEvent::Subgroup(header)))
			}
			State::FetchHeader => {
				let header = match self.try_decode::<FetchHeader>()? {
					Some(h) => h,
					None => return Ok(None),
				};

				self.fetch = true;
				self.state = State::Object;

				Ok(Some(StreamEvent::Fetch(header)))
			}
			State::Object => {
				if self.buffer.is_empty() && self.fin {
					self.state = State::Done;
					return Ok(Some(StreamEvent::EndOfStream));
				}

				let (id, length, status) = if self.fetch {
					let obj = match self.try_decode::<FetchObject>()? {
						Some(o) => o,
						None => return Ok(None),
					};
					self.group = obj.group;
					self.subgroup = obj.subgroup;
					(obj.id, obj.length, obj.status)
				} else {
					let obj = match self.try_decode::<SubgroupObject>()? {
						Some(o) => o,
						None => return Ok(None),
					};
					(obj.id, obj.length, obj.status)
				};

				if status != ObjectStatus::Normal {
					return Ok(Some(StreamEvent::ObjectStatus {
						group: self.group,
						subgroup: self.subgroup,
						id,
						status,
					}));
				}

				let available = (self.buffer.len() as u64).min(length);
				let initial = self.buffer.split_to(available as usize).freeze();

				let object_complete = available == length;
				let stream_complete = object_complete && self.fin && self.buffer.is_empty();

				if stream_complete {
					self.state = State::Done;
				} else if !object_complete {
					self.state = State::Payload {
						remaining: length - available,
					};
				}

				Ok(Some(StreamEvent::ObjectBegin {
					group: self.group,
					subgroup: self.subgroup,
					id,
					length,
					initial,
					object_complete,
					stream_complete,
				}))
			}
			State::Payload { remaining } => {
				if self.buffer.is_empty() {
					if self.fin {
						// FIN in the middle of an object.
						return Err(DecodeError::UnexpectedEnd);
					}
					return Ok(None);
				}

				let chunk = (self.buffer.len() as u64).min(remaining);
				let payload = self.buffer.split_to(chunk as usize).freeze();

				let object_complete = chunk == remaining;
				self.state = match object_complete {
					true => State::Object,
					false => State::Payload {
						remaining: remaining - chunk,
					},
				};

				Ok(Some(StreamEvent::ObjectPayload { payload, object_complete }))
			}
			State::Done => Ok(None),
		}
	}

	// Decode a full prefix or nothing; partial prefixes wait for more data.
	fn try_decode<T: Decode>(&mut self) -> Result<Option<T>, DecodeError> {
		let mut cursor = Cursor::new(&self.buffer);

		match T::decode(&mut cursor) {
			Ok(v) => {
				let size = cursor.position() as usize;
				self.buffer.advance(size);
				Ok(Some(v))
			}
			Err(DecodeError::More(_)) if !self.fin => Ok(None),
			Err(DecodeError::More(_)) => Err(DecodeError::UnexpectedEnd),
			Err(err) => Err(err),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::coding::Encode;

	fn subgroup_stream() -> BytesMut {
		let mut buf = BytesMut::new();
		StreamType::SubgroupHeader.encode(&mut buf).unwrap();
		SubgroupHeader {
			track_alias: 0,
			group: 7,
			subgroup: 0,
			publisher_priority: 128,
		}
		.encode(&mut buf)
		.unwrap();
		buf
	}

	#[test]
	fn single_object_with_fin() {
		let mut buf = subgroup_stream();
		SubgroupObject {
			id: 3,
			length: 3,
			status: ObjectStatus::Normal,
		}
		.encode(&mut buf)
		.unwrap();
		buf.extend_from_slice(b"abc");

		let mut decoder = ObjectStreamDecoder::new();
		decoder.push(buf.freeze(), true);

		assert!(matches!(decoder.next().unwrap(), Some(StreamEvent::Subgroup(h)) if h.group == 7));

		match decoder.next().unwrap() {
			Some(StreamEvent::ObjectBegin {
				id,
				initial,
				object_complete,
				stream_complete,
				..
			}) => {
				assert_eq!(id, 3);
				assert_eq!(initial, Bytes::from_static(b"abc"));
				assert!(object_complete);
				assert!(stream_complete);
			}
			e => panic!("unexpected event: {:?}", e),
		}

		assert!(decoder.is_done());
		assert!(decoder.next().unwrap().is_none());
	}

	#[test]
	fn chunked_payload() {
		let mut buf = subgroup_stream();
		SubgroupObject {
			id: 0,
			length: 6,
			status: ObjectStatus::Normal,
		}
		.encode(&mut buf)
		.unwrap();
		buf.extend_from_slice(b"abc");

		let mut decoder = ObjectStreamDecoder::new();
		decoder.push(buf.freeze(), false);

		decoder.next().unwrap(); // header

		match decoder.next().unwrap() {
			Some(StreamEvent::ObjectBegin {
				initial, object_complete, ..
			}) => {
				assert_eq!(initial, Bytes::from_static(b"abc"));
				assert!(!object_complete);
			}
			e => panic!("unexpected event: {:?}", e),
		}

		// Nothing more until the rest arrives.
		assert!(decoder.next().unwrap().is_none());

		decoder.push(Bytes::from_static(b"def"), true);

		match decoder.next().unwrap() {
			Some(StreamEvent::ObjectPayload { payload, object_complete }) => {
				assert_eq!(payload, Bytes::from_static(b"def"));
				assert!(object_complete);
			}
			e => panic!("unexpected event: {:?}", e),
		}

		assert_eq!(decoder.next().unwrap(), Some(StreamEvent::EndOfStream));
		assert!(decoder.is_done());
	}

	#[test]
	fn status_objects() {
		let mut buf = subgroup_stream();
		SubgroupObject {
			id: 4,
			length: 0,
			status: ObjectStatus::EndOfGroup,
		}
		.encode(&mut buf)
		.unwrap();

		let mut decoder = ObjectStreamDecoder::new();
		decoder.push(buf.freeze(), true);

		decoder.next().unwrap(); // header

		match decoder.next().unwrap() {
			Some(StreamEvent::ObjectStatus { id, status, .. }) => {
				assert_eq!(id, 4);
				assert_eq!(status, ObjectStatus::EndOfGroup);
			}
			e => panic!("unexpected event: {:?}", e),
		}

		assert_eq!(decoder.next().unwrap(), Some(StreamEvent::EndOfStream));
	}

	#[test]
	fn fetch_stream() {
		let mut buf = BytesMut::new();
		StreamType::FetchHeader.encode(&mut buf).unwrap();
		FetchHeader { subscribe_id: 2 }.encode(&mut buf).unwrap();
		FetchObject {
			group: 1,
			subgroup: 0,
			id: 0,
			length: 2,
			status: ObjectStatus::Normal,
		}
		.encode(&mut buf)
		.unwrap();
		buf.extend_from_slice(b"hi");

		let mut decoder = ObjectStreamDecoder::new();
		decoder.push(buf.freeze(), true);

		assert!(matches!(
			decoder.next().unwrap(),
			Some(StreamEvent::Fetch(h)) if h.subscribe_id == 2
		));

		match decoder.next().unwrap() {
			Some(StreamEvent::ObjectBegin {
				group,
				id,
				initial,
				stream_complete,
				..
			}) => {
				assert_eq!(group, 1);
				assert_eq!(id, 0);
				assert_eq!(initial, Bytes::from_static(b"hi"));
				assert!(stream_complete);
			}
			e => panic!("unexpected event: {:?}", e),
		}
	}

	#[test]
	fn fin_mid_object() {
		let mut buf = subgroup_stream();
		SubgroupObject {
			id: 0,
			length: 10,
			status: ObjectStatus::Normal,
		}
		.encode(&mut buf)
		.unwrap();
		buf.extend_from_slice(b"short");

		let mut decoder = ObjectStreamDecoder::new();
		decoder.push(buf.freeze(), true);

		decoder.next().unwrap(); // header
		decoder.next().unwrap(); // partial object begin

		assert!(decoder.next().is_err());
	}

	#[test]
	fn datagram_type_rejected() {
		let mut buf = BytesMut::new();
		StreamType::ObjectDatagram.encode(&mut buf).unwrap();

		let mut decoder = ObjectStreamDecoder::new();
		decoder.push(buf.freeze(), false);

		assert!(decoder.next().is_err());
	}
}
