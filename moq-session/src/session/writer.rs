use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::Session;
use crate::coding::Encode;
use crate::consumer::{FetchConsumer, SubgroupConsumer};
use crate::data::{FetchHeader, FetchObject, ObjectStatus, StreamType, SubgroupHeader, SubgroupObject};
use crate::transport::{self, SendStream};
use crate::util::Lock;
use crate::{PublishError, PublishStatus, ResetCode};

/// Who to tell when this stream completes.
pub(super) enum Owner<S: transport::Session> {
	/// A subgroup stream; remove ourselves from the track's map.
	Track {
		subgroups: Lock<HashMap<(u64, u64), StreamWriter<S>>>,
	},

	/// A fetch stream; the subscribe ID retires with it.
	Fetch { session: Session<S>, subscribe_id: u64 },
}

impl<S: transport::Session> Clone for Owner<S> {
	fn clone(&self) -> Self {
		match self {
			Self::Track { subgroups } => Self::Track {
				subgroups: subgroups.clone(),
			},
			Self::Fetch { session, subscribe_id } => Self::Fetch {
				session: session.clone(),
				subscribe_id: *subscribe_id,
			},
		}
	}
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
	Subgroup,
	Fetch,
}

#[derive(Clone)]
enum Terminal {
	Finished,
	Reset,
	Cancelled,
}

struct WriterState<S: transport::Session> {
	stream: Option<S::SendStream>,

	// Header and object bytes not yet handed to the transport.
	buffer: BytesMut,

	group: u64,
	subgroup: u64,

	// None until the first object on this (sub)group.
	last_object_id: Option<u64>,

	// Set while a multi-chunk object is open.
	remaining: Option<u64>,

	terminal: Option<Terminal>,

	// The owner must be told exactly once, outside the state lock.
	notify_complete: bool,
}

/// Writes one subgroup or fetch stream: header first, then framed objects.
///
/// Object IDs must be strictly increasing and at most one partial object may
/// be open. Violations reset the stream with INTERNAL_ERROR and surface an
/// API error to the caller.
pub(super) struct StreamWriter<S: transport::Session> {
	role: Role,
	owner: Owner<S>,
	state: Lock<WriterState<S>>,

	// Fires once the stream is finished or reset; stops the cancel watcher.
	done: CancellationToken,
}

impl<S: transport::Session> Clone for StreamWriter<S> {
	fn clone(&self) -> Self {
		Self {
			role: self.role,
			owner: self.owner.clone(),
			state: self.state.clone(),
			done: self.done.clone(),
		}
	}
}

impl<S: transport::Session> StreamWriter<S> {
	pub fn subgroup(
		stream: S::SendStream,
		owner: Owner<S>,
		track_alias: u64,
		group: u64,
		subgroup: u64,
		publisher_priority: u8,
	) -> Result<Self, PublishError> {
		let mut buffer = BytesMut::new();
		StreamType::SubgroupHeader.encode(&mut buffer).map_err(bounds)?;
		SubgroupHeader {
			track_alias,
			group,
			subgroup,
			publisher_priority,
		}
		.encode(&mut buffer)
		.map_err(bounds)?;

		Ok(Self::new(Role::Subgroup, stream, owner, buffer, group, subgroup))
	}

	pub fn fetch(stream: S::SendStream, owner: Owner<S>, subscribe_id: u64) -> Result<Self, PublishError> {
		let mut buffer = BytesMut::new();
		StreamType::FetchHeader.encode(&mut buffer).map_err(bounds)?;
		FetchHeader { subscribe_id }.encode(&mut buffer).map_err(bounds)?;

		Ok(Self::new(Role::Fetch, stream, owner, buffer, 0, 0))
	}

	fn new(role: Role, stream: S::SendStream, owner: Owner<S>, buffer: BytesMut, group: u64, subgroup: u64) -> Self {
		let stopped = stream.stopped();

		let writer = Self {
			role,
			owner,
			state: Lock::new(WriterState {
				stream: Some(stream),
				buffer,
				group,
				subgroup,
				last_object_id: None,
				remaining: None,
				terminal: None,
				notify_complete: false,
			}),
			done: CancellationToken::new(),
		};

		writer.watch_cancel(stopped);
		writer
	}

	// Reset with CANCELLED when the peer stops reading.
	fn watch_cancel(&self, stopped: CancellationToken) {
		let writer = self.clone();
		let done = self.done.clone();

		tokio::spawn(async move {
			tokio::select! {
				_ = stopped.cancelled() => {
					tracing::debug!("peer requested write termination");
					writer.reset_stream(ResetCode::Cancelled);
				}
				_ = done.cancelled() => {}
			}
		});
	}

	/// Write a status-only object; used directly for GROUP_NOT_EXIST.
	pub fn publish_status(&self, object_id: u64, status: ObjectStatus, fin: bool) -> Result<(), PublishError> {
		self.finish_call({
			let mut state = self.state.lock();
			Self::validate_publish(&mut state, object_id)
				.and_then(|_| Self::write_current(self.role, &mut state, object_id, 0, status, Bytes::new(), fin))
		})
	}

	/// Reset the stream and free the handle; subsequent operations fail.
	pub fn reset_stream(&self, code: ResetCode) {
		let result: Result<(), PublishError> = {
			let mut state = self.state.lock();
			Self::reset_inner(&mut state, code);
			Ok(())
		};

		self.finish_call(result).ok();
	}

	fn terminal_error(terminal: &Terminal) -> PublishError {
		match terminal {
			Terminal::Finished => PublishError::Api("stream already finished".into()),
			_ => PublishError::Cancelled("stream cancelled".into()),
		}
	}

	fn validate_publish(state: &mut WriterState<S>, object_id: u64) -> Result<(), PublishError> {
		if let Some(terminal) = &state.terminal {
			return Err(Self::terminal_error(terminal));
		}

		if state.remaining.is_some() {
			Self::reset_inner(state, ResetCode::InternalError);
			return Err(PublishError::Api("previous object incomplete".into()));
		}

		if let Some(last) = state.last_object_id {
			if object_id <= last {
				Self::reset_inner(state, ResetCode::InternalError);
				return Err(PublishError::Api("object id not advancing".into()));
			}
		}

		Ok(())
	}

	// Account a payload chunk against the open object.
	fn validate_payload(state: &mut WriterState<S>, size: u64, fin: bool) -> Result<PublishStatus, PublishError> {
		if let Some(terminal) = &state.terminal {
			return Err(Self::terminal_error(terminal));
		}

		let remaining = match state.remaining {
			Some(remaining) => remaining,
			None => return Err(PublishError::Api("no object in progress".into())),
		};

		if size > remaining {
			Self::reset_inner(state, ResetCode::InternalError);
			return Err(PublishError::Api("length exceeds remaining in object".into()));
		}

		let remaining = remaining - size;
		if remaining == 0 {
			state.remaining = None;
			return Ok(PublishStatus::Done);
		}

		if fin {
			Self::reset_inner(state, ResetCode::InternalError);
			return Err(PublishError::Api("fin with open object".into()));
		}

		state.remaining = Some(remaining);
		Ok(PublishStatus::InProgress)
	}

	fn write_current(
		role: Role,
		state: &mut WriterState<S>,
		object_id: u64,
		length: u64,
		status: ObjectStatus,
		payload: Bytes,
		fin: bool,
	) -> Result<(), PublishError> {
		state.last_object_id = Some(object_id);

		let encoded = match role {
			Role::Subgroup => SubgroupObject {
				id: object_id,
				length,
				status,
			}
			.encode(&mut state.buffer),
			Role::Fetch => FetchObject {
				group: state.group,
				subgroup: state.subgroup,
				id: object_id,
				length,
				status,
			}
			.encode(&mut state.buffer),
		};
		encoded.map_err(bounds)?;

		state.buffer.extend_from_slice(&payload);
		Self::write_to_stream(state, fin)
	}

	fn write_to_stream(state: &mut WriterState<S>, fin: bool) -> Result<(), PublishError> {
		let data = state.buffer.split().freeze();

		let stream = match state.stream.as_mut() {
			Some(stream) => stream,
			None => return Err(PublishError::Cancelled("stream cancelled".into())),
		};

		match stream.write(data, fin) {
			Ok(()) => {
				if fin {
					state.stream = None;
					state.terminal = Some(Terminal::Finished);
					state.notify_complete = true;
				}
				Ok(())
			}
			Err(err) => {
				tracing::error!(%err, "stream write failed");
				Self::reset_inner(state, ResetCode::InternalError);
				Err(PublishError::Write(err.to_string()))
			}
		}
	}

	fn reset_inner(state: &mut WriterState<S>, code: ResetCode) {
		if !state.buffer.is_empty() {
			// No reliable delivery for a pending header.
			tracing::warn!("stream bytes pending on reset");
		}

		match state.stream.take() {
			Some(mut stream) => {
				stream.reset(code.into());
				state.terminal = Some(match code {
					ResetCode::Cancelled => Terminal::Cancelled,
					_ => Terminal::Reset,
				});
				state.notify_complete = true;
			}
			None => {
				// Can happen on STOP_SENDING racing a local finish.
				if state.terminal.is_none() {
					state.terminal = Some(Terminal::Reset);
				}
			}
		}
	}

	// Fetch streams carry the location per object; groups never move back.
	fn set_location(state: &mut WriterState<S>, group: u64, subgroup: u64) -> bool {
		if group < state.group {
			return false;
		}

		if group > state.group {
			// A new group starts its object IDs over.
			state.last_object_id = None;
		}

		state.group = group;
		state.subgroup = subgroup;
		true
	}

	// Deliver the completion notification after the state lock is released.
	fn finish_call<T>(&self, result: Result<T, PublishError>) -> Result<T, PublishError> {
		let notify = {
			let mut state = self.state.lock();
			let notify = state.notify_complete;
			state.notify_complete = false;
			notify.then(|| (state.group, state.subgroup))
		};

		if let Some((group, subgroup)) = notify {
			self.done.cancel();

			match &self.owner {
				Owner::Track { subgroups } => {
					subgroups.lock().remove(&(group, subgroup));
				}
				Owner::Fetch { session, subscribe_id } => {
					session.fetch_complete(*subscribe_id);
				}
			}
		}

		result
	}
}

fn bounds(err: crate::coding::EncodeError) -> PublishError {
	PublishError::Api(err.to_string())
}

impl<S: transport::Session> SubgroupConsumer for StreamWriter<S> {
	fn object(&self, object_id: u64, payload: Bytes, fin_subgroup: bool) -> Result<(), PublishError> {
		self.finish_call({
			let mut state = self.state.lock();
			Self::validate_publish(&mut state, object_id).and_then(|_| {
				let length = payload.len() as u64;
				Self::write_current(
					self.role,
					&mut state,
					object_id,
					length,
					ObjectStatus::Normal,
					payload,
					fin_subgroup,
				)
			})
		})
	}

	fn object_not_exists(&self, object_id: u64, fin_subgroup: bool) -> Result<(), PublishError> {
		self.publish_status(object_id, ObjectStatus::ObjectNotExist, fin_subgroup)
	}

	fn begin_object(&self, object_id: u64, length: u64, initial: Bytes) -> Result<(), PublishError> {
		self.finish_call({
			let mut state = self.state.lock();
			Self::validate_publish(&mut state, object_id)
				.and_then(|_| {
					state.remaining = Some(length);
					Self::validate_payload(&mut state, initial.len() as u64, false)
				})
				.and_then(|_| {
					Self::write_current(self.role, &mut state, object_id, length, ObjectStatus::Normal, initial, false)
				})
		})
	}

	fn object_payload(&self, payload: Bytes, fin_subgroup: bool) -> Result<PublishStatus, PublishError> {
		self.finish_call({
			let mut state = self.state.lock();
			Self::validate_payload(&mut state, payload.len() as u64, fin_subgroup).and_then(|status| {
				state.buffer.extend_from_slice(&payload);
				Self::write_to_stream(&mut state, fin_subgroup)?;
				Ok(status)
			})
		})
	}

	fn end_of_group(&self, object_id: u64) -> Result<(), PublishError> {
		self.publish_status(object_id, ObjectStatus::EndOfGroup, true)
	}

	fn end_of_track_and_group(&self, object_id: u64) -> Result<(), PublishError> {
		self.publish_status(object_id, ObjectStatus::EndOfTrackAndGroup, true)
	}

	fn end_of_subgroup(&self) -> Result<(), PublishError> {
		self.finish_call({
			let mut state = self.state.lock();

			if let Some(terminal) = &state.terminal {
				Err(Self::terminal_error(terminal))
			} else if state.remaining.is_some() {
				Self::reset_inner(&mut state, ResetCode::InternalError);
				Err(PublishError::Api("previous object incomplete".into()))
			} else {
				Self::write_to_stream(&mut state, true)
			}
		})
	}

	fn reset(&self, code: ResetCode) {
		self.reset_stream(code);
	}

	fn ready(&self) -> Result<BoxFuture<'static, Result<(), PublishError>>, PublishError> {
		let mut state = self.state.lock();

		if let Some(terminal) = &state.terminal {
			return Err(Self::terminal_error(terminal));
		}

		let stream = match state.stream.as_mut() {
			Some(stream) => stream,
			None => return Err(PublishError::Cancelled("stream cancelled".into())),
		};

		let writable = stream.writable();
		Ok(Box::pin(async move {
			writable.await.map_err(|err| PublishError::Write(err.to_string()))
		}))
	}
}

impl<S: transport::Session> FetchConsumer for StreamWriter<S> {
	fn object(
		&self,
		group: u64,
		subgroup: u64,
		object_id: u64,
		payload: Bytes,
		fin_fetch: bool,
	) -> Result<(), PublishError> {
		self.finish_call({
			let mut state = self.state.lock();
			Self::move_location(&mut state, group, subgroup)
				.and_then(|_| Self::validate_publish(&mut state, object_id))
				.and_then(|_| {
					let length = payload.len() as u64;
					Self::write_current(
						self.role,
						&mut state,
						object_id,
						length,
						ObjectStatus::Normal,
						payload,
						fin_fetch,
					)
				})
		})
	}

	fn object_not_exists(
		&self,
		group: u64,
		subgroup: u64,
		object_id: u64,
		fin_fetch: bool,
	) -> Result<(), PublishError> {
		self.status_at(group, subgroup, object_id, ObjectStatus::ObjectNotExist, fin_fetch)
	}

	fn group_not_exists(&self, group: u64, subgroup: u64, fin_fetch: bool) -> Result<(), PublishError> {
		self.status_at(group, subgroup, 0, ObjectStatus::GroupNotExist, fin_fetch)
	}

	fn begin_object(
		&self,
		group: u64,
		subgroup: u64,
		object_id: u64,
		length: u64,
		initial: Bytes,
	) -> Result<(), PublishError> {
		self.finish_call({
			let mut state = self.state.lock();
			Self::move_location(&mut state, group, subgroup)
				.and_then(|_| Self::validate_publish(&mut state, object_id))
				.and_then(|_| {
					state.remaining = Some(length);
					Self::validate_payload(&mut state, initial.len() as u64, false)
				})
				.and_then(|_| {
					Self::write_current(self.role, &mut state, object_id, length, ObjectStatus::Normal, initial, false)
				})
		})
	}

	fn object_payload(&self, payload: Bytes, fin_fetch: bool) -> Result<PublishStatus, PublishError> {
		SubgroupConsumer::object_payload(self, payload, fin_fetch)
	}

	fn end_of_group(&self, group: u64, subgroup: u64, object_id: u64, fin_fetch: bool) -> Result<(), PublishError> {
		self.status_at(group, subgroup, object_id, ObjectStatus::EndOfGroup, fin_fetch)
	}

	fn end_of_track_and_group(&self, group: u64, subgroup: u64, object_id: u64) -> Result<(), PublishError> {
		self.status_at(group, subgroup, object_id, ObjectStatus::EndOfTrackAndGroup, true)
	}

	fn end_of_fetch(&self) -> Result<(), PublishError> {
		SubgroupConsumer::end_of_subgroup(self)
	}

	fn reset(&self, code: ResetCode) {
		self.reset_stream(code);
	}

	fn ready(&self) -> Result<BoxFuture<'static, Result<(), PublishError>>, PublishError> {
		SubgroupConsumer::ready(self)
	}
}

impl<S: transport::Session> StreamWriter<S> {
	fn move_location(state: &mut WriterState<S>, group: u64, subgroup: u64) -> Result<(), PublishError> {
		match Self::set_location(state, group, subgroup) {
			true => Ok(()),
			false => Err(PublishError::Api("group moved back".into())),
		}
	}

	fn status_at(
		&self,
		group: u64,
		subgroup: u64,
		object_id: u64,
		status: ObjectStatus,
		fin: bool,
	) -> Result<(), PublishError> {
		self.finish_call({
			let mut state = self.state.lock();
			Self::move_location(&mut state, group, subgroup)
				.and_then(|_| Self::validate_publish(&mut state, object_id))
				.and_then(|_| Self::write_current(self.role, &mut state, object_id, 0, status, Bytes::new(), fin))
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::mock::{self, MockRecvStream, MockSendStream, MockSession};
	use crate::transport::{RecvStream, Session};
	use crate::PublishStatus;

	async fn pipe() -> (MockSendStream, MockRecvStream) {
		let (mut a, mut b) = mock::pair();
		let send = a.open_uni().unwrap();
		let recv = b.accept_uni().await.unwrap();
		(send, recv)
	}

	fn track_owner() -> Owner<MockSession> {
		Owner::Track {
			subgroups: Default::default(),
		}
	}

	fn subgroup_writer(send: MockSendStream) -> StreamWriter<MockSession> {
		StreamWriter::subgroup(send, track_owner(), 4, 7, 0, 128).unwrap()
	}

	// Read the stream to the end; Ok(bytes) on FIN, Err(code) on reset.
	async fn collect(mut recv: MockRecvStream) -> Result<Vec<u8>, u32> {
		let mut all = Vec::new();
		loop {
			match recv.read().await {
				Ok(data) => {
					all.extend_from_slice(&data.data);
					if data.fin {
						return Ok(all);
					}
				}
				Err(crate::transport::TransportError::Reset(code)) => return Err(code),
				Err(err) => panic!("unexpected read error: {:?}", err),
			}
		}
	}

	#[tokio::test]
	async fn single_object_wire_format() {
		let (send, recv) = pipe().await;
		let writer = subgroup_writer(send);

		SubgroupConsumer::object(&writer, 3, Bytes::from_static(b"abc"), true).unwrap();

		let bytes = collect(recv).await.unwrap();
		assert_eq!(
			bytes,
			vec![
				0x04, // SUBGROUP_HEADER
				0x04, 0x07, 0x00, 0x80, // alias=4 group=7 subgroup=0 priority=128
				0x03, 0x03, b'a', b'b', b'c', // id=3 length=3 payload
			]
		);
	}

	#[tokio::test]
	async fn object_ids_must_advance() {
		let (send, recv) = pipe().await;
		let writer = subgroup_writer(send);

		SubgroupConsumer::object(&writer, 3, Bytes::from_static(b"a"), false).unwrap();

		let err = SubgroupConsumer::object(&writer, 3, Bytes::from_static(b"b"), false).unwrap_err();
		assert!(matches!(err, PublishError::Api(_)));

		// The violation reset the stream with INTERNAL_ERROR.
		assert_eq!(collect(recv).await, Err(ResetCode::InternalError.into()));

		// And everything afterwards fails.
		let err = SubgroupConsumer::object(&writer, 4, Bytes::from_static(b"c"), false).unwrap_err();
		assert!(matches!(err, PublishError::Cancelled(_)));
	}

	#[tokio::test]
	async fn partial_object_accounting() {
		let (send, recv) = pipe().await;
		let writer = subgroup_writer(send);

		SubgroupConsumer::begin_object(&writer, 0, 6, Bytes::from_static(b"abc")).unwrap();

		let status = SubgroupConsumer::object_payload(&writer, Bytes::from_static(b"de"), false).unwrap();
		assert_eq!(status, PublishStatus::InProgress);

		let status = SubgroupConsumer::object_payload(&writer, Bytes::from_static(b"f"), true).unwrap();
		assert_eq!(status, PublishStatus::Done);

		let bytes = collect(recv).await.unwrap();
		assert_eq!(
			bytes,
			vec![0x04, 0x04, 0x07, 0x00, 0x80, 0x00, 0x06, b'a', b'b', b'c', b'd', b'e', b'f']
		);
	}

	#[tokio::test]
	async fn payload_overflow_rejected() {
		let (send, recv) = pipe().await;
		let writer = subgroup_writer(send);

		SubgroupConsumer::begin_object(&writer, 0, 3, Bytes::from_static(b"ab")).unwrap();

		let err = SubgroupConsumer::object_payload(&writer, Bytes::from_static(b"cd"), false).unwrap_err();
		assert!(matches!(err, PublishError::Api(_)));

		assert_eq!(collect(recv).await, Err(ResetCode::InternalError.into()));
	}

	#[tokio::test]
	async fn fin_with_remaining_rejected() {
		let (send, _recv) = pipe().await;
		let writer = subgroup_writer(send);

		SubgroupConsumer::begin_object(&writer, 0, 5, Bytes::from_static(b"ab")).unwrap();

		let err = SubgroupConsumer::object_payload(&writer, Bytes::from_static(b"c"), true).unwrap_err();
		assert!(matches!(err, PublishError::Api(_)));
	}

	#[tokio::test]
	async fn end_of_subgroup_with_partial_rejected() {
		let (send, _recv) = pipe().await;
		let writer = subgroup_writer(send);

		SubgroupConsumer::begin_object(&writer, 0, 5, Bytes::from_static(b"ab")).unwrap();

		let err = SubgroupConsumer::end_of_subgroup(&writer).unwrap_err();
		assert!(matches!(err, PublishError::Api(_)));
	}

	#[tokio::test]
	async fn begin_object_full_length_is_done() {
		let (send, recv) = pipe().await;
		let writer = subgroup_writer(send);

		// The initial payload covers the whole object; no payload state left.
		SubgroupConsumer::begin_object(&writer, 0, 3, Bytes::from_static(b"abc")).unwrap();
		SubgroupConsumer::object(&writer, 1, Bytes::from_static(b"d"), true).unwrap();

		let bytes = collect(recv).await.unwrap();
		assert_eq!(
			bytes,
			vec![0x04, 0x04, 0x07, 0x00, 0x80, 0x00, 0x03, b'a', b'b', b'c', 0x01, 0x01, b'd']
		);
	}

	#[tokio::test]
	async fn fetch_group_regression_rejected() {
		let (send, _recv) = pipe().await;
		let writer = StreamWriter::fetch(send, track_owner(), 9).unwrap();

		FetchConsumer::object(&writer, 5, 0, 1, Bytes::from_static(b"a"), false).unwrap();

		let err = FetchConsumer::object(&writer, 3, 0, 2, Bytes::from_static(b"b"), false).unwrap_err();
		assert!(matches!(err, PublishError::Api(_)));
	}

	#[tokio::test]
	async fn fetch_group_advance_resets_object_ids() {
		let (send, recv) = pipe().await;
		let writer = StreamWriter::fetch(send, track_owner(), 9).unwrap();

		FetchConsumer::object(&writer, 5, 0, 7, Bytes::from_static(b"a"), false).unwrap();

		// A new group starts over at a lower object ID.
		FetchConsumer::object(&writer, 6, 0, 0, Bytes::from_static(b"b"), true).unwrap();

		let bytes = collect(recv).await.unwrap();
		assert_eq!(
			bytes,
			vec![
				0x05, 0x09, // FETCH_HEADER subscribe_id=9
				0x05, 0x00, 0x07, 0x01, b'a', // group=5 subgroup=0 id=7 len=1
				0x06, 0x00, 0x00, 0x01, b'b', // group=6 subgroup=0 id=0 len=1
			]
		);
	}

	#[tokio::test]
	async fn peer_stop_sending_cancels() {
		let (send, mut recv) = pipe().await;
		let writer = subgroup_writer(send);

		recv.stop(0);

		// The watcher task resets the stream with CANCELLED.
		let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
		let mut id = 0;
		loop {
			let err = match SubgroupConsumer::object(&writer, id, Bytes::from_static(b"a"), false) {
				Err(err) => err,
				Ok(()) => {
					assert!(tokio::time::Instant::now() < deadline, "writer never cancelled");
					id += 1;
					tokio::time::sleep(std::time::Duration::from_millis(5)).await;
					continue;
				}
			};
			assert!(matches!(err, PublishError::Cancelled(_)));
			break;
		}
	}
}
