use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;

use super::writer::{Owner, StreamWriter};
use super::{stream_priority, Session};
use crate::coding::Encode;
use crate::consumer::{SubgroupConsumer, TrackConsumer};
use crate::data::{Datagram, ObjectHeader, ObjectStatus};
use crate::message::{GroupOrder, SubscribeDone};
use crate::transport::{self, SendStream, TransportError};
use crate::util::Lock;
use crate::{PublishError, ResetCode};

/// The publishing side of one inbound subscription: fans objects out to
/// subgroup streams and datagrams, and finishes with SUBSCRIBE_DONE.
///
/// Returned to the application by [Session::subscribe_ok] as its
/// [TrackConsumer].
pub struct TrackPublisher<S: transport::Session> {
	session: Session<S>,
	webtransport: S,

	subscribe_id: u64,
	track_alias: u64,

	subscriber_priority: Arc<AtomicU8>,
	group_order: Lock<GroupOrder>,

	subgroups: Lock<HashMap<(u64, u64), StreamWriter<S>>>,

	// Set once subscribe_done was sent; all publishing fails afterwards.
	done: Arc<AtomicBool>,
}

impl<S: transport::Session> Clone for TrackPublisher<S> {
	fn clone(&self) -> Self {
		Self {
			session: self.session.clone(),
			webtransport: self.webtransport.clone(),
			subscribe_id: self.subscribe_id,
			track_alias: self.track_alias,
			subscriber_priority: self.subscriber_priority.clone(),
			group_order: self.group_order.clone(),
			subgroups: self.subgroups.clone(),
			done: self.done.clone(),
		}
	}
}

impl<S: transport::Session> TrackPublisher<S> {
	pub(super) fn new(
		session: Session<S>,
		webtransport: S,
		subscribe_id: u64,
		track_alias: u64,
		subscriber_priority: u8,
		group_order: GroupOrder,
	) -> Self {
		Self {
			session,
			webtransport,
			subscribe_id,
			track_alias,
			subscriber_priority: Arc::new(AtomicU8::new(subscriber_priority)),
			group_order: Lock::new(group_order),
			subgroups: Default::default(),
			done: Default::default(),
		}
	}

	pub(super) fn set_subscriber_priority(&self, priority: u8) {
		self.subscriber_priority.store(priority, Ordering::Relaxed);
	}

	/// Record the definitive group order once SUBSCRIBE_OK is sent.
	pub(super) fn set_group_order(&self, order: GroupOrder) {
		*self.group_order.lock() = order;
	}

	/// Reset every open subgroup stream, e.g. on session teardown.
	pub(super) fn reset(&self, code: ResetCode) {
		let writers: Vec<_> = std::mem::take(&mut *self.subgroups.lock()).into_values().collect();

		for writer in writers {
			writer.reset_stream(code);
		}
	}

	fn open_subgroup(&self, group: u64, subgroup: u64, publisher_priority: u8) -> Result<StreamWriter<S>, PublishError> {
		if self.done.load(Ordering::Relaxed) {
			tracing::error!("trying to publish after subscribe_done");
			return Err(PublishError::Api("publish after subscribe_done".into()));
		}

		let mut stream = match self.webtransport.clone().open_uni() {
			Ok(stream) => stream,
			Err(TransportError::Blocked) => {
				return Err(PublishError::Blocked("failed to create uni stream".into()))
			}
			Err(err) => return Err(PublishError::Write(err.to_string())),
		};

		let order = stream_priority(
			self.subscriber_priority.load(Ordering::Relaxed),
			publisher_priority,
			*self.group_order.lock(),
			group,
			subgroup,
		);
		stream.set_priority(1, order);

		let writer = StreamWriter::subgroup(
			stream,
			Owner::Track {
				subgroups: self.subgroups.clone(),
			},
			self.track_alias,
			group,
			subgroup,
			publisher_priority,
		)?;

		self.subgroups.lock().insert((group, subgroup), writer.clone());
		Ok(writer)
	}
}

impl<S: transport::Session> TrackConsumer for TrackPublisher<S> {
	fn begin_subgroup(
		&self,
		group: u64,
		subgroup: u64,
		publisher_priority: u8,
	) -> Result<Arc<dyn SubgroupConsumer>, PublishError> {
		let writer = self.open_subgroup(group, subgroup, publisher_priority)?;
		Ok(Arc::new(writer))
	}

	fn object_stream(&self, header: &ObjectHeader, payload: Bytes) -> Result<(), PublishError> {
		if header.status != ObjectStatus::Normal && !payload.is_empty() {
			return Err(PublishError::Api("payload on a status object".into()));
		}

		let subgroup = self.open_subgroup(header.group, header.subgroup, header.priority)?;

		match header.status {
			ObjectStatus::Normal => SubgroupConsumer::object(&subgroup, header.id, payload, true),
			ObjectStatus::ObjectNotExist => SubgroupConsumer::object_not_exists(&subgroup, header.id, true),
			ObjectStatus::GroupNotExist => subgroup.publish_status(header.id, ObjectStatus::GroupNotExist, true),
			ObjectStatus::EndOfGroup => SubgroupConsumer::end_of_group(&subgroup, header.id),
			ObjectStatus::EndOfTrackAndGroup => SubgroupConsumer::end_of_track_and_group(&subgroup, header.id),
			ObjectStatus::EndOfSubgroup => SubgroupConsumer::end_of_subgroup(&subgroup),
		}
	}

	fn group_not_exists(&self, group: u64, subgroup: u64, publisher_priority: u8) -> Result<(), PublishError> {
		self.object_stream(
			&ObjectHeader {
				track_identifier: self.track_alias,
				group,
				subgroup,
				id: 0,
				priority: publisher_priority,
				status: ObjectStatus::GroupNotExist,
				length: None,
			},
			Bytes::new(),
		)
	}

	fn datagram(&self, header: &ObjectHeader, payload: Bytes) -> Result<(), PublishError> {
		if self.done.load(Ordering::Relaxed) {
			tracing::error!("trying to publish after subscribe_done");
			return Err(PublishError::Api("publish after subscribe_done".into()));
		}

		if let Some(length) = header.length {
			if length != payload.len() as u64 {
				return Err(PublishError::Api("datagram length mismatch".into()));
			}
		}

		let datagram = Datagram {
			header: ObjectHeader {
				track_identifier: self.track_alias,
				group: header.group,
				subgroup: header.subgroup,
				id: header.id,
				priority: header.priority,
				status: header.status,
				length: Some(payload.len() as u64),
			},
			payload,
		};

		let mut buffer = bytes::BytesMut::new();
		datagram
			.encode(&mut buffer)
			.map_err(|err| PublishError::Api(err.to_string()))?;

		self.webtransport
			.clone()
			.send_datagram(buffer.freeze())
			.map_err(|_| PublishError::Write("send_datagram failed".into()))
	}

	fn subscribe_done(&self, mut done: SubscribeDone) -> Result<(), PublishError> {
		if self.done.swap(true, Ordering::Relaxed) {
			return Err(PublishError::Api("subscribe_done already sent".into()));
		}

		done.subscribe_id = self.subscribe_id;
		self.session.subscribe_done(done);

		Ok(())
	}

	fn await_stream_credit(&self) -> Result<BoxFuture<'static, Result<(), PublishError>>, PublishError> {
		if self.done.load(Ordering::Relaxed) {
			return Err(PublishError::Api("await_stream_credit after subscribe_done".into()));
		}

		let credit = self.webtransport.clone().uni_stream_credit();
		Ok(Box::pin(async move {
			credit.await.map_err(|err| PublishError::Write(err.to_string()))
		}))
	}
}
