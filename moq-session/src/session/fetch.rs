use std::sync::Arc;

use super::writer::{Owner, StreamWriter};
use super::{stream_priority, Session};
use crate::consumer::FetchConsumer;
use crate::message::GroupOrder;
use crate::transport::{self, SendStream, TransportError};
use crate::util::Lock;
use crate::{PublishError, ResetCode};

/// The publishing side of one inbound fetch: a single stream, opened when the
/// application accepts with FETCH_OK.
pub struct FetchPublisher<S: transport::Session> {
	session: Session<S>,
	webtransport: S,

	subscribe_id: u64,
	subscriber_priority: u8,
	group_order: Lock<GroupOrder>,

	stream: Lock<Option<StreamWriter<S>>>,
}

impl<S: transport::Session> Clone for FetchPublisher<S> {
	fn clone(&self) -> Self {
		Self {
			session: self.session.clone(),
			webtransport: self.webtransport.clone(),
			subscribe_id: self.subscribe_id,
			subscriber_priority: self.subscriber_priority,
			group_order: self.group_order.clone(),
			stream: self.stream.clone(),
		}
	}
}

impl<S: transport::Session> FetchPublisher<S> {
	pub(super) fn new(
		session: Session<S>,
		webtransport: S,
		subscribe_id: u64,
		subscriber_priority: u8,
		group_order: GroupOrder,
	) -> Self {
		Self {
			session,
			webtransport,
			subscribe_id,
			subscriber_priority,
			group_order: Lock::new(group_order),
			stream: Default::default(),
		}
	}

	/// Open the response stream at the agreed group order.
	pub(super) fn begin_fetch(&self, group_order: GroupOrder) -> Result<Arc<dyn FetchConsumer>, PublishError> {
		if self.stream.lock().is_some() {
			return Err(PublishError::Api("fetch stream already open".into()));
		}

		*self.group_order.lock() = group_order;

		let mut stream = match self.webtransport.clone().open_uni() {
			Ok(stream) => stream,
			Err(TransportError::Blocked) => {
				return Err(PublishError::Blocked("failed to create uni stream".into()))
			}
			Err(err) => return Err(PublishError::Write(err.to_string())),
		};

		// Fetch responses schedule on the subscriber priority alone.
		stream.set_priority(1, stream_priority(self.subscriber_priority, 0, group_order, 0, 0));

		let writer = StreamWriter::fetch(
			stream,
			Owner::Fetch {
				session: self.session.clone(),
				subscribe_id: self.subscribe_id,
			},
			self.subscribe_id,
		)?;

		*self.stream.lock() = Some(writer.clone());
		Ok(Arc::new(writer))
	}

	pub(super) fn reset(&self, code: ResetCode) {
		let writer = self.stream.lock().take();

		if let Some(writer) = writer {
			writer.reset_stream(code);
		}
	}
}
