//! The application surface: callbacks the session invokes on received data,
//! and the handles it returns for publishing.
//!
//! The same traits cover both directions. On the subscriber side the
//! application implements them; on the publisher side the session returns its
//! own implementations that write to the wire.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::data::ObjectHeader;
use crate::message::SubscribeDone;
use crate::session::SessionError;
use crate::setup::{ClientSetup, ServerSetup};
use crate::{PublishError, PublishStatus, ResetCode};

fn ready_now() -> Result<BoxFuture<'static, Result<(), PublishError>>, PublishError> {
	Ok(Box::pin(async { Ok(()) }))
}

/// One track of a subscription: receives subgroups, datagrams, and the final
/// SUBSCRIBE_DONE.
pub trait TrackConsumer: Send + Sync {
	/// A new subgroup begins; everything on it goes to the returned consumer.
	fn begin_subgroup(
		&self,
		group: u64,
		subgroup: u64,
		publisher_priority: u8,
	) -> Result<Arc<dyn SubgroupConsumer>, PublishError>;

	/// A single-object subgroup, opened and finished in one call.
	fn object_stream(&self, header: &ObjectHeader, payload: Bytes) -> Result<(), PublishError>;

	/// The whole group does not exist.
	fn group_not_exists(&self, group: u64, subgroup: u64, publisher_priority: u8) -> Result<(), PublishError>;

	/// An object delivered outside any stream.
	fn datagram(&self, header: &ObjectHeader, payload: Bytes) -> Result<(), PublishError>;

	/// No further objects will arrive for this subscription.
	fn subscribe_done(&self, done: SubscribeDone) -> Result<(), PublishError>;

	/// Resolves when a new subgroup stream can be opened (publisher side).
	fn await_stream_credit(&self) -> Result<BoxFuture<'static, Result<(), PublishError>>, PublishError> {
		ready_now()
	}
}

/// One subgroup stream, delivering objects in order.
pub trait SubgroupConsumer: Send + Sync {
	/// A complete object. `fin_subgroup` means the subgroup ended with it.
	fn object(&self, object_id: u64, payload: Bytes, fin_subgroup: bool) -> Result<(), PublishError>;

	fn object_not_exists(&self, object_id: u64, fin_subgroup: bool) -> Result<(), PublishError>;

	/// The start of an object whose payload arrives in chunks.
	fn begin_object(&self, object_id: u64, length: u64, initial: Bytes) -> Result<(), PublishError>;

	/// More payload for the in-progress object. Returns whether the object is
	/// now complete; `fin_subgroup` is illegal while payload remains.
	fn object_payload(&self, payload: Bytes, fin_subgroup: bool) -> Result<PublishStatus, PublishError>;

	fn end_of_group(&self, object_id: u64) -> Result<(), PublishError>;
	fn end_of_track_and_group(&self, object_id: u64) -> Result<(), PublishError>;
	fn end_of_subgroup(&self) -> Result<(), PublishError>;

	/// The stream was reset; no further callbacks.
	fn reset(&self, code: ResetCode);

	/// Resolves when the stream can absorb more data (publisher side).
	fn ready(&self) -> Result<BoxFuture<'static, Result<(), PublishError>>, PublishError> {
		ready_now()
	}
}

/// A fetch response stream: like a subgroup, but objects carry their location
/// and may span groups.
pub trait FetchConsumer: Send + Sync {
	fn object(
		&self,
		group: u64,
		subgroup: u64,
		object_id: u64,
		payload: Bytes,
		fin_fetch: bool,
	) -> Result<(), PublishError>;

	fn object_not_exists(&self, group: u64, subgroup: u64, object_id: u64, fin_fetch: bool)
		-> Result<(), PublishError>;

	fn group_not_exists(&self, group: u64, subgroup: u64, fin_fetch: bool) -> Result<(), PublishError>;

	fn begin_object(
		&self,
		group: u64,
		subgroup: u64,
		object_id: u64,
		length: u64,
		initial: Bytes,
	) -> Result<(), PublishError>;

	fn object_payload(&self, payload: Bytes, fin_fetch: bool) -> Result<PublishStatus, PublishError>;

	fn end_of_group(&self, group: u64, subgroup: u64, object_id: u64, fin_fetch: bool) -> Result<(), PublishError>;
	fn end_of_track_and_group(&self, group: u64, subgroup: u64, object_id: u64) -> Result<(), PublishError>;

	/// The fetch delivered everything it will deliver.
	fn end_of_fetch(&self) -> Result<(), PublishError>;

	/// The stream was reset; no further callbacks.
	fn reset(&self, code: ResetCode);

	/// Resolves when the stream can absorb more data (publisher side).
	fn ready(&self) -> Result<BoxFuture<'static, Result<(), PublishError>>, PublishError> {
		ready_now()
	}
}

/// Resolves an inbound CLIENT_SETUP into the SERVER_SETUP to send back.
pub trait ServerSetupCallback: Send + Sync {
	fn on_client_setup(&self, setup: ClientSetup) -> Result<ServerSetup, SessionError>;
}
