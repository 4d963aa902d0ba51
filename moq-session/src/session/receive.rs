use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::coding::FullTrackName;
use crate::consumer::{FetchConsumer, TrackConsumer};
use crate::message::{self, FetchError, FetchOk, SubscribeDone, SubscribeError, SubscribeOk};
use crate::util::Lock;

/// The receiving side of one of our subscriptions, shared between the session
/// maps, the data stream readers, and the application.
#[derive(Clone)]
pub(super) struct SubscribeState {
	pub full_track_name: FullTrackName,
	pub subscribe_id: u64,

	shared: Lock<SubscribeShared>,
	token: CancellationToken,
}

struct SubscribeShared {
	callback: Option<Arc<dyn TrackConsumer>>,
	reply: Option<oneshot::Sender<Result<SubscribeOk, SubscribeError>>>,
}

impl SubscribeState {
	pub fn new(
		full_track_name: FullTrackName,
		subscribe_id: u64,
		callback: Arc<dyn TrackConsumer>,
		session: &CancellationToken,
	) -> (Self, oneshot::Receiver<Result<SubscribeOk, SubscribeError>>) {
		let (tx, rx) = oneshot::channel();

		let state = Self {
			full_track_name,
			subscribe_id,
			shared: Lock::new(SubscribeShared {
				callback: Some(callback),
				reply: Some(tx),
			}),
			token: session.child_token(),
		};

		(state, rx)
	}

	pub fn token(&self) -> CancellationToken {
		self.token.clone()
	}

	pub fn callback(&self) -> Option<Arc<dyn TrackConsumer>> {
		self.shared.lock().callback.clone()
	}

	/// Detach the consumer and stop any stream tasks; dispatch becomes a no-op.
	pub fn cancel(&self) {
		self.shared.lock().callback = None;
		self.token.cancel();
	}

	pub fn subscribe_ok(&self, ok: SubscribeOk) {
		if let Some(reply) = self.shared.lock().reply.take() {
			reply.send(Ok(ok)).ok();
		}
	}

	/// Fail the request future; if it was already fulfilled, this degrades to
	/// a SUBSCRIBE_DONE(SESSION_CLOSED) for the consumer.
	pub fn subscribe_error(&self, mut err: SubscribeError) {
		let reply = self.shared.lock().reply.take();

		match reply {
			Some(reply) => {
				err.subscribe_id = self.subscribe_id;
				reply.send(Err(err)).ok();
			}
			None => self.subscribe_done(SubscribeDone {
				subscribe_id: self.subscribe_id,
				status_code: message::status::SESSION_CLOSED,
				reason: "closed locally".into(),
				last: None,
			}),
		}
	}

	pub fn subscribe_done(&self, done: SubscribeDone) {
		let callback = self.shared.lock().callback.clone();

		if let Some(callback) = callback {
			callback.subscribe_done(done).ok();
		} // else, unsubscribe raced with subscribe_done and the callback was removed
	}
}

/// The receiving side of one of our fetches.
#[derive(Clone)]
pub(super) struct FetchState {
	pub full_track_name: FullTrackName,
	pub subscribe_id: u64,

	shared: Lock<FetchShared>,
	token: CancellationToken,
}

struct FetchShared {
	callback: Option<Arc<dyn FetchConsumer>>,
	reply: Option<oneshot::Sender<Result<FetchOk, FetchError>>>,
}

impl FetchState {
	pub fn new(
		full_track_name: FullTrackName,
		subscribe_id: u64,
		callback: Arc<dyn FetchConsumer>,
		session: &CancellationToken,
	) -> (Self, oneshot::Receiver<Result<FetchOk, FetchError>>) {
		let (tx, rx) = oneshot::channel();

		let state = Self {
			full_track_name,
			subscribe_id,
			shared: Lock::new(FetchShared {
				callback: Some(callback),
				reply: Some(tx),
			}),
			token: session.child_token(),
		};

		(state, rx)
	}

	pub fn token(&self) -> CancellationToken {
		self.token.clone()
	}

	pub fn callback(&self) -> Option<Arc<dyn FetchConsumer>> {
		self.shared.lock().callback.clone()
	}

	pub fn cancel(&self) {
		self.token.cancel();
		self.release_callback();
	}

	/// Drop the consumer once the stream is finished with it.
	pub fn release_callback(&self) {
		self.shared.lock().callback = None;
	}

	pub fn fetch_ok(&self, ok: FetchOk) {
		if let Some(reply) = self.shared.lock().reply.take() {
			reply.send(Ok(ok)).ok();
		}
	}

	pub fn fetch_error(&self, mut err: FetchError) {
		if let Some(reply) = self.shared.lock().reply.take() {
			err.subscribe_id = self.subscribe_id;
			reply.send(Err(err)).ok();
		}
	}

	/// The entry is removable once the reply was delivered and the stream no
	/// longer needs the callback.
	pub fn ok_and_all_data_received(&self) -> bool {
		let shared = self.shared.lock();
		shared.reply.is_none() && shared.callback.is_none()
	}
}
