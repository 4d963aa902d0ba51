//! The per-connection session engine: control-plane correlation, data-plane
//! stream routing, subscribe ID credit, and teardown.
mod control;
mod error;
mod fetch;
mod priority;
mod reader;
mod receive;
mod track;
mod writer;

pub use error::*;
pub use fetch::FetchPublisher;
pub use priority::*;
pub use track::TrackPublisher;

use std::collections::HashMap;
use std::io::Cursor;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use control::ControlChannel;
use receive::{FetchState, SubscribeState};

use crate::coding::{Decode, DecodeError, Encode, FullTrackName, Params, TrackNamespace};
use crate::consumer::{FetchConsumer, ServerSetupCallback, TrackConsumer};
use crate::data::Datagram;
use crate::message::{self, fetch_error, GroupOrder, Message};
use crate::setup::{ClientSetup, ServerSetup, Version};
use crate::transport::{self, RecvStream, SendStream};
use crate::util::{Lock, Queue};
use crate::{CloseCode, ResetCode};

const SETUP_TIMEOUT: Duration = Duration::from_secs(5);

/// A control message handed to the application for a decision or as a
/// notification; replies go back through the [Session] verbs.
#[derive(Clone, Debug)]
pub enum SessionMessage {
	Subscribe(message::Subscribe),
	SubscribeUpdate(message::SubscribeUpdate),
	Unsubscribe(message::Unsubscribe),
	Fetch(message::Fetch),
	Announce(message::Announce),
	Unannounce(message::Unannounce),
	AnnounceCancel(message::AnnounceCancel),
	SubscribeAnnounces(message::SubscribeAnnounces),
	UnsubscribeAnnounces(message::UnsubscribeAnnounces),
	TrackStatusRequest(message::TrackStatusRequest),
	TrackStatus(message::TrackStatus),
	GoAway(message::GoAway),
}

// The publishing side of an inbound subscribe or fetch.
enum Publisher<S: transport::Session> {
	Track(TrackPublisher<S>),
	Fetch(FetchPublisher<S>),
}

impl<S: transport::Session> Clone for Publisher<S> {
	fn clone(&self) -> Self {
		match self {
			Self::Track(p) => Self::Track(p.clone()),
			Self::Fetch(p) => Self::Fetch(p.clone()),
		}
	}
}

impl<S: transport::Session> Publisher<S> {
	fn reset(&self, code: ResetCode) {
		match self {
			Self::Track(p) => p.reset(code),
			Self::Fetch(p) => p.reset(code),
		}
	}
}

struct State<S: transport::Session> {
	// Inbound subscribes and fetches we are serving, by subscribe ID.
	pub_tracks: HashMap<u64, Publisher<S>>,

	// Outbound subscribes, by track alias, plus the ID index.
	sub_tracks: HashMap<u64, SubscribeState>,
	sub_id_to_alias: HashMap<u64, u64>,

	// Outbound fetches, by subscribe ID.
	fetches: HashMap<u64, FetchState>,

	pending_announces: HashMap<TrackNamespace, oneshot::Sender<Result<message::AnnounceOk, message::AnnounceError>>>,
	pending_subscribe_announces:
		HashMap<TrackNamespace, oneshot::Sender<Result<message::SubscribeAnnouncesOk, message::SubscribeAnnouncesError>>>,

	// Outbound ID allocation and the sliding credit window (§ subscribe IDs
	// are shared between subscribes and fetches).
	next_subscribe_id: u64,
	max_subscribe_id: u64,
	peer_max_subscribe_id: u64,
	max_concurrent_subscribes: u64,
	closed_subscribes: u64,

	draining: bool,
	closed: bool,
}

/// One MoQ session over a WebTransport connection.
///
/// Cheap to clone; all clones share the same session. Returned established:
/// [Session::connect] and [Session::accept] perform the setup exchange and
/// spawn the control and data loops before returning.
pub struct Session<S: transport::Session> {
	webtransport: S,
	state: Lock<State<S>>,
	control: ControlChannel,
	messages: Queue<SessionMessage>,
	token: CancellationToken,
}

impl<S: transport::Session> Clone for Session<S> {
	fn clone(&self) -> Self {
		Self {
			webtransport: self.webtransport.clone(),
			state: self.state.clone(),
			control: self.control.clone(),
			messages: self.messages.clone(),
			token: self.token.clone(),
		}
	}
}

impl<S: transport::Session> Session<S> {
	fn new(webtransport: S, max_subscribe_id: u64, peer_max_subscribe_id: u64) -> Self {
		Self {
			webtransport,
			state: Lock::new(State {
				pub_tracks: Default::default(),
				sub_tracks: Default::default(),
				sub_id_to_alias: Default::default(),
				fetches: Default::default(),
				pending_announces: Default::default(),
				pending_subscribe_announces: Default::default(),
				next_subscribe_id: 0,
				max_subscribe_id,
				peer_max_subscribe_id,
				max_concurrent_subscribes: max_subscribe_id,
				closed_subscribes: 0,
				draining: false,
				closed: false,
			}),
			control: Default::default(),
			messages: Default::default(),
			token: CancellationToken::new(),
		}
	}

	/// Open the control stream, perform the setup exchange as the client, and
	/// start the session.
	#[tracing::instrument("connect", skip_all, err)]
	pub async fn connect(mut webtransport: S, setup: ClientSetup) -> Result<(Self, ServerSetup), SessionError> {
		let (mut send, recv) = webtransport.open_bi().await?;
		send.set_priority(0, 0);

		let max_subscribe_id = setup.max_subscribe_id();

		tracing::debug!(versions = ?setup.versions, "sending client setup");
		let mut buffer = BytesMut::new();
		Message::ClientSetup(setup).encode(&mut buffer)?;
		send.write(buffer.freeze(), false)?;

		let mut recv = recv;
		let mut pending = BytesMut::new();
		let reply = match tokio::time::timeout(SETUP_TIMEOUT, read_message(&mut recv, &mut pending)).await {
			Ok(reply) => reply,
			Err(_) => {
				webtransport.close(CloseCode::InternalError.into(), "setup timeout");
				return Err(SessionError::SetupTimeout);
			}
		};

		let server = match reply {
			Ok(Message::ServerSetup(server)) => server,
			Ok(msg) => {
				webtransport.close(CloseCode::ProtocolViolation.into(), "expected server setup");
				return Err(SessionError::ProtocolViolation(format!(
					"expected server setup, got {}",
					msg.name()
				)));
			}
			Err(err) => {
				webtransport.close(CloseCode::ProtocolViolation.into(), "setup failed");
				return Err(err);
			}
		};

		tracing::debug!(version = ?server.selected_version, "received server setup");

		if server.selected_version != Version::CURRENT {
			webtransport.close(CloseCode::ProtocolViolation.into(), "unsupported version");
			return Err(SessionError::Version(
				[server.selected_version].into(),
				[Version::CURRENT].into(),
			));
		}

		let session = Self::new(webtransport, max_subscribe_id, server.max_subscribe_id());
		session.spawn_loops(send, recv, pending);

		Ok((session, server))
	}

	/// Accept the control stream, perform the setup exchange as the server,
	/// and start the session.
	#[tracing::instrument("accept", skip_all, err)]
	pub async fn accept(mut webtransport: S, callback: Arc<dyn ServerSetupCallback>) -> Result<Self, SessionError> {
		let (mut send, mut recv) = webtransport.accept_bi().await?;
		send.set_priority(0, 0);

		let mut pending = BytesMut::new();
		let request = match tokio::time::timeout(SETUP_TIMEOUT, read_message(&mut recv, &mut pending)).await {
			Ok(request) => request,
			Err(_) => {
				webtransport.close(CloseCode::InternalError.into(), "setup timeout");
				return Err(SessionError::SetupTimeout);
			}
		};

		let client = match request {
			Ok(Message::ClientSetup(client)) => client,
			Ok(msg) => {
				webtransport.close(CloseCode::ProtocolViolation.into(), "expected client setup");
				return Err(SessionError::ProtocolViolation(format!(
					"expected client setup, got {}",
					msg.name()
				)));
			}
			Err(err) => {
				webtransport.close(CloseCode::ProtocolViolation.into(), "setup failed");
				return Err(err);
			}
		};

		tracing::debug!(versions = ?client.versions, "received client setup");

		if !client.versions.contains(&Version::CURRENT) {
			webtransport.close(CloseCode::ProtocolViolation.into(), "no matching version");
			return Err(SessionError::Version(client.versions, [Version::CURRENT].into()));
		}

		let peer_max_subscribe_id = client.max_subscribe_id();

		let server = match callback.on_client_setup(client) {
			Ok(server) => server,
			Err(err) => {
				tracing::error!(%err, "server setup callback failed");
				webtransport.close(CloseCode::InternalError.into(), "setup rejected");
				return Err(err);
			}
		};

		let max_subscribe_id = server.max_subscribe_id();

		tracing::debug!(version = ?server.selected_version, "sending server setup");
		let mut buffer = BytesMut::new();
		Message::ServerSetup(server).encode(&mut buffer)?;
		send.write(buffer.freeze(), false)?;

		let session = Self::new(webtransport, max_subscribe_id, peer_max_subscribe_id);
		session.spawn_loops(send, recv, pending);

		Ok(session)
	}

	fn spawn_loops(&self, send: S::SendStream, recv: S::RecvStream, pending: BytesMut) {
		let this = self.clone();
		let stopped = send.stopped();
		tokio::spawn(async move {
			tokio::select! {
				_ = this.token.cancelled() => {}
				_ = stopped.cancelled() => {}
				res = this.control.write_loop(send) => {
					if let Err(err) = res {
						tracing::error!(%err, "control write loop failed");
						this.close_with(err);
					}
				}
			}
		});

		let this = self.clone();
		tokio::spawn(async move { this.control_read_loop(recv, pending).await });

		let this = self.clone();
		tokio::spawn(async move { this.accept_uni_loop().await });

		let this = self.clone();
		tokio::spawn(async move { this.datagram_loop().await });
	}

	async fn control_read_loop(&self, mut stream: S::RecvStream, mut buffer: BytesMut) {
		let mut fin = false;

		loop {
			loop {
				let mut cursor = Cursor::new(&buffer);
				match Message::decode(&mut cursor) {
					Ok(msg) => {
						let size = cursor.position() as usize;
						buffer.advance(size);
						self.recv_message(msg);

						if self.token.is_cancelled() {
							return;
						}
					}
					Err(DecodeError::More(_)) => break,
					Err(err) => {
						tracing::error!(%err, "control stream parse error");
						self.close_with(SessionError::Decode(err));
						return;
					}
				}
			}

			if fin {
				// The control stream must stay open for the session's life.
				self.close_with(SessionError::ProtocolViolation("control stream closed".into()));
				return;
			}

			tokio::select! {
				_ = self.token.cancelled() => return,
				res = stream.read() => match res {
					Ok(data) => {
						buffer.extend_from_slice(&data.data);
						fin = data.fin;
					}
					Err(err) => {
						tracing::debug!(%err, "control stream read failed");
						self.close_with(err.into());
						return;
					}
				}
			}
		}
	}

	async fn accept_uni_loop(&self) {
		let mut webtransport = self.webtransport.clone();

		loop {
			tokio::select! {
				_ = self.token.cancelled() => return,
				res = webtransport.accept_uni() => match res {
					Ok(stream) => {
						let session = self.clone();
						tokio::spawn(async move { reader::run(session, stream).await });
					}
					Err(err) => {
						tracing::debug!(%err, "accept uni failed");
						self.close_with(err.into());
						return;
					}
				}
			}
		}
	}

	async fn datagram_loop(&self) {
		let mut webtransport = self.webtransport.clone();

		loop {
			let payload = tokio::select! {
				_ = self.token.cancelled() => return,
				res = webtransport.recv_datagram() => match res {
					Ok(payload) => payload,
					Err(err) => {
						tracing::debug!(%err, "recv datagram failed");
						self.close_with(err.into());
						return;
					}
				}
			};

			let datagram = match Datagram::parse(payload) {
				Ok(datagram) => datagram,
				Err(err) => {
					tracing::error!(%err, "bad datagram");
					self.close_with(SessionError::Decode(err));
					return;
				}
			};

			let state = self.subscribe_state(datagram.header.track_identifier);
			if let Some(state) = state {
				if let Some(callback) = state.callback() {
					callback.datagram(&datagram.header, datagram.payload).ok();
				}
			} else {
				tracing::warn!(alias = datagram.header.track_identifier, "datagram for unknown track");
			}
		}
	}

	// Inbound control dispatch.
	fn recv_message(&self, msg: Message) {
		tracing::debug!(name = msg.name(), "control recv");

		match msg {
			Message::ClientSetup(_) | Message::ServerSetup(_) => {
				self.close_with(SessionError::ProtocolViolation("setup after establishment".into()));
			}
			Message::Subscribe(msg) => self.recv_subscribe(msg),
			Message::SubscribeUpdate(msg) => self.recv_subscribe_update(msg),
			Message::Unsubscribe(msg) => self.messages.push(SessionMessage::Unsubscribe(msg)),
			Message::SubscribeOk(msg) => self.recv_subscribe_ok(msg),
			Message::SubscribeError(msg) => self.recv_subscribe_error(msg),
			Message::SubscribeDone(msg) => self.recv_subscribe_done(msg),
			Message::MaxSubscribeId(msg) => self.recv_max_subscribe_id(msg),
			Message::Fetch(msg) => self.recv_fetch(msg),
			Message::FetchCancel(msg) => self.recv_fetch_cancel(msg),
			Message::FetchOk(msg) => self.recv_fetch_ok(msg),
			Message::FetchError(msg) => self.recv_fetch_error(msg),
			Message::Announce(msg) => self.messages.push(SessionMessage::Announce(msg)),
			Message::AnnounceOk(msg) => self.recv_announce_ok(msg),
			Message::AnnounceError(msg) => self.recv_announce_error(msg),
			Message::Unannounce(msg) => self.messages.push(SessionMessage::Unannounce(msg)),
			Message::AnnounceCancel(msg) => self.messages.push(SessionMessage::AnnounceCancel(msg)),
			Message::SubscribeAnnounces(msg) => self.messages.push(SessionMessage::SubscribeAnnounces(msg)),
			Message::SubscribeAnnouncesOk(msg) => self.recv_subscribe_announces_ok(msg),
			Message::SubscribeAnnouncesError(msg) => self.recv_subscribe_announces_error(msg),
			Message::UnsubscribeAnnounces(msg) => self.messages.push(SessionMessage::UnsubscribeAnnounces(msg)),
			Message::TrackStatusRequest(msg) => self.messages.push(SessionMessage::TrackStatusRequest(msg)),
			Message::TrackStatus(msg) => self.messages.push(SessionMessage::TrackStatus(msg)),
			Message::GoAway(msg) => self.messages.push(SessionMessage::GoAway(msg)),
		}
	}

	fn recv_subscribe(&self, msg: message::Subscribe) {
		enum Outcome {
			TooMany,
			Duplicate,
			Accepted,
		}

		let outcome = {
			let mut state = self.state.lock();

			if msg.subscribe_id >= state.max_subscribe_id {
				Outcome::TooMany
			} else if state.pub_tracks.contains_key(&msg.subscribe_id) {
				Outcome::Duplicate
			} else {
				let publisher = TrackPublisher::new(
					self.clone(),
					self.webtransport.clone(),
					msg.subscribe_id,
					msg.track_alias,
					msg.subscriber_priority,
					msg.group_order,
				);
				state.pub_tracks.insert(msg.subscribe_id, Publisher::Track(publisher));
				Outcome::Accepted
			}
		};

		match outcome {
			Outcome::TooMany => self.close_with(SessionError::TooManySubscribes(msg.subscribe_id)),
			Outcome::Duplicate => {
				tracing::error!(id = msg.subscribe_id, "duplicate subscribe id");
				self.control
					.send(message::SubscribeError {
						subscribe_id: msg.subscribe_id,
						code: 400,
						reason: "dup sub id".into(),
						track_alias: msg.track_alias,
					})
					.ok();
			}
			Outcome::Accepted => self.messages.push(SessionMessage::Subscribe(msg)),
		}
	}

	fn recv_subscribe_update(&self, msg: message::SubscribeUpdate) {
		let (known, too_many) = {
			let state = self.state.lock();
			(
				state.pub_tracks.contains_key(&msg.subscribe_id),
				msg.subscribe_id >= state.max_subscribe_id,
			)
		};

		if !known {
			tracing::error!(id = msg.subscribe_id, "subscribe update for unknown id");
			return;
		}

		if too_many {
			self.close_with(SessionError::TooManySubscribes(msg.subscribe_id));
			return;
		}

		if let Some(Publisher::Track(publisher)) = self.publisher(msg.subscribe_id) {
			publisher.set_subscriber_priority(msg.subscriber_priority);
		}

		self.messages.push(SessionMessage::SubscribeUpdate(msg));
	}

	fn recv_subscribe_ok(&self, msg: message::SubscribeOk) {
		match self.subscribe_state_by_id(msg.subscribe_id) {
			Some(state) => state.subscribe_ok(msg),
			None => tracing::error!(id = msg.subscribe_id, "subscribe ok for unknown id"),
		}
	}

	fn recv_subscribe_error(&self, msg: message::SubscribeError) {
		let removed = self.remove_subscribe(msg.subscribe_id);

		match removed {
			Some(state) => {
				state.subscribe_error(msg);
				self.check_drain();
			}
			None => tracing::error!(id = msg.subscribe_id, "subscribe error for unknown id"),
		}
	}

	fn recv_subscribe_done(&self, msg: message::SubscribeDone) {
		let removed = self.remove_subscribe(msg.subscribe_id);

		match removed {
			Some(state) => {
				tracing::debug!(id = msg.subscribe_id, code = msg.status_code, "subscribe done");
				state.subscribe_done(msg);
				self.check_drain();
			}
			None => tracing::error!(id = msg.subscribe_id, "subscribe done for unknown id"),
		}
	}

	fn recv_max_subscribe_id(&self, msg: message::MaxSubscribeId) {
		let accepted = {
			let mut state = self.state.lock();
			if msg.subscribe_id > state.peer_max_subscribe_id {
				tracing::debug!(
					from = state.peer_max_subscribe_id,
					to = msg.subscribe_id,
					"bumping peer max subscribe id"
				);
				state.peer_max_subscribe_id = msg.subscribe_id;
				true
			} else {
				false
			}
		};

		if !accepted {
			// The bound can only grow.
			self.close_with(SessionError::ProtocolViolation("max subscribe id regressed".into()));
		}
	}

	fn recv_fetch(&self, msg: message::Fetch) {
		enum Outcome {
			TooMany,
			InvalidRange,
			Duplicate,
			Accepted,
		}

		let outcome = {
			let mut state = self.state.lock();

			if msg.subscribe_id >= state.max_subscribe_id {
				Outcome::TooMany
			} else if msg.end < msg.start {
				Outcome::InvalidRange
			} else if state.pub_tracks.contains_key(&msg.subscribe_id) {
				Outcome::Duplicate
			} else {
				let publisher = FetchPublisher::new(
					self.clone(),
					self.webtransport.clone(),
					msg.subscribe_id,
					msg.subscriber_priority,
					msg.group_order,
				);
				state.pub_tracks.insert(msg.subscribe_id, Publisher::Fetch(publisher));
				Outcome::Accepted
			}
		};

		match outcome {
			Outcome::TooMany => self.close_with(SessionError::TooManySubscribes(msg.subscribe_id)),
			Outcome::InvalidRange => {
				self.control
					.send(message::FetchError {
						subscribe_id: msg.subscribe_id,
						code: fetch_error::INVALID_RANGE,
						reason: "end must be after start".into(),
					})
					.ok();
				// The peer consumed the ID even though we never built state.
				self.retire_subscribe_id();
			}
			Outcome::Duplicate => {
				tracing::error!(id = msg.subscribe_id, "duplicate subscribe id");
				self.control
					.send(message::FetchError {
						subscribe_id: msg.subscribe_id,
						code: 400,
						reason: "dup sub id".into(),
					})
					.ok();
			}
			Outcome::Accepted => self.messages.push(SessionMessage::Fetch(msg)),
		}
	}

	fn recv_fetch_cancel(&self, msg: message::FetchCancel) {
		let publisher = self.state.lock().pub_tracks.remove(&msg.subscribe_id);

		match publisher {
			// The fetch stream already closed, or never existed; a no-op is fine.
			None => tracing::debug!(id = msg.subscribe_id, "fetch cancel for unknown id"),
			Some(publisher) => {
				publisher.reset(ResetCode::Cancelled);
				self.retire_subscribe_id();
			}
		}
	}

	fn recv_fetch_ok(&self, msg: message::FetchOk) {
		let state = self.fetch_state(msg.subscribe_id);

		match state {
			Some(state) => {
				state.fetch_ok(msg);

				// The data may have finished before the OK arrived.
				if state.ok_and_all_data_received() {
					self.state.lock().fetches.remove(&state.subscribe_id);
					self.check_drain();
				}
			}
			None => tracing::error!(id = msg.subscribe_id, "fetch ok for unknown id"),
		}
	}

	fn recv_fetch_error(&self, msg: message::FetchError) {
		let removed = self.state.lock().fetches.remove(&msg.subscribe_id);

		match removed {
			Some(state) => {
				state.fetch_error(msg);
				self.check_drain();
			}
			None => tracing::error!(id = msg.subscribe_id, "fetch error for unknown id"),
		}
	}

	fn recv_announce_ok(&self, msg: message::AnnounceOk) {
		let reply = self.state.lock().pending_announces.remove(&msg.namespace);

		match reply {
			Some(reply) => {
				reply.send(Ok(msg)).ok();
			}
			None => tracing::error!(namespace = ?msg.namespace, "announce ok for unknown namespace"),
		}
	}

	fn recv_announce_error(&self, msg: message::AnnounceError) {
		let reply = self.state.lock().pending_announces.remove(&msg.namespace);

		match reply {
			Some(reply) => {
				reply.send(Err(msg)).ok();
			}
			None => tracing::error!(namespace = ?msg.namespace, "announce error for unknown namespace"),
		}
	}

	fn recv_subscribe_announces_ok(&self, msg: message::SubscribeAnnouncesOk) {
		let reply = self.state.lock().pending_subscribe_announces.remove(&msg.prefix);

		match reply {
			Some(reply) => {
				reply.send(Ok(msg)).ok();
			}
			None => tracing::error!(prefix = ?msg.prefix, "subscribe announces ok for unknown prefix"),
		}
	}

	fn recv_subscribe_announces_error(&self, msg: message::SubscribeAnnouncesError) {
		let reply = self.state.lock().pending_subscribe_announces.remove(&msg.prefix);

		match reply {
			Some(reply) => {
				reply.send(Err(msg)).ok();
			}
			None => tracing::error!(prefix = ?msg.prefix, "subscribe announces error for unknown prefix"),
		}
	}

	// Subscriber-side verbs.

	/// Subscribe to a track; objects arrive via `callback`. Resolves once the
	/// publisher replies.
	pub async fn subscribe(
		&self,
		full_track_name: FullTrackName,
		subscriber_priority: u8,
		group_order: GroupOrder,
		params: Params,
		callback: Arc<dyn TrackConsumer>,
	) -> Result<message::SubscribeOk, message::SubscribeError> {
		let (subscribe_id, track_alias, reply) = {
			let mut state = self.state.lock();

			if state.closed {
				return Err(subscribe_closed(0, 0));
			}

			if state.next_subscribe_id >= state.peer_max_subscribe_id {
				tracing::warn!(
					next = state.next_subscribe_id,
					peer_max = state.peer_max_subscribe_id,
					"issuing subscribe that will fail"
				);
			}

			let subscribe_id = state.next_subscribe_id;
			state.next_subscribe_id += 1;

			// The alias is ours to choose; reuse the ID.
			let track_alias = subscribe_id;

			let (sub, reply) = SubscribeState::new(full_track_name.clone(), subscribe_id, callback, &self.token);
			state.sub_id_to_alias.insert(subscribe_id, track_alias);
			state.sub_tracks.insert(track_alias, sub);

			(subscribe_id, track_alias, reply)
		};

		let msg = message::Subscribe {
			subscribe_id,
			track_alias,
			full_track_name,
			subscriber_priority,
			group_order,
			params,
		};

		if self.control.send(msg).is_err() {
			self.remove_subscribe(subscribe_id);
			return Err(message::SubscribeError {
				subscribe_id,
				code: 500,
				reason: "local write failed".into(),
				track_alias,
			});
		}

		match reply.await {
			Ok(result) => result,
			Err(_) => Err(subscribe_closed(subscribe_id, track_alias)),
		}
	}

	/// Stop a subscription; the publisher still replies with SUBSCRIBE_DONE,
	/// which removes the local state.
	pub fn unsubscribe(&self, subscribe_id: u64) {
		let state = self.subscribe_state_by_id(subscribe_id);

		let state = match state {
			Some(state) => state,
			None => {
				tracing::error!(id = subscribe_id, "unsubscribe for unknown id");
				return;
			}
		};

		tracing::debug!(track = ?state.full_track_name, "unsubscribing");

		// No more callbacks after unsubscribe.
		state.cancel();
		self.control.send(message::Unsubscribe { subscribe_id }).ok();
	}

	/// Adjust the priority of a live subscription.
	pub fn subscribe_update(&self, msg: message::SubscribeUpdate) {
		let known = self.state.lock().sub_id_to_alias.contains_key(&msg.subscribe_id);

		if !known {
			tracing::error!(id = msg.subscribe_id, "subscribe update for unknown id");
			return;
		}

		self.control.send(msg).ok();
	}

	/// Fetch a bounded range of objects; they arrive via `callback`. Resolves
	/// once the publisher replies.
	pub async fn fetch(
		&self,
		full_track_name: FullTrackName,
		subscriber_priority: u8,
		group_order: GroupOrder,
		start: message::Location,
		end: message::Location,
		params: Params,
		callback: Arc<dyn FetchConsumer>,
	) -> Result<message::FetchOk, message::FetchError> {
		let (subscribe_id, reply) = {
			let mut state = self.state.lock();

			if state.closed {
				return Err(fetch_closed(0));
			}

			if state.next_subscribe_id >= state.peer_max_subscribe_id {
				tracing::warn!(
					next = state.next_subscribe_id,
					peer_max = state.peer_max_subscribe_id,
					"issuing fetch that will fail"
				);
			}

			let subscribe_id = state.next_subscribe_id;
			state.next_subscribe_id += 1;

			let (fetch, reply) = FetchState::new(full_track_name.clone(), subscribe_id, callback, &self.token);
			state.fetches.insert(subscribe_id, fetch);

			(subscribe_id, reply)
		};

		let msg = message::Fetch {
			subscribe_id,
			full_track_name,
			subscriber_priority,
			group_order,
			start,
			end,
			params,
		};

		if self.control.send(msg).is_err() {
			self.state.lock().fetches.remove(&subscribe_id);
			return Err(message::FetchError {
				subscribe_id,
				code: 500,
				reason: "local write failed".into(),
			});
		}

		match reply.await {
			Ok(result) => result,
			Err(_) => Err(fetch_closed(subscribe_id)),
		}
	}

	/// Abandon a fetch; the publisher resets its stream.
	pub fn fetch_cancel(&self, subscribe_id: u64) {
		let state = self.fetch_state(subscribe_id);

		let state = match state {
			Some(state) => state,
			None => {
				tracing::error!(id = subscribe_id, "fetch cancel for unknown id");
				return;
			}
		};

		state.cancel();

		if state.ok_and_all_data_received() {
			self.state.lock().fetches.remove(&subscribe_id);
			self.check_drain();
		}

		self.control.send(message::FetchCancel { subscribe_id }).ok();
	}

	/// Advertise a namespace. Resolves once the peer replies.
	pub async fn announce(
		&self,
		namespace: TrackNamespace,
		params: Params,
	) -> Result<message::AnnounceOk, message::AnnounceError> {
		let reply = {
			let mut state = self.state.lock();

			if state.closed {
				return Err(announce_closed(namespace));
			}

			if state.pending_announces.contains_key(&namespace) {
				return Err(message::AnnounceError {
					namespace,
					code: 400,
					reason: "announce already pending".into(),
				});
			}

			let (tx, rx) = oneshot::channel();
			state.pending_announces.insert(namespace.clone(), tx);
			rx
		};

		let msg = message::Announce {
			namespace: namespace.clone(),
			params,
		};

		if self.control.send(msg).is_err() {
			self.state.lock().pending_announces.remove(&namespace);
			return Err(message::AnnounceError {
				namespace,
				code: 500,
				reason: "local write failed".into(),
			});
		}

		match reply.await {
			Ok(result) => result,
			Err(_) => Err(announce_closed(namespace)),
		}
	}

	/// Withdraw a previous announce.
	pub fn unannounce(&self, namespace: TrackNamespace) {
		self.control.send(message::Unannounce { namespace }).ok();
	}

	/// Ask for announcements under a namespace prefix. Resolves once the peer
	/// replies.
	pub async fn subscribe_announces(
		&self,
		prefix: TrackNamespace,
		params: Params,
	) -> Result<message::SubscribeAnnouncesOk, message::SubscribeAnnouncesError> {
		let reply = {
			let mut state = self.state.lock();

			if state.closed {
				return Err(subscribe_announces_closed(prefix));
			}

			if state.pending_subscribe_announces.contains_key(&prefix) {
				return Err(message::SubscribeAnnouncesError {
					prefix,
					code: 400,
					reason: "request already pending".into(),
				});
			}

			let (tx, rx) = oneshot::channel();
			state.pending_subscribe_announces.insert(prefix.clone(), tx);
			rx
		};

		let msg = message::SubscribeAnnounces {
			prefix: prefix.clone(),
			params,
		};

		if self.control.send(msg).is_err() {
			self.state.lock().pending_subscribe_announces.remove(&prefix);
			return Err(message::SubscribeAnnouncesError {
				prefix,
				code: 500,
				reason: "local write failed".into(),
			});
		}

		match reply.await {
			Ok(result) => result,
			Err(_) => Err(subscribe_announces_closed(prefix)),
		}
	}

	/// Stop receiving announcements for a prefix.
	pub fn unsubscribe_announces(&self, prefix: TrackNamespace) {
		self.control.send(message::UnsubscribeAnnounces { prefix }).ok();
	}

	/// Query a track's status without subscribing.
	pub fn track_status_request(&self, msg: message::TrackStatusRequest) {
		self.control.send(msg).ok();
	}

	// Publisher-side verbs.

	/// Accept an inbound subscribe; returns the handle used to publish to it.
	pub fn subscribe_ok(&self, msg: message::SubscribeOk) -> Result<Arc<dyn TrackConsumer>, SessionError> {
		let publisher = match self.publisher(msg.subscribe_id) {
			Some(Publisher::Track(publisher)) => publisher,
			Some(Publisher::Fetch(_)) => {
				tracing::error!(id = msg.subscribe_id, "subscribe ok for a fetch id");
				self.subscribe_error(message::SubscribeError {
					subscribe_id: msg.subscribe_id,
					code: 500,
					reason: "internal error".into(),
					track_alias: 0,
				});
				return Err(SessionError::WrongKind(msg.subscribe_id));
			}
			None => return Err(SessionError::UnknownSubscribeId(msg.subscribe_id)),
		};

		publisher.set_group_order(msg.group_order);
		self.control.send(msg)?;

		Ok(Arc::new(publisher))
	}

	/// Reject an inbound subscribe.
	pub fn subscribe_error(&self, msg: message::SubscribeError) {
		let removed = self.state.lock().pub_tracks.remove(&msg.subscribe_id);

		if removed.is_none() {
			tracing::error!(id = msg.subscribe_id, "subscribe error for unknown id");
			return;
		}

		self.control.send(msg).ok();
		self.retire_subscribe_id();
	}

	/// Finish an inbound subscription; called by [TrackPublisher] and usable
	/// directly by the application.
	pub fn subscribe_done(&self, msg: message::SubscribeDone) {
		let removed = self.state.lock().pub_tracks.remove(&msg.subscribe_id);

		if removed.is_none() {
			tracing::error!(id = msg.subscribe_id, "subscribe done for unknown id");
			return;
		}

		self.control.send(msg).ok();
		self.retire_subscribe_id();
	}

	/// Accept an inbound fetch; opens the response stream and returns the
	/// handle used to publish to it.
	pub fn fetch_ok(&self, msg: message::FetchOk) -> Result<Arc<dyn FetchConsumer>, SessionError> {
		let publisher = match self.publisher(msg.subscribe_id) {
			Some(Publisher::Fetch(publisher)) => publisher,
			Some(Publisher::Track(_)) => {
				tracing::error!(id = msg.subscribe_id, "fetch ok for a subscribe id");
				self.fetch_error(message::FetchError {
					subscribe_id: msg.subscribe_id,
					code: fetch_error::INTERNAL_ERROR,
					reason: "internal error".into(),
				});
				return Err(SessionError::WrongKind(msg.subscribe_id));
			}
			None => return Err(SessionError::UnknownSubscribeId(msg.subscribe_id)),
		};

		let consumer = match publisher.begin_fetch(msg.group_order) {
			Ok(consumer) => consumer,
			Err(err) => {
				tracing::error!(id = msg.subscribe_id, %err, "begin fetch failed");
				self.fetch_error(message::FetchError {
					subscribe_id: msg.subscribe_id,
					code: fetch_error::INTERNAL_ERROR,
					reason: "internal error".into(),
				});
				return Err(err.into());
			}
		};

		self.control.send(msg)?;
		Ok(consumer)
	}

	/// Reject an inbound fetch.
	pub fn fetch_error(&self, msg: message::FetchError) {
		let removed = self.state.lock().pub_tracks.remove(&msg.subscribe_id);

		// This can run before any publisher state exists, e.g. when the
		// application rejects straight from the message queue.
		if removed.is_none() {
			tracing::debug!(id = msg.subscribe_id, "fetch error without publisher state");
		}

		self.control.send(msg).ok();

		if removed.is_some() {
			self.retire_subscribe_id();
		}
	}

	/// Answer a TRACK_STATUS_REQUEST.
	pub fn track_status(&self, msg: message::TrackStatus) {
		self.control.send(msg).ok();
	}

	/// Accept an inbound announce.
	pub fn announce_ok(&self, msg: message::AnnounceOk) {
		self.control.send(msg).ok();
	}

	/// Reject an inbound announce.
	pub fn announce_error(&self, msg: message::AnnounceError) {
		self.control.send(msg).ok();
	}

	/// Revoke our acceptance of an announce.
	pub fn announce_cancel(&self, msg: message::AnnounceCancel) {
		self.control.send(msg).ok();
	}

	/// Accept an inbound subscribe-announces.
	pub fn subscribe_announces_ok(&self, msg: message::SubscribeAnnouncesOk) {
		self.control.send(msg).ok();
	}

	/// Reject an inbound subscribe-announces.
	pub fn subscribe_announces_error(&self, msg: message::SubscribeAnnouncesError) {
		self.control.send(msg).ok();
	}

	/// Ask the peer to reconnect elsewhere.
	pub fn goaway(&self, new_session_uri: String) {
		self.control.send(message::GoAway { new_session_uri }).ok();
	}

	// Lifecycle.

	/// The next control message requiring an application decision, or None
	/// once the session closed.
	pub async fn next_message(&self) -> Option<SessionMessage> {
		tokio::select! {
			biased;
			_ = self.token.cancelled() => None,
			msg = self.messages.pop() => Some(msg),
		}
	}

	/// Stop initiating work and close once all subscriptions and fetches we
	/// requested have finished.
	pub fn drain(&self) {
		tracing::debug!("draining");
		self.state.lock().draining = true;
		self.check_drain();
	}

	fn check_drain(&self) {
		let close = {
			let state = self.state.lock();
			state.draining && state.fetches.is_empty() && state.sub_tracks.is_empty()
		};

		if close {
			self.close(CloseCode::NoError);
		}
	}

	/// Tear the session down: reset every publisher, error every receiver and
	/// pending request, close the transport, and cancel all tasks.
	pub fn close(&self, code: CloseCode) {
		let cleanup = {
			let mut state = self.state.lock();
			if state.closed {
				return;
			}
			state.closed = true;
			state.sub_id_to_alias.clear();

			(
				mem::take(&mut state.pub_tracks),
				mem::take(&mut state.sub_tracks),
				mem::take(&mut state.fetches),
				mem::take(&mut state.pending_announces),
				mem::take(&mut state.pending_subscribe_announces),
			)
		};

		tracing::debug!(?code, "closing session");

		let (pub_tracks, sub_tracks, fetches, announces, subscribe_announces) = cleanup;

		for publisher in pub_tracks.into_values() {
			publisher.reset(ResetCode::SessionClosed);
		}

		for state in sub_tracks.into_values() {
			state.subscribe_error(message::SubscribeError {
				subscribe_id: 0, // the receive state fills in its own id
				code: 500,
				reason: "session closed".into(),
				track_alias: 0,
			});
		}

		for state in fetches.into_values() {
			state.fetch_error(message::FetchError {
				subscribe_id: 0,
				code: 500,
				reason: "session closed".into(),
			});
		}

		for (namespace, reply) in announces {
			reply
				.send(Err(message::AnnounceError {
					namespace,
					code: 500,
					reason: "session closed".into(),
				}))
				.ok();
		}

		for (prefix, reply) in subscribe_announces {
			reply
				.send(Err(message::SubscribeAnnouncesError {
					prefix,
					code: 500,
					reason: "session closed".into(),
				}))
				.ok();
		}

		self.webtransport.clone().close(code.into(), "");
		self.token.cancel();
	}

	/// Resolves once the session is closed.
	pub async fn closed(&self) {
		self.token.cancelled().await
	}

	pub(super) fn close_with(&self, err: SessionError) {
		tracing::error!(%err, "session error");
		self.close(err.close_code());
	}

	pub(super) fn token(&self) -> CancellationToken {
		self.token.clone()
	}

	// Shared lookups and bookkeeping.

	fn publisher(&self, subscribe_id: u64) -> Option<Publisher<S>> {
		self.state.lock().pub_tracks.get(&subscribe_id).cloned()
	}

	pub(super) fn subscribe_state(&self, track_alias: u64) -> Option<SubscribeState> {
		self.state.lock().sub_tracks.get(&track_alias).cloned()
	}

	fn subscribe_state_by_id(&self, subscribe_id: u64) -> Option<SubscribeState> {
		let state = self.state.lock();
		let alias = state.sub_id_to_alias.get(&subscribe_id)?;
		state.sub_tracks.get(alias).cloned()
	}

	fn remove_subscribe(&self, subscribe_id: u64) -> Option<SubscribeState> {
		let mut state = self.state.lock();
		let alias = state.sub_id_to_alias.remove(&subscribe_id)?;
		state.sub_tracks.remove(&alias)
	}

	pub(super) fn fetch_state(&self, subscribe_id: u64) -> Option<FetchState> {
		self.state.lock().fetches.get(&subscribe_id).cloned()
	}

	// A fetch stream finished with its callback; drop the entry once the
	// reply was delivered too.
	pub(super) fn fetch_stream_finished(&self, state: &FetchState) {
		state.release_callback();

		if state.ok_and_all_data_received() {
			let removed = self.state.lock().fetches.remove(&state.subscribe_id);
			if removed.is_some() {
				self.check_drain();
			}
		}
	}

	// A fetch we were serving ran to completion; retire its ID.
	pub(super) fn fetch_complete(&self, subscribe_id: u64) {
		let removed = {
			let mut state = self.state.lock();
			match state.closed {
				true => None,
				false => state.pub_tracks.remove(&subscribe_id),
			}
		};

		match removed {
			Some(_) => self.retire_subscribe_id(),
			None => tracing::debug!(id = subscribe_id, "fetch complete for unknown id"),
		}
	}

	// One inbound subscribe/fetch finished. Once half the window has retired,
	// grant the peer a bigger bound.
	fn retire_subscribe_id(&self) {
		let issue = {
			let mut state = self.state.lock();

			if state.closed {
				return;
			}

			state.closed_subscribes += 1;
			if state.closed_subscribes >= state.max_concurrent_subscribes / 2 {
				state.max_subscribe_id += state.closed_subscribes;
				state.closed_subscribes = 0;
				Some(state.max_subscribe_id)
			} else {
				None
			}
		};

		if let Some(max) = issue {
			tracing::debug!(max, "issuing new max subscribe id");
			self.control
				.send(message::MaxSubscribeId { subscribe_id: max })
				.ok();
		}
	}
}

// Decode a single message, reading more data as needed. Leftover bytes stay
// in `buffer` for the control read loop.
async fn read_message<R: RecvStream>(stream: &mut R, buffer: &mut BytesMut) -> Result<Message, SessionError> {
	loop {
		let mut cursor = Cursor::new(&*buffer);
		match Message::decode(&mut cursor) {
			Ok(msg) => {
				let size = cursor.position() as usize;
				buffer.advance(size);
				return Ok(msg);
			}
			Err(DecodeError::More(_)) => {}
			Err(err) => return Err(err.into()),
		}

		let data = stream.read().await?;
		buffer.extend_from_slice(&data.data);

		if data.fin && data.data.is_empty() {
			return Err(DecodeError::UnexpectedEnd.into());
		}
	}
}

fn subscribe_closed(subscribe_id: u64, track_alias: u64) -> message::SubscribeError {
	message::SubscribeError {
		subscribe_id,
		code: 500,
		reason: "session closed".into(),
		track_alias,
	}
}

fn fetch_closed(subscribe_id: u64) -> message::FetchError {
	message::FetchError {
		subscribe_id,
		code: 500,
		reason: "session closed".into(),
	}
}

fn announce_closed(namespace: TrackNamespace) -> message::AnnounceError {
	message::AnnounceError {
		namespace,
		code: 500,
		reason: "session closed".into(),
	}
}

fn subscribe_announces_closed(prefix: TrackNamespace) -> message::SubscribeAnnouncesError {
	message::SubscribeAnnouncesError {
		prefix,
		code: 500,
		reason: "session closed".into(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::consumer::{FetchConsumer as _, SubgroupConsumer, TrackConsumer};
	use crate::data::{ObjectHeader, ObjectStatus};
	use crate::setup::param;
	use crate::transport::mock::{self, MockSession};
	use crate::{PublishError, PublishStatus};

	use bytes::Bytes;
	use std::time::Duration;
	use tokio::sync::mpsc;
	use tokio::time::timeout;

	#[derive(Clone, Debug, PartialEq)]
	enum Event {
		Subgroup { group: u64, subgroup: u64, priority: u8 },
		Object { id: u64, payload: Bytes, fin: bool },
		EndOfSubgroup,
		Datagram { group: u64, id: u64, payload: Bytes },
		Done { code: u64 },
		Reset,
	}

	// A TrackConsumer that reports everything over a channel.
	struct Recorder {
		events: mpsc::UnboundedSender<Event>,
	}

	impl TrackConsumer for Recorder {
		fn begin_subgroup(
			&self,
			group: u64,
			subgroup: u64,
			publisher_priority: u8,
		) -> Result<Arc<dyn SubgroupConsumer>, PublishError> {
			self.events
				.send(Event::Subgroup {
					group,
					subgroup,
					priority: publisher_priority,
				})
				.ok();

			Ok(Arc::new(SubgroupRecorder {
				events: self.events.clone(),
				remaining: Lock::new(None),
			}))
		}

		fn object_stream(&self, _header: &ObjectHeader, _payload: Bytes) -> Result<(), PublishError> {
			Ok(())
		}

		fn group_not_exists(&self, _group: u64, _subgroup: u64, _priority: u8) -> Result<(), PublishError> {
			Ok(())
		}

		fn datagram(&self, header: &ObjectHeader, payload: Bytes) -> Result<(), PublishError> {
			self.events
				.send(Event::Datagram {
					group: header.group,
					id: header.id,
					payload,
				})
				.ok();
			Ok(())
		}

		fn subscribe_done(&self, done: message::SubscribeDone) -> Result<(), PublishError> {
			self.events.send(Event::Done { code: done.status_code }).ok();
			Ok(())
		}
	}

	struct SubgroupRecorder {
		events: mpsc::UnboundedSender<Event>,
		remaining: Lock<Option<u64>>,
	}

	impl SubgroupConsumer for SubgroupRecorder {
		fn object(&self, object_id: u64, payload: Bytes, fin_subgroup: bool) -> Result<(), PublishError> {
			self.events
				.send(Event::Object {
					id: object_id,
					payload,
					fin: fin_subgroup,
				})
				.ok();
			Ok(())
		}

		fn object_not_exists(&self, _object_id: u64, _fin: bool) -> Result<(), PublishError> {
			Ok(())
		}

		fn begin_object(&self, object_id: u64, length: u64, initial: Bytes) -> Result<(), PublishError> {
			*self.remaining.lock() = Some(length - initial.len() as u64);
			self.events
				.send(Event::Object {
					id: object_id,
					payload: initial,
					fin: false,
				})
				.ok();
			Ok(())
		}

		fn object_payload(&self, payload: Bytes, _fin: bool) -> Result<PublishStatus, PublishError> {
			let mut remaining = self.remaining.lock();
			let left = remaining.unwrap_or(0).saturating_sub(payload.len() as u64);
			*remaining = Some(left);

			self.events
				.send(Event::Object {
					id: 0,
					payload,
					fin: false,
				})
				.ok();

			Ok(match left {
				0 => PublishStatus::Done,
				_ => PublishStatus::InProgress,
			})
		}

		fn end_of_group(&self, _object_id: u64) -> Result<(), PublishError> {
			Ok(())
		}

		fn end_of_track_and_group(&self, _object_id: u64) -> Result<(), PublishError> {
			Ok(())
		}

		fn end_of_subgroup(&self) -> Result<(), PublishError> {
			self.events.send(Event::EndOfSubgroup).ok();
			Ok(())
		}

		fn reset(&self, _code: crate::ResetCode) {
			self.events.send(Event::Reset).ok();
		}
	}

	struct NoopFetch;

	impl crate::consumer::FetchConsumer for NoopFetch {
		fn object(&self, _: u64, _: u64, _: u64, _: Bytes, _: bool) -> Result<(), PublishError> {
			Ok(())
		}
		fn object_not_exists(&self, _: u64, _: u64, _: u64, _: bool) -> Result<(), PublishError> {
			Ok(())
		}
		fn group_not_exists(&self, _: u64, _: u64, _: bool) -> Result<(), PublishError> {
			Ok(())
		}
		fn begin_object(&self, _: u64, _: u64, _: u64, _: u64, _: Bytes) -> Result<(), PublishError> {
			Ok(())
		}
		fn object_payload(&self, _: Bytes, _: bool) -> Result<PublishStatus, PublishError> {
			Ok(PublishStatus::Done)
		}
		fn end_of_group(&self, _: u64, _: u64, _: u64, _: bool) -> Result<(), PublishError> {
			Ok(())
		}
		fn end_of_track_and_group(&self, _: u64, _: u64, _: u64) -> Result<(), PublishError> {
			Ok(())
		}
		fn end_of_fetch(&self) -> Result<(), PublishError> {
			Ok(())
		}
		fn reset(&self, _: crate::ResetCode) {}
	}

	struct Setup {
		max_subscribe_id: u64,
	}

	impl ServerSetupCallback for Setup {
		fn on_client_setup(&self, _setup: ClientSetup) -> Result<ServerSetup, SessionError> {
			let mut params = Params::new();
			params.set(param::MAX_SUBSCRIBE_ID, self.max_subscribe_id).unwrap();

			Ok(ServerSetup {
				selected_version: Version::CURRENT,
				params,
			})
		}
	}

	async fn establish(
		client_max: u64,
		server_max: u64,
	) -> (Session<MockSession>, Session<MockSession>, MockSession, MockSession) {
		let (client_transport, server_transport) = mock::pair();

		let mut params = Params::new();
		params.set(param::MAX_SUBSCRIBE_ID, client_max).unwrap();
		let setup = ClientSetup {
			versions: [Version::CURRENT].into(),
			params,
		};

		let accept = Session::accept(
			server_transport.clone(),
			Arc::new(Setup {
				max_subscribe_id: server_max,
			}),
		);
		let connect = Session::connect(client_transport.clone(), setup);

		let (server, client) = tokio::join!(accept, connect);
		let (client, _server_setup) = client.unwrap();

		(client, server.unwrap(), client_transport, server_transport)
	}

	fn track() -> FullTrackName {
		FullTrackName::new(TrackNamespace::new(["a"]), "t")
	}

	async fn wait_for(mut cond: impl FnMut() -> bool) {
		timeout(Duration::from_secs(2), async {
			while !cond() {
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
		})
		.await
		.expect("condition never met");
	}

	#[tokio::test]
	async fn setup_exchange() {
		let (client, server, _ct, _st) = establish(100, 50).await;

		{
			let state = client.state.lock();
			assert_eq!(state.peer_max_subscribe_id, 50);
			assert_eq!(state.max_subscribe_id, 100);
		}
		{
			let state = server.state.lock();
			assert_eq!(state.peer_max_subscribe_id, 100);
			assert_eq!(state.max_subscribe_id, 50);
		}
	}

	#[tokio::test]
	async fn subscribe_happy_path() {
		let (client, server, _ct, st) = establish(100, 50).await;

		let (tx, mut rx) = mpsc::unbounded_channel();
		let consumer = Arc::new(Recorder { events: tx });

		let pending = tokio::spawn({
			let client = client.clone();
			async move {
				client
					.subscribe(track(), 1, GroupOrder::Publisher, Params::new(), consumer)
					.await
			}
		});

		let request = match timeout(Duration::from_secs(2), server.next_message()).await.unwrap() {
			Some(SessionMessage::Subscribe(request)) => request,
			other => panic!("unexpected message: {:?}", other),
		};
		assert_eq!(request.subscribe_id, 0);
		assert_eq!(request.track_alias, 0);
		assert_eq!(request.full_track_name, track());

		let publisher = server
			.subscribe_ok(message::SubscribeOk {
				subscribe_id: 0,
				expires: 0,
				group_order: GroupOrder::OldestFirst,
				largest: None,
				params: Params::new(),
			})
			.unwrap();

		let ok = timeout(Duration::from_secs(2), pending).await.unwrap().unwrap().unwrap();
		assert_eq!(ok.group_order, GroupOrder::OldestFirst);

		let subgroup = publisher.begin_subgroup(7, 0, 128).unwrap();
		subgroup.object(3, Bytes::from_static(b"abc"), true).unwrap();

		let event = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
		assert_eq!(
			event,
			Event::Subgroup {
				group: 7,
				subgroup: 0,
				priority: 128
			}
		);

		let event = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
		assert_eq!(
			event,
			Event::Object {
				id: 3,
				payload: Bytes::from_static(b"abc"),
				fin: true
			}
		);

		// The subgroup stream carried the encoded precedence.
		let expected = (1u64 << 50) | (128u64 << 42) | (7 << 21);
		assert!(st.priorities().contains(&(1u8, expected)));
	}

	#[tokio::test]
	async fn fetch_invalid_range() {
		let (client, _server, _ct, _st) = establish(100, 50).await;

		let err = client
			.fetch(
				track(),
				1,
				GroupOrder::OldestFirst,
				message::Location { group: 5, object: 0 },
				message::Location { group: 3, object: 0 },
				Params::new(),
				Arc::new(NoopFetch),
			)
			.await
			.unwrap_err();

		assert_eq!(err.code, fetch_error::INVALID_RANGE);
	}

	#[tokio::test]
	async fn credit_retirement() {
		let (client, server, _ct, _st) = establish(100, 10).await;

		for i in 0..5u64 {
			let (tx, _rx) = mpsc::unbounded_channel();
			let pending = tokio::spawn({
				let client = client.clone();
				async move {
					client
						.subscribe(track(), 1, GroupOrder::Publisher, Params::new(), Arc::new(Recorder { events: tx }))
						.await
				}
			});

			match timeout(Duration::from_secs(2), server.next_message()).await.unwrap() {
				Some(SessionMessage::Subscribe(request)) => assert_eq!(request.subscribe_id, i),
				other => panic!("unexpected message: {:?}", other),
			}

			server.subscribe_error(message::SubscribeError {
				subscribe_id: i,
				code: 404,
				reason: "not found".into(),
				track_alias: i,
			});

			let err = timeout(Duration::from_secs(2), pending).await.unwrap().unwrap().unwrap_err();
			assert_eq!(err.code, 404);
		}

		// Five retirements crossed the threshold (10 / 2); the window grew.
		wait_for(|| client.state.lock().peer_max_subscribe_id == 15).await;

		let state = server.state.lock();
		assert_eq!(state.max_subscribe_id, 15);
		assert_eq!(state.closed_subscribes, 0);
	}

	#[tokio::test]
	async fn peer_over_subscribes() {
		let (client, server, _ct, st) = establish(100, 4).await;

		for _ in 0..5u64 {
			let (tx, _rx) = mpsc::unbounded_channel();
			let client = client.clone();
			tokio::spawn(async move {
				client
					.subscribe(track(), 1, GroupOrder::Publisher, Params::new(), Arc::new(Recorder { events: tx }))
					.await
			});
		}

		// The fifth subscribe uses id 4, at the advertised bound.
		wait_for(|| st.close_code() == Some(CloseCode::TooManySubscribes.into())).await;

		// And it never reached the application.
		assert!(server.next_message().await.is_none());
	}

	#[tokio::test]
	async fn unsubscribe_races_with_data() {
		let (client, server, ct, st) = establish(100, 50).await;

		let (tx, mut rx) = mpsc::unbounded_channel();
		let pending = tokio::spawn({
			let client = client.clone();
			async move {
				client
					.subscribe(track(), 1, GroupOrder::Publisher, Params::new(), Arc::new(Recorder { events: tx }))
					.await
			}
		});

		match timeout(Duration::from_secs(2), server.next_message()).await.unwrap() {
			Some(SessionMessage::Subscribe(_)) => {}
			other => panic!("unexpected message: {:?}", other),
		}

		let publisher = server
			.subscribe_ok(message::SubscribeOk {
				subscribe_id: 0,
				expires: 0,
				group_order: GroupOrder::OldestFirst,
				largest: None,
				params: Params::new(),
			})
			.unwrap();

		timeout(Duration::from_secs(2), pending).await.unwrap().unwrap().unwrap();

		// Unsubscribe, then an object arrives for the now-dead alias.
		client.unsubscribe(0);

		let subgroup = publisher.begin_subgroup(1, 0, 10).unwrap();
		subgroup.object(0, Bytes::from_static(b"late"), true).unwrap();

		// The object is dropped without closing the session.
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert!(rx.try_recv().is_err());
		assert_eq!(ct.close_code(), None);
		assert_eq!(st.close_code(), None);

		// The publisher side sees the UNSUBSCRIBE.
		match timeout(Duration::from_secs(2), server.next_message()).await.unwrap() {
			Some(SessionMessage::Unsubscribe(msg)) => assert_eq!(msg.subscribe_id, 0),
			other => panic!("unexpected message: {:?}", other),
		}
	}

	#[tokio::test]
	async fn datagram_delivery() {
		let (client, server, _ct, _st) = establish(100, 50).await;

		let (tx, mut rx) = mpsc::unbounded_channel();
		let pending = tokio::spawn({
			let client = client.clone();
			async move {
				client
					.subscribe(track(), 1, GroupOrder::Publisher, Params::new(), Arc::new(Recorder { events: tx }))
					.await
			}
		});

		match timeout(Duration::from_secs(2), server.next_message()).await.unwrap() {
			Some(SessionMessage::Subscribe(_)) => {}
			other => panic!("unexpected message: {:?}", other),
		}

		let publisher = server
			.subscribe_ok(message::SubscribeOk {
				subscribe_id: 0,
				expires: 0,
				group_order: GroupOrder::OldestFirst,
				largest: None,
				params: Params::new(),
			})
			.unwrap();

		timeout(Duration::from_secs(2), pending).await.unwrap().unwrap().unwrap();

		publisher
			.datagram(
				&ObjectHeader {
					track_identifier: 0,
					group: 7,
					subgroup: 2,
					id: 2,
					priority: 128,
					status: ObjectStatus::Normal,
					length: None,
				},
				Bytes::from_static(b"dg"),
			)
			.unwrap();

		let event = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
		assert_eq!(
			event,
			Event::Datagram {
				group: 7,
				id: 2,
				payload: Bytes::from_static(b"dg")
			}
		);
	}

	#[tokio::test]
	async fn subscribe_done_removes_and_delivers() {
		let (client, server, _ct, _st) = establish(100, 50).await;

		let (tx, mut rx) = mpsc::unbounded_channel();
		let pending = tokio::spawn({
			let client = client.clone();
			async move {
				client
					.subscribe(track(), 1, GroupOrder::Publisher, Params::new(), Arc::new(Recorder { events: tx }))
					.await
			}
		});

		match timeout(Duration::from_secs(2), server.next_message()).await.unwrap() {
			Some(SessionMessage::Subscribe(_)) => {}
			other => panic!("unexpected message: {:?}", other),
		}

		let publisher = server
			.subscribe_ok(message::SubscribeOk {
				subscribe_id: 0,
				expires: 0,
				group_order: GroupOrder::OldestFirst,
				largest: None,
				params: Params::new(),
			})
			.unwrap();

		timeout(Duration::from_secs(2), pending).await.unwrap().unwrap().unwrap();

		publisher
			.subscribe_done(message::SubscribeDone {
				subscribe_id: 0,
				status_code: message::status::TRACK_ENDED,
				reason: "end of track".into(),
				last: None,
			})
			.unwrap();

		let event = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
		assert_eq!(
			event,
			Event::Done {
				code: message::status::TRACK_ENDED
			}
		);

		// The receive state is gone on the subscriber.
		wait_for(|| client.state.lock().sub_tracks.is_empty()).await;

		// Publishing afterwards is an API error.
		let err = match publisher.begin_subgroup(0, 0, 0) {
			Ok(_) => panic!("expected begin_subgroup to fail"),
			Err(err) => err,
		};
		assert!(matches!(err, PublishError::Api(_)));
	}

	#[tokio::test]
	async fn close_fails_pending_requests() {
		let (client, server, ct, _st) = establish(100, 50).await;

		let (tx, _rx) = mpsc::unbounded_channel();
		let pending_subscribe = tokio::spawn({
			let client = client.clone();
			async move {
				client
					.subscribe(track(), 1, GroupOrder::Publisher, Params::new(), Arc::new(Recorder { events: tx }))
					.await
			}
		});

		let pending_announce = tokio::spawn({
			let client = client.clone();
			async move { client.announce(TrackNamespace::new(["conf"]), Params::new()).await }
		});

		// The server never answers either request; tear the session down.
		for _ in 0..2 {
			match timeout(Duration::from_secs(2), server.next_message()).await.unwrap() {
				Some(SessionMessage::Subscribe(_)) | Some(SessionMessage::Announce(_)) => {}
				other => panic!("unexpected message: {:?}", other),
			}
		}

		client.close(CloseCode::NoError);

		let err = timeout(Duration::from_secs(2), pending_subscribe)
			.await
			.unwrap()
			.unwrap()
			.unwrap_err();
		assert_eq!(err.code, 500);
		assert_eq!(err.reason, "session closed");

		let err = timeout(Duration::from_secs(2), pending_announce)
			.await
			.unwrap()
			.unwrap()
			.unwrap_err();
		assert_eq!(err.code, 500);

		assert_eq!(ct.close_code(), Some(CloseCode::NoError.into()));
	}

	#[tokio::test]
	async fn drain_waits_for_subscriptions() {
		let (client, server, ct, _st) = establish(100, 50).await;

		let (tx, _rx) = mpsc::unbounded_channel();
		let pending = tokio::spawn({
			let client = client.clone();
			async move {
				client
					.subscribe(track(), 1, GroupOrder::Publisher, Params::new(), Arc::new(Recorder { events: tx }))
					.await
			}
		});

		match timeout(Duration::from_secs(2), server.next_message()).await.unwrap() {
			Some(SessionMessage::Subscribe(_)) => {}
			other => panic!("unexpected message: {:?}", other),
		}

		let publisher = server
			.subscribe_ok(message::SubscribeOk {
				subscribe_id: 0,
				expires: 0,
				group_order: GroupOrder::OldestFirst,
				largest: None,
				params: Params::new(),
			})
			.unwrap();

		timeout(Duration::from_secs(2), pending).await.unwrap().unwrap().unwrap();

		// Draining with a live subscription keeps the session open.
		client.drain();
		assert_eq!(ct.close_code(), None);

		// Once the publisher finishes it, the drain completes.
		publisher
			.subscribe_done(message::SubscribeDone {
				subscribe_id: 0,
				status_code: message::status::TRACK_ENDED,
				reason: "end of track".into(),
				last: None,
			})
			.unwrap();

		wait_for(|| ct.close_code() == Some(CloseCode::NoError.into())).await;
	}

	#[tokio::test]
	async fn max_subscribe_id_regression_closes() {
		let (_client, server, _ct, st) = establish(100, 50).await;

		// Inject a regressed bound straight into the server's dispatcher.
		server.recv_message(Message::MaxSubscribeId(message::MaxSubscribeId { subscribe_id: 150 }));
		assert_eq!(st.close_code(), None);
		assert_eq!(server.state.lock().peer_max_subscribe_id, 150);

		server.recv_message(Message::MaxSubscribeId(message::MaxSubscribeId { subscribe_id: 100 }));
		assert_eq!(st.close_code(), Some(CloseCode::ProtocolViolation.into()));
	}

	#[tokio::test]
	async fn announce_round_trip() {
		let (client, server, _ct, _st) = establish(100, 50).await;

		let pending = tokio::spawn({
			let client = client.clone();
			async move { client.announce(TrackNamespace::new(["conf"]), Params::new()).await }
		});

		let namespace = match timeout(Duration::from_secs(2), server.next_message()).await.unwrap() {
			Some(SessionMessage::Announce(msg)) => msg.namespace,
			other => panic!("unexpected message: {:?}", other),
		};
		assert_eq!(namespace, TrackNamespace::new(["conf"]));

		server.announce_ok(message::AnnounceOk { namespace });

		let ok = timeout(Duration::from_secs(2), pending).await.unwrap().unwrap().unwrap();
		assert_eq!(ok.namespace, TrackNamespace::new(["conf"]));
	}

	#[tokio::test]
	async fn fetch_round_trip() {
		let (client, server, _ct, _st) = establish(100, 50).await;

		let pending = tokio::spawn({
			let client = client.clone();
			async move {
				client
					.fetch(
						track(),
						1,
						GroupOrder::OldestFirst,
						message::Location { group: 0, object: 0 },
						message::Location { group: 5, object: 0 },
						Params::new(),
						Arc::new(NoopFetch),
					)
					.await
			}
		});

		let request = match timeout(Duration::from_secs(2), server.next_message()).await.unwrap() {
			Some(SessionMessage::Fetch(request)) => request,
			other => panic!("unexpected message: {:?}", other),
		};

		let consumer = server
			.fetch_ok(message::FetchOk {
				subscribe_id: request.subscribe_id,
				group_order: GroupOrder::OldestFirst,
				end_of_track: false,
				largest: message::Location { group: 5, object: 0 },
				params: Params::new(),
			})
			.unwrap();

		let ok = timeout(Duration::from_secs(2), pending).await.unwrap().unwrap().unwrap();
		assert_eq!(ok.subscribe_id, request.subscribe_id);

		// Serve the whole range on the single fetch stream and finish it.
		consumer.object(0, 0, 0, Bytes::from_static(b"a"), false).unwrap();
		consumer.object(5, 0, 0, Bytes::from_static(b"b"), false).unwrap();
		consumer.end_of_fetch().unwrap();

		// Stream completion retires the publisher entry.
		wait_for(|| server.state.lock().pub_tracks.is_empty()).await;
		wait_for(|| server.state.lock().closed_subscribes == 1).await;

		// And once the subscriber consumed everything, its state is gone too.
		wait_for(|| client.state.lock().fetches.is_empty()).await;
	}
}
