//! The WebTransport collaborator, kept behind traits so the session engine is
//! generic over the QUIC stack and testable in memory.

use std::future::Future;

use bytes::Bytes;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// An error surfaced by the transport.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
	/// A new stream was refused for flow control reasons; try again after
	/// [Session::uni_stream_credit].
	#[error("blocked by flow control")]
	Blocked,

	/// The peer reset the stream with the given code.
	#[error("stream reset: code={0}")]
	Reset(u32),

	/// The session is closed; no further streams or datagrams.
	#[error("session closed: code={0}")]
	SessionClosed(u32),

	/// Anything else; the transport is unusable.
	#[error("transport failed: {0}")]
	Failed(String),
}

/// A chunk read from a stream, with the FIN flag observed alongside it.
#[derive(Clone, Debug, Default)]
pub struct StreamData {
	pub data: Bytes,
	pub fin: bool,
}

/// A single WebTransport connection.
pub trait Session: Clone + Send + Sync + 'static {
	type SendStream: SendStream;
	type RecvStream: RecvStream;

	fn open_bi(&mut self) -> impl Future<Output = Result<(Self::SendStream, Self::RecvStream), TransportError>> + Send;
	fn accept_bi(&mut self) -> impl Future<Output = Result<(Self::SendStream, Self::RecvStream), TransportError>> + Send;

	/// Open a unidirectional stream without waiting; returns
	/// [TransportError::Blocked] when out of stream credit.
	fn open_uni(&mut self) -> Result<Self::SendStream, TransportError>;

	fn accept_uni(&mut self) -> impl Future<Output = Result<Self::RecvStream, TransportError>> + Send;

	/// Resolves once a new unidirectional stream can be opened.
	fn uni_stream_credit(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send + 'static;

	fn send_datagram(&mut self, payload: Bytes) -> Result<(), TransportError>;
	fn recv_datagram(&mut self) -> impl Future<Output = Result<Bytes, TransportError>> + Send;

	fn close(&mut self, code: u32, reason: &str);
}

/// The sending half of a stream.
pub trait SendStream: Send + 'static {
	/// Data streams use urgency 1, the control stream urgency 0. `order`
	/// breaks ties within an urgency level; lower wins.
	fn set_priority(&mut self, urgency: u8, order: u64);

	/// Append data to the stream, finishing it when `fin` is set. The
	/// transport buffers; use [Self::writable] for backpressure.
	fn write(&mut self, data: Bytes, fin: bool) -> Result<(), TransportError>;

	/// Resolves when the stream can absorb more data.
	fn writable(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send + 'static;

	fn reset(&mut self, code: u32);

	/// Fires when the peer sends STOP_SENDING.
	fn stopped(&self) -> CancellationToken;
}

/// The receiving half of a stream.
pub trait RecvStream: Send + 'static {
	/// The next chunk; `fin` set on (or after) the final chunk. A peer reset
	/// surfaces as [TransportError::Reset].
	fn read(&mut self) -> impl Future<Output = Result<StreamData, TransportError>> + Send;

	fn stop(&mut self, code: u32);
}

#[cfg(test)]
pub(crate) mod mock {
	//! An in-memory transport pair for exercising the session end to end.
	use std::collections::VecDeque;
	use std::sync::Arc;

	use bytes::Bytes;
	use tokio::sync::{mpsc, Mutex, Notify};
	use tokio_util::sync::CancellationToken;

	use super::{RecvStream, SendStream, Session, StreamData, TransportError};
	use crate::util::Lock;

	type StreamPair = (MockSendStream, MockRecvStream);

	pub fn pair() -> (MockSession, MockSession) {
		let (uni_ab_tx, uni_ab_rx) = mpsc::unbounded_channel();
		let (uni_ba_tx, uni_ba_rx) = mpsc::unbounded_channel();
		let (bi_ab_tx, bi_ab_rx) = mpsc::unbounded_channel();
		let (bi_ba_tx, bi_ba_rx) = mpsc::unbounded_channel();
		let (dgram_ab_tx, dgram_ab_rx) = mpsc::unbounded_channel();
		let (dgram_ba_tx, dgram_ba_rx) = mpsc::unbounded_channel();

		let a = MockSession {
			uni_tx: uni_ab_tx,
			uni_rx: Arc::new(Mutex::new(uni_ba_rx)),
			bi_tx: bi_ab_tx,
			bi_rx: Arc::new(Mutex::new(bi_ba_rx)),
			dgram_tx: dgram_ab_tx,
			dgram_rx: Arc::new(Mutex::new(dgram_ba_rx)),
			uni_credit: Lock::new(None),
			credit_notify: Arc::new(Notify::new()),
			closed: Lock::new(None),
			priorities: Lock::new(Vec::new()),
		};

		let b = MockSession {
			uni_tx: uni_ba_tx,
			uni_rx: Arc::new(Mutex::new(uni_ab_rx)),
			bi_tx: bi_ba_tx,
			bi_rx: Arc::new(Mutex::new(bi_ab_rx)),
			dgram_tx: dgram_ba_tx,
			dgram_rx: Arc::new(Mutex::new(dgram_ab_rx)),
			uni_credit: Lock::new(None),
			credit_notify: Arc::new(Notify::new()),
			closed: Lock::new(None),
			priorities: Lock::new(Vec::new()),
		};

		(a, b)
	}

	#[derive(Clone)]
	pub struct MockSession {
		uni_tx: mpsc::UnboundedSender<MockRecvStream>,
		uni_rx: Arc<Mutex<mpsc::UnboundedReceiver<MockRecvStream>>>,
		bi_tx: mpsc::UnboundedSender<StreamPair>,
		bi_rx: Arc<Mutex<mpsc::UnboundedReceiver<StreamPair>>>,
		dgram_tx: mpsc::UnboundedSender<Bytes>,
		dgram_rx: Arc<Mutex<mpsc::UnboundedReceiver<Bytes>>>,

		// None means unlimited.
		uni_credit: Lock<Option<u64>>,
		credit_notify: Arc<Notify>,

		closed: Lock<Option<u32>>,

		// Every (urgency, order) set on streams we opened, for assertions.
		priorities: Lock<Vec<(u8, u64)>>,
	}

	impl MockSession {
		pub fn set_uni_credit(&self, credit: u64) {
			*self.uni_credit.lock() = Some(credit);
			self.credit_notify.notify_one();
		}

		pub fn close_code(&self) -> Option<u32> {
			*self.closed.lock()
		}

		pub fn priorities(&self) -> Vec<(u8, u64)> {
			self.priorities.lock().clone()
		}

		fn new_stream(&self) -> StreamPair {
			let shared = Shared::default();
			let stopped = CancellationToken::new();

			let send = MockSendStream {
				shared: shared.clone(),
				stopped: stopped.clone(),
				priorities: self.priorities.clone(),
			};
			let recv = MockRecvStream {
				shared,
				stopped,
				fin_delivered: false,
			};

			(send, recv)
		}
	}

	impl Session for MockSession {
		type SendStream = MockSendStream;
		type RecvStream = MockRecvStream;

		async fn open_bi(&mut self) -> Result<(MockSendStream, MockRecvStream), TransportError> {
			let (send_local, recv_remote) = self.new_stream();
			let (send_remote, recv_local) = self.new_stream();

			self.bi_tx
				.send((send_remote, recv_remote))
				.map_err(|_| TransportError::Failed("peer gone".into()))?;

			Ok((send_local, recv_local))
		}

		async fn accept_bi(&mut self) -> Result<(MockSendStream, MockRecvStream), TransportError> {
			self.bi_rx
				.lock()
				.await
				.recv()
				.await
				.ok_or(TransportError::Failed("peer gone".into()))
		}

		fn open_uni(&mut self) -> Result<MockSendStream, TransportError> {
			{
				let mut credit = self.uni_credit.lock();
				match credit.as_mut() {
					Some(0) => return Err(TransportError::Blocked),
					Some(credit) => *credit -= 1,
					None => {}
				}
			}

			let (send, recv) = self.new_stream();
			self.uni_tx
				.send(recv)
				.map_err(|_| TransportError::Failed("peer gone".into()))?;

			Ok(send)
		}

		async fn accept_uni(&mut self) -> Result<MockRecvStream, TransportError> {
			self.uni_rx
				.lock()
				.await
				.recv()
				.await
				.ok_or(TransportError::Failed("peer gone".into()))
		}

		fn uni_stream_credit(&mut self) -> impl std::future::Future<Output = Result<(), TransportError>> + Send + 'static {
			let credit = self.uni_credit.clone();
			let notify = self.credit_notify.clone();

			async move {
				loop {
					if credit.lock().map_or(true, |c| c > 0) {
						return Ok(());
					}
					notify.notified().await;
				}
			}
		}

		fn send_datagram(&mut self, payload: Bytes) -> Result<(), TransportError> {
			self.dgram_tx
				.send(payload)
				.map_err(|_| TransportError::Failed("peer gone".into()))
		}

		async fn recv_datagram(&mut self) -> Result<Bytes, TransportError> {
			self.dgram_rx
				.lock()
				.await
				.recv()
				.await
				.ok_or(TransportError::Failed("peer gone".into()))
		}

		fn close(&mut self, code: u32, _reason: &str) {
			let mut closed = self.closed.lock();
			if closed.is_none() {
				*closed = Some(code);
			}
		}
	}

	#[derive(Default)]
	struct SharedState {
		chunks: VecDeque<(Bytes, bool)>,
		reset: Option<u32>,
		fin: bool,
	}

	#[derive(Clone, Default)]
	struct Shared {
		state: Lock<SharedState>,
		notify: Arc<Notify>,
	}

	pub struct MockSendStream {
		shared: Shared,
		stopped: CancellationToken,
		priorities: Lock<Vec<(u8, u64)>>,
	}

	impl SendStream for MockSendStream {
		fn set_priority(&mut self, urgency: u8, order: u64) {
			self.priorities.lock().push((urgency, order));
		}

		fn write(&mut self, data: Bytes, fin: bool) -> Result<(), TransportError> {
			let mut state = self.shared.state.lock();
			if state.reset.is_some() {
				return Err(TransportError::Failed("stream reset".into()));
			}
			if state.fin {
				return Err(TransportError::Failed("stream finished".into()));
			}

			state.fin |= fin;
			state.chunks.push_back((data, fin));
			self.shared.notify.notify_one();

			Ok(())
		}

		fn writable(&mut self) -> impl std::future::Future<Output = Result<(), TransportError>> + Send + 'static {
			std::future::ready(Ok(()))
		}

		fn reset(&mut self, code: u32) {
			self.shared.state.lock().reset = Some(code);
			self.shared.notify.notify_one();
		}

		fn stopped(&self) -> CancellationToken {
			self.stopped.clone()
		}
	}

	pub struct MockRecvStream {
		shared: Shared,
		stopped: CancellationToken,
		fin_delivered: bool,
	}

	impl RecvStream for MockRecvStream {
		async fn read(&mut self) -> Result<StreamData, TransportError> {
			loop {
				let notified = {
					let mut state = self.shared.state.lock();

					if let Some((data, fin)) = state.chunks.pop_front() {
						self.fin_delivered |= fin;
						return Ok(StreamData { data, fin });
					}

					if let Some(code) = state.reset {
						return Err(TransportError::Reset(code));
					}

					if self.fin_delivered || state.fin {
						return Ok(StreamData {
							data: Bytes::new(),
							fin: true,
						});
					}

					self.shared.notify.notified()
				};

				notified.await;
			}
		}

		fn stop(&mut self, _code: u32) {
			self.stopped.cancel();
		}
	}
}

