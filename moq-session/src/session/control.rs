use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::Notify;

use super::SessionError;
use crate::coding::Encode;
use crate::message::Message;
use crate::transport::SendStream;
use crate::util::Lock;

/// The outbound half of the control stream: a shared buffer that handlers
/// append to, drained by a single write loop.
///
/// Handlers never block; backpressure is absorbed by the buffer and applied
/// to the loop via the transport's writable signal.
#[derive(Clone, Default)]
pub(super) struct ControlChannel {
	buffer: Lock<BytesMut>,
	event: Arc<Notify>,
}

impl ControlChannel {
	/// Serialize a message into the shared buffer and wake the write loop.
	pub fn send<M: Into<Message>>(&self, msg: M) -> Result<(), SessionError> {
		let msg = msg.into();
		tracing::debug!(name = msg.name(), "control send");

		msg.encode(&mut *self.buffer.lock())?;
		self.event.notify_one();

		Ok(())
	}

	/// Move the buffer to the transport whenever signalled, waiting for
	/// writable credit between writes. Exits on write error.
	pub async fn write_loop<S: SendStream>(&self, mut stream: S) -> Result<(), SessionError> {
		loop {
			let pending = {
				let mut buffer = self.buffer.lock();
				match buffer.is_empty() {
					true => None,
					false => Some(buffer.split().freeze()),
				}
			};

			match pending {
				Some(data) => {
					stream.write(data, false)?;
					stream.writable().await?;
				}
				None => self.event.notified().await,
			}
		}
	}
}
