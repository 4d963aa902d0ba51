use std::sync::Arc;

use super::receive::{FetchState, SubscribeState};
use super::{Session, SessionError};
use crate::consumer::SubgroupConsumer;
use crate::data::{ObjectStreamDecoder, ObjectStatus, StreamEvent};
use crate::transport::{self, RecvStream, TransportError};
use crate::{PublishError, PublishStatus, ResetCode};

// What this stream turned out to carry, resolved from its header.
enum Role {
	Unknown,
	Subgroup {
		state: SubscribeState,
		consumer: Option<Arc<dyn SubgroupConsumer>>,
		publisher_priority: u8,
	},
	Fetch {
		state: FetchState,
	},
}

enum Dispatch {
	Continue,
	// The header named a subscription we don't know; drop the stream.
	Unwanted,
}

/// Drive one inbound unidirectional stream: decode it, route it to the right
/// receive state, and feed the application consumer.
///
/// Consumer errors stop this stream only; parse errors close the session.
pub(super) async fn run<S: transport::Session>(session: Session<S>, mut stream: S::RecvStream) {
	let mut decoder = ObjectStreamDecoder::new();
	let mut role = Role::Unknown;
	let session_token = session.token();

	loop {
		tokio::select! {
			_ = session_token.cancelled() => {
				stream.stop(ResetCode::SessionClosed.into());
				return;
			}
			_ = role_cancelled(&role) => {
				// Local unsubscribe or fetch_cancel; stop reading.
				stream.stop(ResetCode::Cancelled.into());
				finalize(&session, &mut role, false);
				return;
			}
			res = stream.read() => match res {
				Ok(data) => {
					decoder.push(data.data, data.fin);

					loop {
						match decoder.next() {
							Ok(Some(event)) => match dispatch(&session, &mut role, event) {
								Ok(Dispatch::Continue) => {}
								Ok(Dispatch::Unwanted) => {
									stream.stop(ResetCode::Cancelled.into());
									return;
								}
								Err(err) => {
									tracing::warn!(%err, "consumer rejected stream data");
									stream.stop(0);
									finalize(&session, &mut role, false);
									return;
								}
							},
							Ok(None) => break,
							Err(err) => {
								tracing::error!(%err, "malformed data stream");
								session.close_with(SessionError::Decode(err));
								return;
							}
						}
					}

					if decoder.is_done() {
						return;
					}
				}
				Err(TransportError::Reset(code)) => {
					deliver_reset(&role, code.into());
					finalize(&session, &mut role, false);
					return;
				}
				Err(err) => {
					tracing::warn!(%err, "data stream read failed");
					deliver_reset(&role, ResetCode::InternalError);
					finalize(&session, &mut role, false);
					return;
				}
			}
		}
	}
}

async fn role_cancelled(role: &Role) {
	match role {
		Role::Subgroup { state, .. } => state.token().cancelled_owned().await,
		Role::Fetch { state } => state.token().cancelled_owned().await,
		Role::Unknown => std::future::pending().await,
	}
}

fn dispatch<S: transport::Session>(
	session: &Session<S>,
	role: &mut Role,
	event: StreamEvent,
) -> Result<Dispatch, PublishError> {
	match event {
		StreamEvent::Subgroup(header) => {
			let state = match session.subscribe_state(header.track_alias) {
				Some(state) => state,
				None => {
					tracing::warn!(alias = header.track_alias, "subgroup for unknown track");
					return Ok(Dispatch::Unwanted);
				}
			};

			// An unsubscribe may have released the callback already; if so we
			// keep draining and drop everything on the floor.
			let consumer = match state.callback() {
				Some(callback) => Some(callback.begin_subgroup(header.group, header.subgroup, header.publisher_priority)?),
				None => None,
			};

			*role = Role::Subgroup {
				state,
				consumer,
				publisher_priority: header.publisher_priority,
			};
			Ok(Dispatch::Continue)
		}

		StreamEvent::Fetch(header) => {
			let state = match session.fetch_state(header.subscribe_id) {
				Some(state) => state,
				None => {
					tracing::warn!(id = header.subscribe_id, "fetch response for unknown subscribe id");
					return Ok(Dispatch::Unwanted);
				}
			};

			*role = Role::Fetch { state };
			Ok(Dispatch::Continue)
		}

		StreamEvent::ObjectBegin {
			group,
			subgroup,
			id,
			length,
			initial,
			object_complete,
			stream_complete,
		} => {
			match role {
				Role::Subgroup { consumer, state, .. } => {
					let target = match (consumer.as_ref(), state.callback()) {
						(Some(consumer), Some(_)) => consumer.clone(),
						_ => return Ok(Dispatch::Continue), // cancelled; drop the object
					};

					if object_complete {
						target.object(id, initial, stream_complete)?;
					} else {
						target.begin_object(id, length, initial)?;
					}
				}
				Role::Fetch { state } => {
					let target = match state.callback() {
						Some(callback) => callback,
						None => return Ok(Dispatch::Continue),
					};

					if object_complete {
						target.object(group, subgroup, id, initial, stream_complete)?;
					} else {
						target.begin_object(group, subgroup, id, length, initial)?;
					}
				}
				Role::Unknown => return Ok(Dispatch::Unwanted),
			}

			if stream_complete {
				finalize(session, role, false);
			}
			Ok(Dispatch::Continue)
		}

		StreamEvent::ObjectPayload { payload, object_complete } => {
			let status = match role {
				Role::Subgroup { consumer, state, .. } => match (consumer.as_ref(), state.callback()) {
					(Some(consumer), Some(_)) => consumer.object_payload(payload, false)?,
					_ => return Ok(Dispatch::Continue),
				},
				Role::Fetch { state } => match state.callback() {
					Some(callback) => callback.object_payload(payload, false)?,
					None => return Ok(Dispatch::Continue),
				},
				Role::Unknown => return Ok(Dispatch::Unwanted),
			};

			// The consumer's accounting must agree with the wire framing.
			if (status == PublishStatus::Done) != object_complete {
				return Err(PublishError::Api("object length accounting mismatch".into()));
			}

			Ok(Dispatch::Continue)
		}

		StreamEvent::ObjectStatus { group, subgroup, id, status } => {
			match dispatch_status(role, group, subgroup, id, status)? {
				Finalize::No => {}
				Finalize::Quiet => finalize(session, role, false),
				Finalize::Deliver => finalize(session, role, true),
			}
			Ok(Dispatch::Continue)
		}

		StreamEvent::EndOfStream => {
			finalize(session, role, true);
			Ok(Dispatch::Continue)
		}
	}
}

enum Finalize {
	No,
	Quiet,
	Deliver,
}

fn dispatch_status(
	role: &Role,
	group: u64,
	subgroup: u64,
	id: u64,
	status: ObjectStatus,
) -> Result<Finalize, PublishError> {
	match role {
		Role::Subgroup {
			state,
			consumer,
			publisher_priority,
		} => {
			let (target, track) = match (consumer.as_ref(), state.callback()) {
				(Some(consumer), Some(track)) => (consumer.clone(), track),
				_ => return Ok(Finalize::No),
			};

			match status {
				ObjectStatus::Normal => Ok(Finalize::No),
				ObjectStatus::ObjectNotExist => {
					target.object_not_exists(id, false)?;
					Ok(Finalize::No)
				}
				ObjectStatus::GroupNotExist => {
					// This one lives on the track, not the subgroup.
					track.group_not_exists(group, subgroup, *publisher_priority)?;
					Ok(Finalize::Quiet)
				}
				ObjectStatus::EndOfGroup => {
					target.end_of_group(id)?;
					Ok(Finalize::Quiet)
				}
				ObjectStatus::EndOfTrackAndGroup => {
					target.end_of_track_and_group(id)?;
					Ok(Finalize::Quiet)
				}
				ObjectStatus::EndOfSubgroup => Ok(Finalize::Deliver),
			}
		}
		Role::Fetch { state } => {
			let callback = match state.callback() {
				Some(callback) => callback,
				None => return Ok(Finalize::No),
			};

			match status {
				ObjectStatus::Normal => Ok(Finalize::No),
				ObjectStatus::ObjectNotExist => {
					callback.object_not_exists(group, subgroup, id, false)?;
					Ok(Finalize::No)
				}
				ObjectStatus::GroupNotExist => {
					callback.group_not_exists(group, subgroup, false)?;
					Ok(Finalize::No)
				}
				ObjectStatus::EndOfGroup => {
					callback.end_of_group(group, subgroup, id, false)?;
					Ok(Finalize::No)
				}
				ObjectStatus::EndOfTrackAndGroup => {
					callback.end_of_track_and_group(group, subgroup, id)?;
					Ok(Finalize::Quiet)
				}
				ObjectStatus::EndOfSubgroup => Ok(Finalize::Deliver),
			}
		}
		Role::Unknown => Ok(Finalize::No),
	}
}

// Tear down the per-stream consumer, optionally delivering the end callback.
fn finalize<S: transport::Session>(session: &Session<S>, role: &mut Role, deliver: bool) {
	match role {
		Role::Subgroup { state, consumer, .. } => {
			if deliver {
				if let (Some(consumer), Some(_)) = (consumer.as_ref(), state.callback()) {
					consumer.end_of_subgroup().ok();
				}
			}
			*consumer = None;
		}
		Role::Fetch { state } => {
			if deliver {
				if let Some(callback) = state.callback() {
					callback.end_of_fetch().ok();
				}
			}
			session.fetch_stream_finished(state);
		}
		Role::Unknown => {}
	}
}

fn deliver_reset(role: &Role, code: ResetCode) {
	match role {
		Role::Subgroup { state, consumer, .. } => {
			if let (Some(consumer), Some(_)) = (consumer.as_ref(), state.callback()) {
				consumer.reset(code);
			}
		}
		Role::Fetch { state } => {
			if let Some(callback) = state.callback() {
				callback.reset(code);
			}
		}
		Role::Unknown => {}
	}
}
