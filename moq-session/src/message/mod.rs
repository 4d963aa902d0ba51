//! Control messages, framed on the control bidirectional stream.
mod announce;
mod fetch;
mod go_away;
mod max_subscribe_id;
mod subscribe;
mod subscribe_announces;
mod subscribe_done;
mod track_status;

pub use announce::*;
pub use fetch::*;
pub use go_away::*;
pub use max_subscribe_id::*;
pub use subscribe::*;
pub use subscribe_announces::*;
pub use subscribe_done::*;
pub use track_status::*;

use std::fmt;

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::setup::{ClientSetup, ServerSetup};

// Use a macro to generate the message types rather than copy-paste.
// This implements a decode/encode method that uses the specified type.
macro_rules! message_types {
    {$($name:ident = $val:expr,)*} => {
		/// Any message sent on the control stream, prefixed with its type.
		#[derive(Clone)]
		pub enum Message {
			$($name($name)),*
		}

		impl Decode for Message {
			fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
				let t = u64::decode(r)?;

				match t {
					$($val => {
						let msg = $name::decode(r)?;
						Ok(Self::$name(msg))
					})*
					_ => Err(DecodeError::InvalidMessage(t)),
				}
			}
		}

		impl Encode for Message {
			fn encode<W: bytes::BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
				match self {
					$(Self::$name(ref m) => {
						($val as u64).encode(w)?;
						m.encode(w)
					},)*
				}
			}
		}

		impl Message {
			pub fn id(&self) -> u64 {
				match self {
					$(Self::$name(_) => {
						$val
					},)*
				}
			}

			pub fn name(&self) -> &'static str {
				match self {
					$(Self::$name(_) => {
						stringify!($name)
					},)*
				}
			}
		}

		$(impl From<$name> for Message {
			fn from(m: $name) -> Self {
				Message::$name(m)
			}
		})*

		impl fmt::Debug for Message {
			// Delegate to the message formatter
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				match self {
					$(Self::$name(ref m) => m.fmt(f),)*
				}
			}
		}
    }
}

// Each message is prefixed with the given varint type.
message_types! {
	SubscribeUpdate = 0x2,
	Subscribe = 0x3,
	SubscribeOk = 0x4,
	SubscribeError = 0x5,
	Announce = 0x6,
	AnnounceOk = 0x7,
	AnnounceError = 0x8,
	Unannounce = 0x9,
	Unsubscribe = 0xa,
	SubscribeDone = 0xb,
	AnnounceCancel = 0xc,
	TrackStatusRequest = 0xd,
	TrackStatus = 0xe,
	GoAway = 0x10,
	SubscribeAnnounces = 0x11,
	SubscribeAnnouncesOk = 0x12,
	SubscribeAnnouncesError = 0x13,
	UnsubscribeAnnounces = 0x14,
	MaxSubscribeId = 0x15,
	Fetch = 0x16,
	FetchCancel = 0x17,
	FetchOk = 0x18,
	FetchError = 0x19,
	ClientSetup = 0x40,
	ServerSetup = 0x41,
}
