//! Stratum-style pool protocol.
//!
//! JSON-RPC-like commands and notifications, wrapped in several layers of
//! base64 and framed by newlines. See [`codec`] for the framing and
//! [`messages`] for the method tokens and message shapes.

mod ack;
pub mod codec;
mod connection;
pub mod messages;

pub use ack::{AckSlot, ACK_TIMEOUT};
pub use codec::StratumCodec;
pub use connection::StratumConnection;
pub use messages::{PoolMessage, Request};
