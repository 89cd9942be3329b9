//! Pool session over the line-oriented JSON mining protocol.
//!
//! The protocol is a simplified JSON-RPC dialect: requests carry a string
//! `id`, a `method`, and an array of string params; responses echo the id
//! with either `result` or `error`; unsolicited notifications carry a
//! `method` and are dispatched regardless of any id. [`client`] owns the
//! session lifecycle, [`connection`] the framing, and [`messages`] the
//! wire model.

pub mod client;
pub mod connection;
pub mod error;
pub mod messages;

pub use client::{ClientHandle, Session, StratumClient};
pub use error::{StratumError, StratumResult};
pub use messages::PoolEvent;
