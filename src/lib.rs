//! CPU proof-of-work miner for keystone-chain pools.
//!
//! The miner connects to a pool over a newline-delimited JSON protocol,
//! subscribes and authorizes, then drives a pool of CPU worker threads
//! searching the 32-bit nonce space of a 64-byte block header. Found
//! shares are submitted back over the same session.
//!
//! Module map:
//!
//! - [`stratum`]: the pool session — framing, request correlation, and
//!   notification dispatch.
//! - [`distributor`]: worker-pool ownership and job/difficulty fan-out.
//! - [`worker`]: the per-thread search loop.
//! - [`job`]: the immutable work assignment and header/merkle codec.
//! - [`pow`]: injected hash capabilities (proof-of-work hash, merkle digest).
//! - [`driver`]: the outer connect/reconnect lifecycle.

pub mod config;
pub mod distributor;
pub mod driver;
pub mod job;
pub mod pow;
pub mod stratum;
pub mod tracing;
pub mod u256;
pub mod worker;
