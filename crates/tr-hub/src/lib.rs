//! # tr-hub — The "Engine" of TAILRACE
//!
//! Server side of the query path. An inbound call arrives as a wire-encoded
//! body on a fixed endpoint; the engine turns it into a live, stateful read
//! cursor, pulls records under a clamped limit, optionally blocks (with
//! cancellation) until new data arrives, and hands back both the matched
//! records and a resumable position.
//!
//! Module map:
//!
//! - [`cursor`] — the cursor and storage contracts this engine consumes
//! - [`provider`] — get-or-create / release registry that keeps cursors
//!   warm across calls for tailing sessions
//! - [`querier`] — the per-call execution state machine
//! - [`rpc`] — endpoint dispatch onto the transport boundary
//! - [`config`] — the policy knobs (limit ceiling, wait ceiling, idle TTL)
//! - [`mem`] — in-memory storage backend for tests and embedded use

pub mod config;
pub mod cursor;
pub mod mem;
pub mod provider;
pub mod querier;
pub mod rpc;
