//! # Cursor Contract
//!
//! The engine does not read the log store directly; it drives a [`Cursor`]
//! owned by the storage/indexing layer. A cursor is positioned at a
//! specific place in the stream of records matching one filter expression,
//! can report the record under it, advance past it, and block until
//! something new appears beyond it.
//!
//! [`Storage`] is the factory seam: compile a filter, resolve an opaque
//! position, hand out a cursor — and answer the sources listing.

use async_trait::async_trait;
use thiserror::Error;
use tr_core::{LogEvent, Source};

/// Identity and position of one logical tailing session.
///
/// Only the cursor provider mutates this, on create and release; the
/// released state's `pos` is the authoritative resume position for the
/// session's next call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CursorState {
    /// Session identifier, chosen by the client.
    pub id: u64,
    /// Filter expression the cursor was compiled from.
    pub query: String,
    /// Opaque position, storage-defined. Empty means "from the start".
    pub pos: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    /// End of currently available data. Not a failure.
    #[error("end of stream")]
    Eof,
    /// The session's cursor is held by another in-flight call.
    #[error("cursor for session {0} is busy")]
    Busy(u64),
    #[error("invalid filter expression: {0}")]
    InvalidQuery(String),
    #[error("invalid position: {0}")]
    InvalidPos(String),
    #[error("read failed: {0}")]
    Io(String),
}

/// A live read handle into the log store.
///
/// `get` reports the record currently under the cursor, already translated
/// to wire form (record + tag-line → [`LogEvent`]); it does not move the
/// cursor. `advance` steps past that record. `wait_new_data` resolves once
/// data beyond the current position exists; the caller is responsible for
/// bounding and canceling that wait.
#[async_trait]
pub trait Cursor: Send {
    /// Current state; `pos` reflects everything consumed so far.
    fn state(&self) -> CursorState;

    async fn get(&mut self) -> Result<LogEvent, CursorError>;

    fn advance(&mut self);

    async fn wait_new_data(&mut self);
}

/// The external storage + tag-index collaborator.
pub trait Storage: Send + Sync {
    /// Open a cursor positioned at `state.pos` for `state.query`.
    fn open_cursor(&self, state: &CursorState) -> Result<Box<dyn Cursor>, CursorError>;

    /// All sources whose tag sets satisfy the filter.
    fn sources(&self, filter: &str) -> Result<Vec<Source>, CursorError>;
}
