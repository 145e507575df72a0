//! # tr-core — The "Shape" of TAILRACE
//!
//! Defines the client-visible data model of the query path: the request and
//! result records that cross the wire, the sources listing, and the
//! operation-level error that rides inside a successfully transported
//! response.
//!
//! The binary encoding of these types lives in [`wire`]. The sources
//! listing is the one non-performance-critical surface and is carried as
//! JSON instead; its types derive `serde` for that reason.

pub mod wire;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Log events and query records
// =============================================================================

/// A single matched log record in wire form.
///
/// Produced server-side by translating a storage record plus its associated
/// tag-line into the shape the client sees.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogEvent {
    /// Record timestamp, nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Tag-line of the source that produced the record (e.g. `app=web,dc=eu`).
    pub tags: String,
    /// The record payload.
    pub message: String,
}

/// A query over the log store: a filter expression plus a resume position.
///
/// `id` names the logical tailing session; two requests with the same `id`
/// resolve to the same server-side cursor. `pos` is opaque to the client —
/// it is whatever the server handed back last time (empty = from the start).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryRequest {
    /// Client-chosen session identifier, correlates cursors across calls.
    pub id: u64,
    /// Filter expression (grammar is owned by the storage layer).
    pub query: String,
    /// Opaque resume position. Empty string means "from the start".
    pub pos: String,
    /// Maximum records to return. Must be non-negative; the server clamps
    /// it to its own ceiling.
    pub limit: i64,
    /// Seconds to wait for new data when the cursor is at the end.
    /// 0 disables tailing for this call.
    pub wait_timeout_secs: i32,
}

/// The answer to a [`QueryRequest`].
///
/// `next` is a faithful continuation: it echoes the session id, query text,
/// the originally requested limit and wait timeout, and carries the new
/// resume position. Feeding it straight back yields the records after the
/// ones in `events`, with nothing duplicated or skipped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryResult {
    /// Matched records, in read order.
    pub events: Vec<LogEvent>,
    /// Request to issue to continue exactly where this call stopped.
    pub next: QueryRequest,
}

// =============================================================================
// Sources
// =============================================================================

/// One source (tag set) known to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Tag-line identifying the source.
    pub tags: String,
    /// Total payload bytes stored for the source.
    pub size: u64,
    /// Number of records stored for the source.
    pub records: u64,
}

/// Answer to a Sources call: which sources satisfy a tag filter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourcesResult {
    pub sources: Vec<Source>,
    pub count: usize,
}

// =============================================================================
// Operation errors
// =============================================================================

/// Classification of an operation-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpErrorKind {
    /// Malformed request or response body.
    Decode,
    /// Out-of-range limit or wait timeout.
    Validation,
    /// The cursor could not be obtained (bad filter, bad position, or the
    /// session's cursor is already held by another call).
    CursorCreate,
    /// A record fetch failed mid-stream.
    Read,
    /// The call's governing context was canceled.
    Canceled,
    /// Anything else server-side (encode failures, unknown endpoint).
    Internal,
}

impl std::fmt::Display for OpErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode => write!(f, "decode"),
            Self::Validation => write!(f, "validation"),
            Self::CursorCreate => write!(f, "cursor_create"),
            Self::Read => write!(f, "read"),
            Self::Canceled => write!(f, "canceled"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// A failure reported inside a successfully transported response.
///
/// Kept strictly apart from the transport-level error: an `OpError` means
/// the server answered and declined or failed the request, not that the
/// server was unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct OpError {
    pub kind: OpErrorKind,
    pub message: String,
}

impl OpError {
    pub fn new(kind: OpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn decode(message: impl std::fmt::Display) -> Self {
        Self::new(OpErrorKind::Decode, message.to_string())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(OpErrorKind::Validation, message)
    }

    pub fn cursor_create(message: impl std::fmt::Display) -> Self {
        Self::new(OpErrorKind::CursorCreate, message.to_string())
    }

    pub fn read(message: impl std::fmt::Display) -> Self {
        Self::new(OpErrorKind::Read, message.to_string())
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(OpErrorKind::Canceled, message)
    }

    pub fn internal(message: impl std::fmt::Display) -> Self {
        Self::new(OpErrorKind::Internal, message.to_string())
    }
}
