//! # In-Memory Storage Backend
//!
//! A [`Storage`] implementation over a single append-ordered record vector,
//! for tests and embedded use. Positions are plain record offsets carried as
//! decimal strings in the opaque `pos` field; appenders wake blocked tailing
//! cursors through a `tokio::sync::Notify`.
//!
//! The filter language here is deliberately tiny — a conjunction of
//! `key=value` terms joined by `and` (an empty filter matches everything).
//! The real query grammar belongs to the storage layer proper; this matcher
//! exists so the engine's behavior can be exercised end to end.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tr_core::{LogEvent, Source};

use crate::cursor::{Cursor, CursorError, CursorState, Storage};

#[derive(Clone)]
struct MemRecord {
    tags: String,
    timestamp: i64,
    message: String,
}

#[derive(Default)]
struct Shared {
    records: Mutex<Vec<MemRecord>>,
    new_data: Notify,
}

#[derive(Clone, Default)]
pub struct MemStore {
    shared: Arc<Shared>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record and wake any cursor blocked in `wait_new_data`.
    pub fn append(&self, tags: &str, timestamp: i64, message: &str) {
        self.shared.records.lock().unwrap().push(MemRecord {
            tags: tags.to_string(),
            timestamp,
            message: message.to_string(),
        });
        self.shared.new_data.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.shared.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemStore {
    fn open_cursor(&self, state: &CursorState) -> Result<Box<dyn Cursor>, CursorError> {
        let matcher = Matcher::compile(&state.query)
            .map_err(CursorError::InvalidQuery)?;
        let pos = if state.pos.is_empty() {
            0
        } else {
            state
                .pos
                .parse::<usize>()
                .map_err(|_| CursorError::InvalidPos(state.pos.clone()))?
        };
        Ok(Box::new(MemCursor {
            shared: Arc::clone(&self.shared),
            id: state.id,
            query: state.query.clone(),
            matcher,
            pos,
        }))
    }

    fn sources(&self, filter: &str) -> Result<Vec<Source>, CursorError> {
        let matcher = Matcher::compile(filter).map_err(CursorError::InvalidQuery)?;
        let records = self.shared.records.lock().unwrap();
        // BTreeMap keeps the listing deterministic.
        let mut by_tags: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
        for rec in records.iter() {
            if matcher.matches(&rec.tags) {
                let entry = by_tags.entry(rec.tags.as_str()).or_default();
                entry.0 += rec.message.len() as u64;
                entry.1 += 1;
            }
        }
        Ok(by_tags
            .into_iter()
            .map(|(tags, (size, records))| Source {
                tags: tags.to_string(),
                size,
                records,
            })
            .collect())
    }
}

struct MemCursor {
    shared: Arc<Shared>,
    id: u64,
    query: String,
    matcher: Matcher,
    pos: usize,
}

#[async_trait]
impl Cursor for MemCursor {
    fn state(&self) -> CursorState {
        CursorState {
            id: self.id,
            query: self.query.clone(),
            pos: self.pos.to_string(),
        }
    }

    async fn get(&mut self) -> Result<LogEvent, CursorError> {
        let records = self.shared.records.lock().unwrap();
        // Skip past non-matching records; the position stays monotone.
        while self.pos < records.len() {
            let rec = &records[self.pos];
            if self.matcher.matches(&rec.tags) {
                return Ok(LogEvent {
                    timestamp: rec.timestamp,
                    tags: rec.tags.clone(),
                    message: rec.message.clone(),
                });
            }
            self.pos += 1;
        }
        Err(CursorError::Eof)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    async fn wait_new_data(&mut self) {
        loop {
            let notified = self.shared.new_data.notified();
            if self.shared.records.lock().unwrap().len() > self.pos {
                return;
            }
            notified.await;
        }
    }
}

// =============================================================================
// Filter matcher
// =============================================================================

/// Compiled conjunction of required `key=value` tag pairs.
struct Matcher {
    required: Vec<(String, String)>,
}

impl Matcher {
    fn compile(filter: &str) -> Result<Self, String> {
        let mut required = Vec::new();
        // Whitespace-separated `key=value` terms; a bare `and` between terms
        // is allowed and ignored (conjunction is the only combinator).
        for term in filter.split_whitespace() {
            if term.eq_ignore_ascii_case("and") {
                continue;
            }
            let Some((key, value)) = term.split_once('=') else {
                return Err(format!("expected key=value, got '{term}'"));
            };
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() {
                return Err(format!("empty tag key in '{term}'"));
            }
            required.push((key.to_string(), value.to_string()));
        }
        Ok(Self { required })
    }

    fn matches(&self, tag_line: &str) -> bool {
        if self.required.is_empty() {
            return true;
        }
        let pairs: Vec<(&str, &str)> = tag_line
            .split(',')
            .filter_map(|p| p.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();
        self.required
            .iter()
            .all(|(k, v)| pairs.iter().any(|(pk, pv)| pk == k && pv == v))
    }
}
