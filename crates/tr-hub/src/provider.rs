//! # Cursor Provider
//!
//! Get-or-create / release registry mapping a session identifier to its
//! live cursor. Creating a cursor means compiling a filter and resolving a
//! position, which is expensive; tailing clients call back within seconds,
//! so a released cursor can be parked warm and handed straight back to the
//! session's next call instead of being rebuilt.
//!
//! At most one call holds a session's cursor at a time. While held, the
//! session occupies a `Busy` slot and a second call for the same identifier
//! is rejected; between calls a cacheable cursor sits in an `Idle` slot
//! until the sweeper evicts it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::cursor::{Cursor, CursorError, CursorState, Storage};

enum Slot {
    /// Cursor checked out by an in-flight call. `cacheable` records whether
    /// release should park it warm.
    Busy { cacheable: bool },
    /// Cursor parked warm between calls.
    Idle {
        cursor: Box<dyn Cursor>,
        since: Instant,
    },
}

pub struct CursorProvider {
    storage: Arc<dyn Storage>,
    slots: Mutex<HashMap<u64, Slot>>,
    idle_ttl: Duration,
}

impl CursorProvider {
    pub fn new(storage: Arc<dyn Storage>, idle_ttl: Duration) -> Self {
        Self {
            storage,
            slots: Mutex::new(HashMap::new()),
            idle_ttl,
        }
    }

    /// Look up a warm cursor for `state.id`, or open a fresh one positioned
    /// at `state.pos`.
    ///
    /// `cacheable` signals that the caller expects to come back soon
    /// (tailing, or a clamped limit); it takes effect at release time.
    /// A session whose cursor is already held returns [`CursorError::Busy`].
    pub async fn get_or_create(
        &self,
        state: &CursorState,
        cacheable: bool,
    ) -> Result<Box<dyn Cursor>, CursorError> {
        let mut slots = self.slots.lock().await;
        match slots.get_mut(&state.id) {
            Some(Slot::Busy { .. }) => Err(CursorError::Busy(state.id)),
            Some(slot @ Slot::Idle { .. }) => {
                let parked = std::mem::replace(slot, Slot::Busy { cacheable });
                let Slot::Idle { cursor, since } = parked else {
                    unreachable!("slot matched Idle above");
                };
                debug!(
                    session = state.id,
                    idle_ms = since.elapsed().as_millis() as u64,
                    "warm cursor hit"
                );
                Ok(cursor)
            }
            None => {
                let cursor = self.storage.open_cursor(state)?;
                slots.insert(state.id, Slot::Busy { cacheable });
                Ok(cursor)
            }
        }
    }

    /// Give a cursor back under the identifier it was acquired with; the
    /// returned state carries the session's new authoritative position.
    ///
    /// Cacheable cursors are parked warm; everything else is torn down here
    /// and now. The slot is keyed on `id`, never on what the cursor itself
    /// reports, so a misbehaving storage cursor cannot leak its own slot or
    /// hijack another session's. Called exactly once per execution, on
    /// every exit path.
    pub async fn release(&self, id: u64, cursor: Box<dyn Cursor>) -> CursorState {
        let mut state = cursor.state();
        state.id = id;
        let mut slots = self.slots.lock().await;
        match slots.remove(&id) {
            Some(Slot::Busy { cacheable: true }) => {
                slots.insert(
                    id,
                    Slot::Idle {
                        cursor,
                        since: Instant::now(),
                    },
                );
            }
            // Non-cacheable, or released without a matching acquire:
            // the cursor drops here.
            _ => {}
        }
        state
    }

    /// Drop idle cursors that outlived the TTL. Returns how many went.
    pub async fn evict_idle(&self) -> usize {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        let ttl = self.idle_ttl;
        slots.retain(|_, slot| match slot {
            Slot::Idle { since, .. } => since.elapsed() < ttl,
            Slot::Busy { .. } => true,
        });
        let evicted = before - slots.len();
        if evicted > 0 {
            debug!(evicted, "idle cursors evicted");
        }
        evicted
    }

    /// Background eviction sweep on a fixed interval.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let provider = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                provider.evict_idle().await;
            }
        })
    }

    /// Whether any slot (busy or idle) exists for a session.
    pub async fn is_registered(&self, id: u64) -> bool {
        self.slots.lock().await.contains_key(&id)
    }

    /// Whether a warm (idle) cursor is parked for a session.
    pub async fn is_warm(&self, id: u64) -> bool {
        matches!(
            self.slots.lock().await.get(&id),
            Some(Slot::Idle { .. })
        )
    }
}
