//! # Query Executor
//!
//! The per-call state machine: decode → validate → acquire cursor → read
//! (and possibly wait) → release → encode. The only place the engine is
//! allowed to suspend for more than an instant is the wait-for-new-data
//! phase, and that wait is a three-way race between fresh data, the
//! requested timeout, and the call's governing cancellation — with
//! cancellation winning ties.
//!
//! Whatever path an execution takes out of the read loop, the cursor goes
//! back to the provider exactly once, and the released position is what the
//! response echoes as the session's next resume point.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use tr_core::wire::{Writable, WireError, WireReader, WireWriter};
use tr_core::{LogEvent, OpError, QueryRequest, QueryResult, SourcesResult};
use tr_rpc::cancel::CancelToken;
use tr_rpc::pool::{BytesPool, PooledBuf};
use tr_rpc::Reply;

use crate::config::HubConfig;
use crate::cursor::{CursorError, CursorState, Storage};
use crate::provider::CursorProvider;

pub struct ServerQuerier {
    provider: Arc<CursorProvider>,
    storage: Arc<dyn Storage>,
    pool: Arc<BytesPool>,
    config: HubConfig,
}

impl ServerQuerier {
    pub fn new(
        provider: Arc<CursorProvider>,
        storage: Arc<dyn Storage>,
        pool: Arc<BytesPool>,
        config: HubConfig,
    ) -> Self {
        Self {
            provider,
            storage,
            pool,
            config,
        }
    }

    /// Execute one Query call. The reply is either a wire-encoded
    /// [`QueryResult`] or the operation error; transport failures are not
    /// this layer's to report.
    pub async fn query(&self, cancel: &CancelToken, body: &[u8]) -> Reply {
        let req = match QueryRequest::read_from(&mut WireReader::new(body)) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "query request with undecodable body");
                return Reply::Failed(OpError::decode(e));
            }
        };

        if req.wait_timeout_secs < 0 || req.wait_timeout_secs > self.config.max_wait_timeout_secs {
            return Reply::Failed(OpError::validation(format!(
                "wait timeout must be in [0..{}] seconds, got {}",
                self.config.max_wait_timeout_secs, req.wait_timeout_secs
            )));
        }
        if req.limit < 0 {
            return Reply::Failed(OpError::validation(format!(
                "limit must be non-negative, got {}",
                req.limit
            )));
        }

        let effective_limit = req.limit.min(self.config.max_limit);
        // A tailing caller, or one whose limit we clamped, is coming back:
        // keep its cursor warm across the gap.
        let cacheable = req.wait_timeout_secs > 0 || effective_limit != req.limit;

        let state = CursorState {
            id: req.id,
            query: req.query.clone(),
            pos: req.pos.clone(),
        };
        let mut cur = match self.provider.get_or_create(&state, cacheable).await {
            Ok(cur) => cur,
            Err(e) => {
                warn!(session = req.id, error = %e, "could not obtain cursor");
                return Reply::Failed(OpError::cursor_create(e));
            }
        };

        let mut events: Vec<LogEvent> = Vec::new();
        let mut remaining = effective_limit;
        let mut failure: Option<OpError> = None;
        // One deadline bounds every wait this call performs; a wake that
        // yields no matching records does not extend it.
        let wait_deadline =
            tokio::time::Instant::now() + Duration::from_secs(req.wait_timeout_secs as u64);

        'read: while remaining > 0 {
            // Cancellation stops the loop at a record boundary, never
            // mid-record.
            if cancel.is_canceled() {
                failure = Some(OpError::canceled("query canceled"));
                break;
            }
            match cur.get().await {
                Ok(ev) => {
                    events.push(ev);
                    cur.advance();
                    remaining -= 1;
                }
                Err(CursorError::Eof) => {
                    // Suspend only when the call produced nothing yet and
                    // asked to tail; a later EOF is a clean stop.
                    if !events.is_empty() || req.wait_timeout_secs == 0 {
                        break;
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.canceled() => {
                            failure = Some(OpError::canceled("query canceled during wait"));
                            break 'read;
                        }
                        _ = tokio::time::sleep_until(wait_deadline) => {
                            debug!(
                                session = req.id,
                                wait_secs = req.wait_timeout_secs,
                                "wait for new data expired"
                            );
                            break 'read;
                        }
                        _ = cur.wait_new_data() => {}
                    }
                }
                Err(e) => {
                    failure = Some(OpError::read(e));
                    break;
                }
            }
        }

        // Every exit path releases, exactly once; the released state carries
        // the authoritative resume position.
        let released = self.provider.release(req.id, cur).await;

        match failure {
            None => {
                let result = QueryResult {
                    events,
                    next: QueryRequest {
                        id: released.id,
                        query: released.query,
                        pos: released.pos,
                        // The original requested limit, not the clamped one,
                        // so clients can detect clamping themselves.
                        limit: req.limit,
                        wait_timeout_secs: req.wait_timeout_secs,
                    },
                };
                match self.encode_payload(&result) {
                    Ok(buf) => Reply::Payload(buf),
                    Err(e) => {
                        warn!(session = req.id, error = %e, "could not encode query result");
                        Reply::Failed(OpError::internal(e))
                    }
                }
            }
            // Fatal: partially accumulated records are discarded.
            Some(op) => Reply::Failed(op),
        }
    }

    /// Execute one Sources call: text filter in, JSON listing out. Any
    /// decode, lookup or encode failure fails the call with no partial
    /// response.
    pub async fn sources(&self, body: &[u8]) -> Reply {
        let filter = match WireReader::new(body).read_str() {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "sources request with undecodable body");
                return Reply::Failed(OpError::decode(e));
            }
        };

        let sources = match self.storage.sources(&filter) {
            Ok(s) => s,
            Err(e @ CursorError::InvalidQuery(_)) => {
                return Reply::Failed(OpError::validation(e.to_string()))
            }
            Err(e) => return Reply::Failed(OpError::internal(e)),
        };

        let listing = SourcesResult {
            count: sources.len(),
            sources,
        };
        let json = match serde_json::to_vec(&listing) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "could not encode sources listing");
                return Reply::Failed(OpError::internal(e));
            }
        };
        let mut buf = self.pool.acquire(json.len());
        buf.copy_from_slice(&json);
        Reply::Payload(buf)
    }

    fn encode_payload(&self, value: &dyn Writable) -> Result<PooledBuf, WireError> {
        let size = value.encoded_size();
        let mut buf = self.pool.acquire(size);
        let mut w = WireWriter::new(&mut buf);
        value.write_to(&mut w)?;
        debug_assert_eq!(w.written(), size);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{Cursor, CursorState};
    use crate::mem::MemStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tr_core::wire::encode;
    use tr_core::OpErrorKind;

    fn setup(store: MemStore, config: HubConfig) -> (Arc<CursorProvider>, Arc<ServerQuerier>) {
        let storage: Arc<dyn Storage> = Arc::new(store);
        let provider = Arc::new(CursorProvider::new(
            Arc::clone(&storage),
            config.cursor_idle(),
        ));
        let querier = Arc::new(ServerQuerier::new(
            Arc::clone(&provider),
            storage,
            BytesPool::new(config.pool_buffers, 4096),
            config,
        ));
        (provider, querier)
    }

    fn request(id: u64, query: &str, pos: &str, limit: i64, wait: i32) -> QueryRequest {
        QueryRequest {
            id,
            query: query.to_string(),
            pos: pos.to_string(),
            limit,
            wait_timeout_secs: wait,
        }
    }

    async fn run(querier: &ServerQuerier, req: &QueryRequest) -> Reply {
        let body = encode(req).unwrap();
        querier.query(&CancelToken::new(), &body).await
    }

    fn result_of(reply: Reply) -> QueryResult {
        match reply {
            Reply::Payload(buf) => QueryResult::read_from(&mut WireReader::new(&buf)).unwrap(),
            Reply::Failed(e) => panic!("expected payload, got op error: {e}"),
        }
    }

    fn failure_of(reply: Reply) -> OpError {
        match reply {
            Reply::Failed(e) => e,
            Reply::Payload(_) => panic!("expected op error, got payload"),
        }
    }

    #[tokio::test]
    async fn test_three_matching_records_scenario() {
        let store = MemStore::new();
        store.append("app=web", 1, "first");
        store.append("app=web", 2, "second");
        store.append("app=db", 3, "other");
        store.append("app=web", 4, "third");
        let (_, querier) = setup(store, HubConfig::default());

        let req = request(1, "app=web", "", 10, 0);
        let res = result_of(run(&querier, &req).await);

        let messages: Vec<&str> = res.events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["first", "second", "third"]);
        assert_eq!(res.next.id, 1);
        assert_eq!(res.next.query, "app=web");
        assert_eq!(res.next.pos, "4");
        assert_eq!(res.next.limit, 10);
        assert_eq!(res.next.wait_timeout_secs, 0);
    }

    #[tokio::test]
    async fn test_resume_is_disjoint_and_gapless() {
        let store = MemStore::new();
        for (i, msg) in ["a", "b", "c", "d"].iter().enumerate() {
            store.append("app=web", i as i64, msg);
        }
        let (_, querier) = setup(store, HubConfig::default());

        let first = result_of(run(&querier, &request(1, "app=web", "", 2, 0)).await);
        let second = result_of(run(&querier, &first.next).await);

        let batch1: Vec<&str> = first.events.iter().map(|e| e.message.as_str()).collect();
        let batch2: Vec<&str> = second.events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(batch1, ["a", "b"]);
        assert_eq!(batch2, ["c", "d"]);
    }

    /// Storage wrapper counting fetches, to prove `limit = 0` never touches
    /// the read path.
    struct Counting {
        inner: MemStore,
        gets: Arc<AtomicUsize>,
    }

    struct CountingCursor {
        inner: Box<dyn Cursor>,
        gets: Arc<AtomicUsize>,
    }

    impl Storage for Counting {
        fn open_cursor(&self, state: &CursorState) -> Result<Box<dyn Cursor>, CursorError> {
            Ok(Box::new(CountingCursor {
                inner: self.inner.open_cursor(state)?,
                gets: Arc::clone(&self.gets),
            }))
        }

        fn sources(&self, filter: &str) -> Result<Vec<tr_core::Source>, CursorError> {
            self.inner.sources(filter)
        }
    }

    #[async_trait]
    impl Cursor for CountingCursor {
        fn state(&self) -> CursorState {
            self.inner.state()
        }
        async fn get(&mut self) -> Result<LogEvent, CursorError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get().await
        }
        fn advance(&mut self) {
            self.inner.advance();
        }
        async fn wait_new_data(&mut self) {
            self.inner.wait_new_data().await;
        }
    }

    #[tokio::test]
    async fn test_zero_limit_never_fetches() {
        let store = MemStore::new();
        store.append("app=web", 1, "present");
        let gets = Arc::new(AtomicUsize::new(0));
        let storage: Arc<dyn Storage> = Arc::new(Counting {
            inner: store,
            gets: Arc::clone(&gets),
        });
        let config = HubConfig::default();
        let provider = Arc::new(CursorProvider::new(
            Arc::clone(&storage),
            config.cursor_idle(),
        ));
        let querier = ServerQuerier::new(
            Arc::clone(&provider),
            storage,
            BytesPool::new(8, 4096),
            config,
        );

        let res = result_of(run(&querier, &request(9, "", "", 0, 0)).await);
        assert!(res.events.is_empty());
        assert_eq!(res.next.pos, "0");
        assert_eq!(gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_negative_limit_rejected_before_any_cursor() {
        let (provider, querier) = setup(MemStore::new(), HubConfig::default());
        let err = failure_of(run(&querier, &request(11, "", "", -1, 0)).await);
        assert_eq!(err.kind, OpErrorKind::Validation);
        assert!(!provider.is_registered(11).await);
    }

    #[tokio::test]
    async fn test_out_of_range_wait_rejected() {
        let (provider, querier) = setup(MemStore::new(), HubConfig::default());
        for wait in [-1, 61] {
            let err = failure_of(run(&querier, &request(12, "", "", 1, wait)).await);
            assert_eq!(err.kind, OpErrorKind::Validation);
        }
        assert!(!provider.is_registered(12).await);
    }

    #[tokio::test]
    async fn test_clamped_limit_reads_ceiling_and_caches_cursor() {
        let store = MemStore::new();
        for i in 0..5 {
            store.append("app=web", i, "m");
        }
        let config = HubConfig {
            max_limit: 2,
            ..HubConfig::default()
        };
        let (provider, querier) = setup(store, config);

        let res = result_of(run(&querier, &request(13, "app=web", "", 10, 0)).await);
        assert_eq!(res.events.len(), 2);
        // The echoed limit is the requested one; clamping shows up as a
        // shorter batch plus an advanced position.
        assert_eq!(res.next.limit, 10);
        assert_eq!(res.next.pos, "2");
        assert!(provider.is_warm(13).await);
    }

    #[tokio::test]
    async fn test_plain_exhausted_query_leaves_no_cursor() {
        let store = MemStore::new();
        store.append("app=web", 1, "m");
        let (provider, querier) = setup(store, HubConfig::default());

        result_of(run(&querier, &request(14, "app=web", "", 100, 0)).await);
        assert!(!provider.is_registered(14).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_expires_cleanly_on_empty_source() {
        let (_, querier) = setup(MemStore::new(), HubConfig::default());

        let res = result_of(run(&querier, &request(15, "", "", 10, 5)).await);
        assert!(res.events.is_empty());
        assert_eq!(res.next.pos, "0");
        assert_eq!(res.next.wait_timeout_secs, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_resolves_when_data_arrives() {
        let store = MemStore::new();
        let (_, querier) = setup(store.clone(), HubConfig::default());

        let q = Arc::clone(&querier);
        let call = tokio::spawn(async move { run(&q, &request(16, "app=web", "", 10, 30)).await });

        // Let the call reach its wait, then feed it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.append("app=web", 7, "late arrival");

        let res = result_of(call.await.unwrap());
        assert_eq!(res.events.len(), 1);
        assert_eq!(res.events[0].message, "late arrival");
        assert_eq!(res.next.pos, "1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmatched_appends_do_not_extend_the_wait_deadline() {
        let store = MemStore::new();
        let (_, querier) = setup(store.clone(), HubConfig::default());

        let q = Arc::clone(&querier);
        let call = tokio::spawn(async move { run(&q, &request(21, "app=web", "", 10, 5)).await });

        // Keep waking the cursor with records the filter rejects; each wake
        // scans past them and goes back to waiting on the same deadline.
        let feeder = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(2)).await;
                store.append("app=db", 0, "noise");
            }
        });

        let reply = tokio::time::timeout(Duration::from_secs(30), call)
            .await
            .expect("call ran past its requested wait")
            .unwrap();
        feeder.abort();

        let res = result_of(reply);
        assert!(res.events.is_empty());
        assert_eq!(res.next.wait_timeout_secs, 5);
    }

    #[tokio::test]
    async fn test_cancel_during_wait_returns_promptly_and_releases() {
        let (provider, querier) = setup(MemStore::new(), HubConfig::default());

        let cancel = CancelToken::new();
        let q = Arc::clone(&querier);
        let c = cancel.clone();
        let call = tokio::spawn(async move {
            let body = encode(&request(17, "", "", 10, 60)).unwrap();
            q.query(&c, &body).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let reply = tokio::time::timeout(Duration::from_secs(2), call)
            .await
            .expect("canceled call did not return promptly")
            .unwrap();
        let err = failure_of(reply);
        assert_eq!(err.kind, OpErrorKind::Canceled);

        // Cursor was released exactly once: the session is parked warm (the
        // wait made it cacheable) and a fresh call can pick it up.
        assert!(provider.is_warm(17).await);
        assert!(provider
            .get_or_create(
                &CursorState {
                    id: 17,
                    query: String::new(),
                    pos: String::new(),
                },
                false,
            )
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_busy_session_is_rejected_as_cursor_error() {
        let (provider, querier) = setup(MemStore::new(), HubConfig::default());

        let held = provider
            .get_or_create(
                &CursorState {
                    id: 18,
                    query: String::new(),
                    pos: String::new(),
                },
                true,
            )
            .await
            .unwrap();

        let err = failure_of(run(&querier, &request(18, "", "", 1, 0)).await);
        assert_eq!(err.kind, OpErrorKind::CursorCreate);

        provider.release(18, held).await;
    }

    #[tokio::test]
    async fn test_undecodable_body_is_a_decode_error() {
        let (provider, querier) = setup(MemStore::new(), HubConfig::default());
        let err = failure_of(querier.query(&CancelToken::new(), &[1, 2, 3]).await);
        assert_eq!(err.kind, OpErrorKind::Decode);
        assert!(!provider.is_registered(0).await);
    }

    #[tokio::test]
    async fn test_bad_filter_is_a_cursor_create_error() {
        let (_, querier) = setup(MemStore::new(), HubConfig::default());
        let err = failure_of(run(&querier, &request(19, "not-a-filter", "", 1, 0)).await);
        assert_eq!(err.kind, OpErrorKind::CursorCreate);
    }

    /// Cursor that serves one record then fails, to exercise the fatal-read
    /// path.
    struct FailingStorage;

    struct FailingCursor {
        state: CursorState,
        served: bool,
    }

    impl Storage for FailingStorage {
        fn open_cursor(&self, state: &CursorState) -> Result<Box<dyn Cursor>, CursorError> {
            Ok(Box::new(FailingCursor {
                state: state.clone(),
                served: false,
            }))
        }
        fn sources(&self, _filter: &str) -> Result<Vec<tr_core::Source>, CursorError> {
            Err(CursorError::Io("sources unavailable".into()))
        }
    }

    #[async_trait]
    impl Cursor for FailingCursor {
        fn state(&self) -> CursorState {
            self.state.clone()
        }
        async fn get(&mut self) -> Result<LogEvent, CursorError> {
            if self.served {
                Err(CursorError::Io("segment checksum mismatch".into()))
            } else {
                Ok(LogEvent::default())
            }
        }
        fn advance(&mut self) {
            self.served = true;
        }
        async fn wait_new_data(&mut self) {}
    }

    #[tokio::test]
    async fn test_read_error_is_fatal_and_discards_partial_records() {
        let storage: Arc<dyn Storage> = Arc::new(FailingStorage);
        let config = HubConfig::default();
        let provider = Arc::new(CursorProvider::new(
            Arc::clone(&storage),
            config.cursor_idle(),
        ));
        let querier = ServerQuerier::new(
            Arc::clone(&provider),
            storage,
            BytesPool::new(8, 4096),
            config,
        );

        let err = failure_of(run(&querier, &request(20, "", "", 10, 0)).await);
        assert_eq!(err.kind, OpErrorKind::Read);
        // Released, not cached (no wait, no clamp).
        assert!(!provider.is_registered(20).await);
    }

    #[tokio::test]
    async fn test_sources_listing_and_errors() {
        let store = MemStore::new();
        store.append("app=web,dc=eu", 1, "xx");
        store.append("app=db", 2, "y");
        let (_, querier) = setup(store, HubConfig::default());

        let body = encode(&tr_core::wire::WritableStr("app=web")).unwrap();
        let reply = querier.sources(&body).await;
        let listing: SourcesResult = match reply {
            Reply::Payload(buf) => serde_json::from_slice(&buf).unwrap(),
            Reply::Failed(e) => panic!("unexpected op error: {e}"),
        };
        assert_eq!(listing.count, 1);
        assert_eq!(listing.sources[0].tags, "app=web,dc=eu");

        let bad = encode(&tr_core::wire::WritableStr("###")).unwrap();
        let err = failure_of(querier.sources(&bad).await);
        assert_eq!(err.kind, OpErrorKind::Validation);

        let err = failure_of(querier.sources(&[0xFF]).await);
        assert_eq!(err.kind, OpErrorKind::Decode);
    }
}
