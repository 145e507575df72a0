//! # tr-client — The "Caller" of TAILRACE
//!
//! Client side of the query path: encode a request, invoke the call
//! primitive on a fixed endpoint, decode the answer — and keep the two
//! failure planes apart. A [`TransportError`] means the call never got a
//! meaningful response; an [`Outcome::Failed`] means the server answered
//! and declined. Callers choose their retry policy per plane.
//!
//! Response payloads arrive in pooled transport buffers; they are decoded
//! and dropped inside each call, so the buffer goes back to its pool on
//! every branch.

use std::sync::Arc;
use thiserror::Error;

use tr_core::wire::{WireReader, WritableStr};
use tr_core::{OpError, QueryRequest, QueryResult, SourcesResult};
use tr_rpc::cancel::CancelToken;
use tr_rpc::{Endpoint, Reply, RpcCall, TransportError};

/// What a successfully transported call produced.
#[derive(Debug)]
pub enum Outcome<T> {
    Ok(T),
    Failed(OpError),
}

impl<T> Outcome<T> {
    /// Unwrap the success value, turning an operation error into
    /// [`ClientError::Op`].
    pub fn into_result(self) -> Result<T, ClientError> {
        match self {
            Outcome::Ok(v) => Ok(v),
            Outcome::Failed(e) => Err(ClientError::Op(e)),
        }
    }
}

/// Both failure planes folded together, for callers that do not
/// distinguish them (e.g. [`Querier::tail`]).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("operation failed: {0}")]
    Op(OpError),
}

pub struct Querier {
    rc: Arc<dyn RpcCall>,
}

impl Querier {
    pub fn new(rc: Arc<dyn RpcCall>) -> Self {
        Self { rc }
    }

    /// One Query round trip.
    pub async fn query(
        &self,
        cancel: &CancelToken,
        req: &QueryRequest,
    ) -> Result<Outcome<QueryResult>, TransportError> {
        match self.rc.call(cancel, Endpoint::Query, req).await? {
            Reply::Payload(buf) => {
                let res = QueryResult::read_from(&mut WireReader::new(&buf))
                    .map_err(|e| TransportError::Decode(e.to_string()))?;
                Ok(Outcome::Ok(res))
            }
            Reply::Failed(e) => Ok(Outcome::Failed(e)),
        }
    }

    /// One Sources round trip: text filter out, JSON listing back.
    pub async fn sources(
        &self,
        cancel: &CancelToken,
        tag_filter: &str,
    ) -> Result<Outcome<SourcesResult>, TransportError> {
        match self
            .rc
            .call(cancel, Endpoint::Sources, &WritableStr(tag_filter))
            .await?
        {
            Reply::Payload(buf) => {
                let res: SourcesResult = serde_json::from_slice(&buf)
                    .map_err(|e| TransportError::Decode(e.to_string()))?;
                Ok(Outcome::Ok(res))
            }
            Reply::Failed(e) => Ok(Outcome::Failed(e)),
        }
    }

    /// Follow a session: call, hand the batch to `on_batch`, feed the
    /// echoed `next` request back in, repeat.
    ///
    /// Stops cleanly when `on_batch` returns `false` or the token fires;
    /// any transport or operation failure ends the tail with the
    /// corresponding [`ClientError`].
    pub async fn tail<F>(
        &self,
        cancel: &CancelToken,
        mut req: QueryRequest,
        mut on_batch: F,
    ) -> Result<(), ClientError>
    where
        F: FnMut(&QueryResult) -> bool,
    {
        loop {
            if cancel.is_canceled() {
                return Ok(());
            }
            let res = self.query(cancel, &req).await?.into_result()?;
            if !on_batch(&res) {
                return Ok(());
            }
            req = res.next;
        }
    }
}
