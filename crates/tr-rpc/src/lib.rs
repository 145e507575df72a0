//! # tr-rpc — The "Boundary" of TAILRACE
//!
//! The call/response seam between the query engine and whatever carries its
//! bytes. Connection management, framing and request multiplexing live
//! below this crate and are somebody else's problem; what is fixed here is:
//!
//! - the endpoint codes ([`Endpoint`])
//! - the pooled payload buffers ([`pool`]) that requests and responses are
//!   composed into
//! - the cancellation handle ([`cancel`]) a call is governed by
//! - the two traits a transport must satisfy: [`RpcCall`] on the client
//!   side and [`RpcHandler`] on the server side
//!
//! [`loopback`] wires the two traits together in-process, which is how the
//! test suites exercise the full path without a network.

pub mod cancel;
pub mod loopback;
pub mod pool;

use async_trait::async_trait;
use thiserror::Error;
use tr_core::wire::Writable;
use tr_core::OpError;

use crate::cancel::CancelToken;
use crate::pool::PooledBuf;

// =============================================================================
// Endpoints
// =============================================================================

/// Fixed endpoint codes of the query path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Endpoint {
    /// Wire-codec-encoded query request/result.
    Query = 1,
    /// Length-prefixed UTF-8 filter in, JSON sources listing out.
    Sources = 2,
}

impl Endpoint {
    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(Self::Query),
            2 => Some(Self::Sources),
            _ => None,
        }
    }
}

// =============================================================================
// Transport results
// =============================================================================

/// The call itself could not be completed. Operation-level failures never
/// travel this way; they arrive inside [`Reply::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("transport failure: {0}")]
    Io(String),
    #[error("request serialization failed: {0}")]
    Encode(String),
    #[error("response body undecodable: {0}")]
    Decode(String),
}

/// What a successfully transported call carries back: a payload to decode,
/// or the server's operation-level error.
#[derive(Debug)]
pub enum Reply {
    Payload(PooledBuf),
    Failed(OpError),
}

// =============================================================================
// The two sides of the boundary
// =============================================================================

/// Client side: invoke an endpoint with a wire-encodable request.
///
/// The transport sizes the request buffer from `Writable::encoded_size` and
/// must fill it exactly; response payloads come back as pooled buffers that
/// return to their pool on drop, on every exit path.
#[async_trait]
pub trait RpcCall: Send + Sync {
    async fn call(
        &self,
        cancel: &CancelToken,
        endpoint: Endpoint,
        req: &(dyn Writable + Sync),
    ) -> Result<Reply, TransportError>;
}

/// Server side: dispatch one decoded call body to the engine.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, cancel: &CancelToken, endpoint: Endpoint, body: &[u8]) -> Reply;
}
