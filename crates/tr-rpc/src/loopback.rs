//! In-process transport: an [`RpcCall`] stitched directly onto an
//! [`RpcHandler`].
//!
//! No framing, no sockets — the request is encoded into a pooled, exactly
//! pre-sized buffer and handed straight to the handler. This is the
//! transport the test suites run the whole query path over; it also keeps
//! the exact-size codec contract honest by rejecting any writer that does
//! not fill its buffer to the last byte.

use async_trait::async_trait;
use std::sync::Arc;
use tr_core::wire::{Writable, WireWriter};

use crate::cancel::CancelToken;
use crate::pool::BytesPool;
use crate::{Endpoint, Reply, RpcCall, RpcHandler, TransportError};

pub struct Loopback {
    handler: Arc<dyn RpcHandler>,
    pool: Arc<BytesPool>,
}

impl Loopback {
    pub fn new(handler: Arc<dyn RpcHandler>, pool: Arc<BytesPool>) -> Self {
        Self { handler, pool }
    }
}

#[async_trait]
impl RpcCall for Loopback {
    async fn call(
        &self,
        cancel: &CancelToken,
        endpoint: Endpoint,
        req: &(dyn Writable + Sync),
    ) -> Result<Reply, TransportError> {
        if cancel.is_canceled() {
            return Err(TransportError::Closed);
        }

        let size = req.encoded_size();
        let mut buf = self.pool.acquire(size);
        let mut w = WireWriter::new(&mut buf);
        req.write_to(&mut w)
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        if w.written() != size {
            return Err(TransportError::Encode(format!(
                "writer produced {} bytes for a {}-byte value",
                w.written(),
                size
            )));
        }

        Ok(self.handler.handle(cancel, endpoint, &buf).await)
    }
}
