//! One end of an RPC channel.
//!
//! [`connect`] splits a duplex stream into an [`RpcPeer`], used to issue
//! calls, and a [`Connection`], whose [`serve`](Connection::serve) loop
//! reads the incoming side. Responses complete pending calls; calls are
//! handed to a [`CallHandler`] one at a time, in arrival order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use hearth_domain::error::HearthError;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::{mpsc, oneshot};

use crate::error::RpcError;
use crate::message::{Call, Message, RemoteError, Response};

/// Serves calls made by the remote side.
#[async_trait]
pub trait CallHandler: Send + Sync {
    /// An error is sent back as `{code, message}` using
    /// [`HearthError::code`].
    ///
    /// Calls are handled sequentially: a handler must not wait on a call
    /// made through the same peer.
    async fn handle(&self, method: &str, params: Value) -> Result<Value, HearthError>;
}

#[derive(Debug, Clone, Copy)]
pub struct PeerOptions {
    pub call_timeout: Duration,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
        }
    }
}

type Completion = oneshot::Sender<Result<Value, RpcError>>;

struct Inner {
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Mutex<HashMap<u64, Completion>>,
    next_id: AtomicU64,
    call_timeout: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sending half of a channel. Cheap to clone.
#[derive(Clone)]
pub struct RpcPeer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RpcPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcPeer")
            .field("closed", &self.is_closed())
            .field("pending", &lock(&self.inner.pending).len())
            .finish()
    }
}

/// Receiving half of a channel.
pub struct Connection<R> {
    lines: Lines<BufReader<R>>,
    peer: RpcPeer,
}

/// Wire a duplex stream. The writing side is driven by a spawned task that
/// stops once the peer is closed.
pub fn connect<R, W>(reader: R, mut writer: W, options: PeerOptions) -> (RpcPeer, Connection<R>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(mut line) = rx.recv().await {
            line.push('\n');
            let written = async {
                writer.write_all(line.as_bytes()).await?;
                writer.flush().await
            };
            if let Err(err) = written.await {
                tracing::warn!(error = %err, "rpc write failed");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let peer = RpcPeer {
        inner: Arc::new(Inner {
            outbound: Mutex::new(Some(tx)),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            call_timeout: options.call_timeout,
        }),
    };
    let connection = Connection {
        lines: BufReader::new(reader).lines(),
        peer: peer.clone(),
    };
    (peer, connection)
}

impl RpcPeer {
    /// Call a remote method and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Remote`] when the remote reports a failure,
    /// [`RpcError::Timeout`] when no response arrives in time and
    /// [`RpcError::Closed`] when the channel closes first.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(id, tx);

        let call = Call {
            id: Some(id),
            method: method.to_string(),
            params,
        };
        if let Err(err) = self.send(&Message::Call(call)) {
            lock(&self.inner.pending).remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(self.inner.call_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcError::Closed),
            Err(_) => {
                lock(&self.inner.pending).remove(&id);
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    after: self.inner.call_timeout,
                })
            }
        }
    }

    /// Send a call that expects no response.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Closed`] when the channel is closed.
    pub fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        self.send(&Message::Call(Call {
            id: None,
            method: method.to_string(),
            params,
        }))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.outbound).is_none()
    }

    /// Stop writing and fail every pending call with [`RpcError::Closed`].
    pub fn close(&self) {
        lock(&self.inner.outbound).take();
        let pending: Vec<Completion> = lock(&self.inner.pending).drain().map(|(_, tx)| tx).collect();
        for tx in pending {
            let _ = tx.send(Err(RpcError::Closed));
        }
    }

    fn send(&self, message: &Message) -> Result<(), RpcError> {
        let outbound = lock(&self.inner.outbound);
        let sender = outbound.as_ref().ok_or(RpcError::Closed)?;
        sender.send(message.encode()).map_err(|_| RpcError::Closed)
    }

    fn complete(&self, response: Response) {
        let Some(tx) = lock(&self.inner.pending).remove(&response.id) else {
            tracing::warn!(id = response.id, "response to unknown call dropped");
            return;
        };
        let outcome = response
            .outcome
            .map_err(|RemoteError { code, message }| RpcError::Remote { code, message });
        let _ = tx.send(outcome);
    }
}

impl<R> Connection<R>
where
    R: AsyncRead + Unpin + Send,
{
    #[must_use]
    pub fn peer(&self) -> &RpcPeer {
        &self.peer
    }

    /// Read until the stream ends or a malformed message arrives, then close
    /// the peer.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Malformed`] or [`RpcError::Io`] when the channel
    /// was closed because of a bad message or a read failure. A clean end of
    /// stream is `Ok`.
    pub async fn serve(mut self, handler: &dyn CallHandler) -> Result<(), RpcError> {
        let result = self.read_loop(handler).await;
        if let Err(err) = &result {
            tracing::warn!(error = %err, "closing rpc channel");
        }
        self.peer.close();
        result
    }

    async fn read_loop(&mut self, handler: &dyn CallHandler) -> Result<(), RpcError> {
        while let Some(line) = self.lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match Message::decode(&line)? {
                Message::Response(response) => self.peer.complete(response),
                Message::Call(call) => self.dispatch(handler, call).await,
            }
        }
        Ok(())
    }

    async fn dispatch(&self, handler: &dyn CallHandler, call: Call) {
        let Call { id, method, params } = call;
        let outcome = handler.handle(&method, params).await;

        let Some(id) = id else {
            if let Err(err) = outcome {
                tracing::warn!(method, error = %err.message(), "notification failed");
            }
            return;
        };
        let outcome = outcome.map_err(|err| {
            tracing::debug!(method, id, error = %err.message(), "call failed");
            RemoteError {
                code: err.code(),
                message: err.message(),
            }
        });
        if self.peer.send(&Message::Response(Response { id, outcome })).is_err() {
            tracing::debug!(method, id, "channel closed before response was sent");
        }
    }
}
