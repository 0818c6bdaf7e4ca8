//! Per-call result sequences.
//!
//! A logical call produces zero or more values followed by exactly one
//! terminal outcome. The router writes into a [`CallSink`]; callers read
//! from a [`CallStream`]. Everything written is buffered, so a subscriber
//! that attaches late still sees every value from the first one.

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use futures_util::stream::{self, Stream};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;

use super::error::RpcError;

#[derive(Debug, Default)]
struct CallState {
    values: Vec<Value>,
    outcome: Option<Result<(), RpcError>>,
}

/// Write side of a logical call. The first terminal write wins.
#[derive(Debug)]
pub(crate) struct CallSink {
    tx: watch::Sender<CallState>,
}

impl CallSink {
    /// Append a value. Ignored once the call has finished.
    pub(crate) fn emit(&self, value: Value) -> bool {
        self.tx.send_if_modified(|state| {
            if state.outcome.is_some() {
                return false;
            }
            state.values.push(value);
            true
        })
    }

    pub(crate) fn complete(&self) -> bool {
        self.finish(Ok(()))
    }

    pub(crate) fn fail(&self, error: RpcError) -> bool {
        self.finish(Err(error))
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.tx.borrow().outcome.is_some()
    }

    fn finish(&self, outcome: Result<(), RpcError>) -> bool {
        self.tx.send_if_modified(|state| {
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome);
            true
        })
    }
}

/// Create the sink/stream pair for one request id.
pub(crate) fn call_channel(request_id: impl Into<String>) -> (CallSink, CallStream) {
    let (tx, rx) = watch::channel(CallState::default());
    let stream = CallStream {
        request_id: request_id.into(),
        rx,
        cursor: 0,
        done: false,
    };
    (CallSink { tx }, stream)
}

/// Lazily consumed result sequence of one logical call.
///
/// Values arrive in the order the transport received their frames. The
/// request has already been sent by the time a `CallStream` exists; reading
/// from it (or not) has no effect on the remote side.
#[derive(Debug)]
pub struct CallStream {
    request_id: String,
    rx: watch::Receiver<CallState>,
    cursor: usize,
    done: bool,
}

impl CallStream {
    /// The wire request id of this call.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Attach another reader that replays the call from its first value.
    pub fn subscribe(&self) -> CallStream {
        CallStream {
            request_id: self.request_id.clone(),
            rx: self.rx.clone(),
            cursor: 0,
            done: false,
        }
    }

    /// Wait for the next value.
    ///
    /// Returns `None` after successful completion and `Some(Err(_))` exactly
    /// once when the call failed.
    pub async fn next(&mut self) -> Option<Result<Value, RpcError>> {
        let mut writer_gone = false;

        while !self.done {
            {
                let state = self.rx.borrow_and_update();
                if let Some(value) = state.values.get(self.cursor) {
                    self.cursor += 1;
                    return Some(Ok(value.clone()));
                }
                if let Some(outcome) = &state.outcome {
                    self.done = true;
                    return outcome.clone().err().map(Err);
                }
            }

            if writer_gone {
                // Router went away without a terminal frame.
                self.done = true;
                break;
            }

            if self.rx.changed().await.is_err() {
                writer_gone = true;
            }
        }

        None
    }

    /// Adapt into a `futures` stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<Value, RpcError>> + Send + 'static {
        stream::unfold(self, |mut call| async move {
            call.next().await.map(|item| (item, call))
        })
    }

    /// Drain every value, failing on the first error.
    pub async fn collect(mut self) -> Result<Vec<Value>, RpcError> {
        let mut values = Vec::new();
        while let Some(item) = self.next().await {
            values.push(item?);
        }
        Ok(values)
    }

    /// Wait for completion and keep only the last value, if any.
    pub async fn last(mut self) -> Result<Option<Value>, RpcError> {
        let mut last = None;
        while let Some(item) = self.next().await {
            last = Some(item?);
        }
        Ok(last)
    }

    /// Decode the first value. A call that ends without a value decodes
    /// from `null`, so `()` and `Option<T>` work for void methods.
    pub async fn reply<T: DeserializeOwned>(mut self) -> Result<T, RpcError> {
        match self.next().await {
            Some(Ok(value)) => decode(value),
            Some(Err(e)) => Err(e),
            None => decode(Value::Null),
        }
    }

    /// View the sequence as values of `T`.
    pub fn typed<T: DeserializeOwned>(self) -> TypedCall<T> {
        TypedCall {
            inner: self,
            failed: false,
            _marker: PhantomData,
        }
    }
}

/// A [`CallStream`] whose values are decoded into `T`.
///
/// A value that does not decode fails this call only; the sequence ends
/// after reporting it.
#[derive(Debug)]
pub struct TypedCall<T> {
    inner: CallStream,
    failed: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> TypedCall<T> {
    pub fn request_id(&self) -> &str {
        self.inner.request_id()
    }

    pub async fn next(&mut self) -> Option<Result<T, RpcError>> {
        if self.failed {
            return None;
        }
        let item = match self.inner.next().await? {
            Ok(value) => decode(value),
            Err(e) => Err(e),
        };
        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<T, RpcError>> + Send + 'static
    where
        T: Send + 'static,
    {
        stream::unfold(self, |mut call| async move {
            call.next().await.map(|item| (item, call))
        })
    }

    pub async fn collect(mut self) -> Result<Vec<T>, RpcError> {
        let mut values = Vec::new();
        while let Some(item) = self.next().await {
            values.push(item?);
        }
        Ok(values)
    }

    pub async fn last(mut self) -> Result<Option<T>, RpcError> {
        let mut last = None;
        while let Some(item) = self.next().await {
            last = Some(item?);
        }
        Ok(last)
    }

    /// Drop the type and read raw JSON values again.
    pub fn untyped(self) -> CallStream {
        self.inner
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::Decode(e.to_string()))
}

/// Bound any call future by a deadline.
///
/// # Example
///
/// ```ignore
/// let values = with_timeout(Duration::from_secs(30), call.collect()).await?;
/// ```
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout(duration.as_millis() as u64)),
    }
}
