// ABOUTME: Push-to-pull bridge for callback-driven backends.
// ABOUTME: Thin wrapper over a bounded tokio mpsc channel; callbacks try_send, one loop awaits.

use futures::stream::{self, Stream};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Event buffer size used by the adapters, same as the backend event channels
pub const DEFAULT_CAPACITY: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum PushError<T> {
    #[error("bridge buffer is full")]
    Full(T),
    #[error("bridge receiver was dropped")]
    Closed(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Closed(item) => item,
        }
    }
}

impl<T> From<TrySendError<T>> for PushError<T> {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(item) => PushError::Full(item),
            TrySendError::Closed(item) => PushError::Closed(item),
        }
    }
}

/// Create a bridge holding at most `capacity` undelivered items
pub fn channel<T>(capacity: usize) -> (PushSender<T>, PullReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (PushSender { tx }, PullReceiver { rx })
}

/// Producer half. Cheap to clone into backend callbacks.
pub struct PushSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for PushSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> PushSender<T> {
    /// Buffer an item for the consumer. Never blocks.
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        self.tx.try_send(item).map_err(PushError::from)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, driven by exactly one pull loop
pub struct PullReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> PullReceiver<T> {
    /// Next item, or `None` once every sender is gone and the buffer is drained
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Reject further pushes; items already buffered are still delivered
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn into_stream(self) -> impl Stream<Item = T> {
        stream::unfold(self, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
    }
}
