//! Background loading surfaced as polled handles.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::mpsc;
use std::task::{Context, Poll};
use thiserror::Error;

/// Errors produced by background loads
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },
    #[error("Loader thread could not be started: {0}")]
    Spawn(String),
    #[error("Loader went away without producing a result")]
    Disconnected,
}

/// Handle to a job running on a background thread.
///
/// Polled with [`LoadHandle::try_recv`] from a frame loop, or awaited on any executor.
/// Dropping the handle abandons the result; the job itself runs to completion.
pub struct LoadHandle<T> {
    receiver: mpsc::Receiver<T>,
}

/// Sending half of a [`LoadHandle`], for producers that are not a plain closure.
pub struct LoadSender<T> {
    sender: mpsc::Sender<T>,
}

impl<T> LoadSender<T> {
    /// Deliver the result. Returns `false` when the handle was already dropped.
    pub fn send(self, value: T) -> bool {
        self.sender.send(value).is_ok()
    }
}

impl<T: Send + 'static> LoadHandle<T> {
    /// Run `job` on a named background thread.
    pub fn spawn<F>(name: &str, job: F) -> Result<Self, LoadError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, handle) = Self::channel();
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                sender.send(job());
            })
            .map_err(|e| LoadError::Spawn(e.to_string()))?;
        Ok(handle)
    }
}

impl<T> LoadHandle<T> {
    pub fn channel() -> (LoadSender<T>, Self) {
        let (sender, receiver) = mpsc::channel();
        (LoadSender { sender }, Self { receiver })
    }

    /// A handle whose result is already available.
    pub fn ready(value: T) -> Self {
        let (sender, handle) = Self::channel();
        sender.send(value);
        handle
    }

    /// Attempts to retrieve the result without blocking.
    ///
    /// `Ok(None)` while the job runs. The value is handed out once.
    pub fn try_recv(&self) -> Result<Option<T>, LoadError> {
        match self.receiver.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(LoadError::Disconnected),
        }
    }
}

impl<T> Future for LoadHandle<T> {
    type Output = Result<T, LoadError>;

    /// Checks the channel; there is no waker registration, callers re-poll each tick.
    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.receiver.try_recv() {
            Ok(value) => Poll::Ready(Ok(value)),
            Err(mpsc::TryRecvError::Empty) => Poll::Pending,
            Err(mpsc::TryRecvError::Disconnected) => Poll::Ready(Err(LoadError::Disconnected)),
        }
    }
}
