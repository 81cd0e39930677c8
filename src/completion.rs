//! Settle-once result delivery between the engine and callers.
//!
//! A [`CompletionHandle`] is held by the engine and consumed by `resolve` or
//! `reject`; the paired [`Completion`] is returned to the caller, who waits
//! on it from any thread. Move semantics guarantee a handle settles at most
//! once.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::error::Error;

/// Caller side of a pending result.
pub struct Completion<T> {
    rx: Receiver<Result<T, Error>>,
}

/// Engine side of a pending result. Consumed exactly once.
pub(crate) struct CompletionHandle<T> {
    tx: Sender<Result<T, Error>>,
}

/// Create a linked handle/completion pair.
pub(crate) fn completion<T>() -> (CompletionHandle<T>, Completion<T>) {
    let (tx, rx) = bounded(1);
    (CompletionHandle { tx }, Completion { rx })
}

impl<T> CompletionHandle<T> {
    /// Settle with a value.
    pub(crate) fn resolve(self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    /// Settle with an error.
    pub(crate) fn reject(self, err: Error) {
        let _ = self.tx.send(Err(err));
    }
}

impl<T> Completion<T> {
    /// Block until the submission settles.
    ///
    /// Returns [`Error::Canceled`] if the engine dropped the handle without
    /// settling (client shutdown).
    pub fn wait(self) -> Result<T, Error> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(Error::Canceled),
        }
    }

    /// Block for at most `timeout`. `None` means still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, Error>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => None,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Some(Err(Error::Canceled)),
        }
    }
}
