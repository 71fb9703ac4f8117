use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use std::{fmt, sync::Arc, time::Duration};

use crate::error::{Error, ErrorKind};

/// Subscription protocol for parties that want to be woken up instead of
/// blocking on a `Wait`.
pub trait NotifyReady {
  fn notify(&self);
}

type Task = Arc<Mutex<Option<Box<dyn NotifyReady + Send>>>>;

/// Receiving half of a one-shot result rendezvous.
pub(crate) struct Wait<T> {
  recv: Receiver<Result<T, Error>>,
  task: Task,
}

/// Completing half of a one-shot result rendezvous.
///
/// Completion is idempotent: only the first `finish`/`error` wins, which
/// lets racing close paths report without coordination.
pub(crate) struct WaitHandle<T> {
  send: Sender<Result<T, Error>>,
  task: Task,
}

impl<T> Wait<T> {
  pub(crate) fn new() -> (Wait<T>, WaitHandle<T>) {
    let (send, recv) = bounded(1);
    let task = Task::default();
    (Wait { recv, task: task.clone() }, WaitHandle { send, task })
  }

  pub(crate) fn wait(&self) -> Result<T, Error> {
    self.recv.recv().unwrap_or_else(|_| Err(ErrorKind::Dropped.into()))
  }

  pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, Error>> {
    match self.recv.recv_timeout(timeout) {
      Ok(res)                              => Some(res),
      Err(RecvTimeoutError::Timeout)       => None,
      Err(RecvTimeoutError::Disconnected)  => Some(Err(ErrorKind::Dropped.into())),
    }
  }

  pub(crate) fn try_wait(&self) -> Option<Result<T, Error>> {
    self.recv.try_recv().ok()
  }

  pub(crate) fn subscribe(&self, task: Box<dyn NotifyReady + Send>) {
    *self.task.lock() = Some(task);
  }
}

impl<T> WaitHandle<T> {
  pub(crate) fn finish(&self, val: T) {
    self.complete(Ok(val));
  }

  pub(crate) fn error(&self, error: Error) {
    self.complete(Err(error));
  }

  fn complete(&self, res: Result<T, Error>) {
    let _ = self.send.try_send(res);
    if let Some(task) = self.task.lock().as_ref() {
      task.notify();
    }
  }
}

impl<T> Clone for WaitHandle<T> {
  fn clone(&self) -> Self {
    WaitHandle {
      send: self.send.clone(),
      task: self.task.clone(),
    }
  }
}

impl<T> fmt::Debug for Wait<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("Wait")
  }
}

impl<T> fmt::Debug for WaitHandle<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("WaitHandle")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn first_completion_wins() {
    let (wait, handle) = Wait::<u8>::new();
    handle.finish(1);
    handle.finish(2);
    assert_eq!(wait.wait().unwrap(), 1);
  }

  #[test]
  fn timeout_leaves_wait_usable() {
    let (wait, handle) = Wait::<u8>::new();
    assert!(wait.wait_timeout(Duration::from_millis(10)).is_none());
    handle.finish(3);
    assert_eq!(wait.wait().unwrap(), 3);
  }

  #[test]
  fn dropped_handle_reports() {
    let (wait, handle) = Wait::<u8>::new();
    drop(handle);
    assert_eq!(wait.wait().unwrap_err().kind(), &ErrorKind::Dropped);
  }
}
