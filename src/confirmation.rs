use std::time::Duration;

use crate::{
  error::Error,
  wait::{NotifyReady, Wait},
};

/// Pending result of an operation sent to the server.
///
/// Sychronous AMQP methods resolve with the server reply, asynchronous ones
/// once the frames were handed to the socket. Poll it with [`try_wait`],
/// block on it with [`wait`], or [`subscribe`] a waker.
///
/// [`try_wait`]: #method.try_wait
/// [`wait`]: #method.wait
/// [`subscribe`]: #method.subscribe
#[derive(Debug)]
pub struct Confirmation<T> {
  wait: Wait<T>,
}

impl<T> Confirmation<T> {
  pub(crate) fn new(wait: Wait<T>) -> Confirmation<T> {
    Confirmation { wait }
  }

  pub(crate) fn resolved(val: T) -> Confirmation<T> {
    let (wait, wait_handle) = Wait::new();
    wait_handle.finish(val);
    Confirmation { wait }
  }

  pub(crate) fn new_error(error: Error) -> Confirmation<T> {
    let (wait, wait_handle) = Wait::new();
    wait_handle.error(error);
    Confirmation { wait }
  }

  pub fn try_wait(&self) -> Option<Result<T, Error>> {
    self.wait.try_wait()
  }

  pub fn wait(self) -> Result<T, Error> {
    self.wait.wait()
  }

  pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, Error>> {
    self.wait.wait_timeout(timeout)
  }

  pub fn subscribe(&self, task: Box<dyn NotifyReady + Send>) {
    self.wait.subscribe(task)
  }

  /// Waits and discards the success value, keeping only the error.
  pub fn as_error(self) -> Result<(), Error> {
    self.wait().map(|_| ())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;

  #[test]
  fn resolved_is_immediate() {
    let confirmation = Confirmation::resolved(42);
    assert_eq!(confirmation.try_wait().unwrap().unwrap(), 42);
  }

  #[test]
  fn error_surfaces_through_as_error() {
    let confirmation = Confirmation::<()>::new_error(ErrorKind::Blocked.into());
    assert_eq!(confirmation.as_error().unwrap_err().kind(), &ErrorKind::Blocked);
  }
}
