use crossbeam_channel::Sender;
use log::warn;
use parking_lot::Mutex;

use std::{
  collections::{BTreeSet, HashMap},
  fmt,
  sync::Arc,
};

use crate::{
  error::{Error, ErrorKind},
  types::{Boolean, LongLongUInt},
  wait::{Wait, WaitHandle},
};

pub type DeliveryTag = LongLongUInt;

/// Sink for publisher-confirm notifications (`basic.ack` / `basic.nack`
/// received from the server).
pub trait ConfirmHandler: Send + Sync {
  /// Returns false when the receiving side is gone; the handler is then
  /// unregistered.
  fn on_confirm(&self, confirm: ConfirmEvent) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmEvent {
  Ack { delivery_tag: DeliveryTag, multiple: bool },
  Nack { delivery_tag: DeliveryTag, multiple: bool },
}

/// Forwarding variant over a channel sender.
impl ConfirmHandler for Sender<ConfirmEvent> {
  fn on_confirm(&self, confirm: ConfirmEvent) -> bool {
    self.send(confirm).is_ok()
  }
}

/// Publisher-confirm bookkeeping of one channel.
///
/// Tracks the set of delivery tags published but not yet confirmed, the
/// callers parked in `wait_for_confirms`, and whether a nack was seen
/// since the set last drained.
#[derive(Clone, Default)]
pub(crate) struct Acknowledgements {
  inner: Arc<Mutex<Inner>>,
}

struct Inner {
  unconfirmed:        BTreeSet<DeliveryTag>,
  only_acks_received: bool,
  next_waiter_id:     u64,
  waiters:            HashMap<u64, WaitHandle<Boolean>>,
  handler:            Option<Box<dyn ConfirmHandler>>,
}

impl Default for Inner {
  fn default() -> Self {
    Self {
      unconfirmed:        BTreeSet::new(),
      only_acks_received: true,
      next_waiter_id:     0,
      waiters:            HashMap::new(),
      handler:            None,
    }
  }
}

impl Acknowledgements {
  pub(crate) fn register_pending(&self, delivery_tag: DeliveryTag) {
    self.inner.lock().unconfirmed.insert(delivery_tag);
  }

  pub(crate) fn ack(&self, delivery_tag: DeliveryTag) -> Result<(), Error> {
    self.drop_confirmed(delivery_tag, false, true)
  }

  pub(crate) fn nack(&self, delivery_tag: DeliveryTag) -> Result<(), Error> {
    self.drop_confirmed(delivery_tag, false, false)
  }

  pub(crate) fn ack_all_before(&self, delivery_tag: DeliveryTag) -> Result<(), Error> {
    self.drop_confirmed(delivery_tag, true, true)
  }

  pub(crate) fn nack_all_before(&self, delivery_tag: DeliveryTag) -> Result<(), Error> {
    self.drop_confirmed(delivery_tag, true, false)
  }

  pub(crate) fn ack_all_pending(&self) {
    let mut inner = self.inner.lock();
    inner.unconfirmed.clear();
    inner.notify_handler(ConfirmEvent::Ack { delivery_tag: 0, multiple: true });
    inner.complete_waiters_if_drained();
  }

  pub(crate) fn nack_all_pending(&self) {
    let mut inner = self.inner.lock();
    inner.unconfirmed.clear();
    inner.only_acks_received = false;
    inner.notify_handler(ConfirmEvent::Nack { delivery_tag: 0, multiple: true });
    inner.complete_waiters_if_drained();
  }

  fn drop_confirmed(&self, delivery_tag: DeliveryTag, multiple: bool, ack: bool) -> Result<(), Error> {
    let mut inner = self.inner.lock();
    if multiple {
      let still_pending = inner.unconfirmed.split_off(&(delivery_tag + 1));
      inner.unconfirmed = still_pending;
    } else if !inner.unconfirmed.remove(&delivery_tag) {
      return Err(ErrorKind::UnexpectedReply.into());
    }
    if ack {
      inner.notify_handler(ConfirmEvent::Ack { delivery_tag, multiple });
    } else {
      inner.only_acks_received = false;
      inner.notify_handler(ConfirmEvent::Nack { delivery_tag, multiple });
    }
    inner.complete_waiters_if_drained();
    Ok(())
  }

  /// Parks a `wait_for_confirms` caller. An empty set resolves right away
  /// with the outcome of the previous batch (trivially `true`).
  pub(crate) fn register_waiter(&self) -> (u64, Wait<Boolean>) {
    let mut inner = self.inner.lock();
    let (wait, wait_handle) = Wait::new();
    let id = inner.next_waiter_id;
    inner.next_waiter_id += 1;
    if inner.unconfirmed.is_empty() {
      wait_handle.finish(true);
    } else {
      inner.waiters.insert(id, wait_handle);
    }
    (id, wait)
  }

  /// A timed-out waiter is removed so that a late confirm completes into
  /// nothing.
  pub(crate) fn forget_waiter(&self, id: u64) {
    self.inner.lock().waiters.remove(&id);
  }

  pub(crate) fn on_channel_error(&self, error: Error) {
    let mut inner = self.inner.lock();
    inner.unconfirmed.clear();
    inner.only_acks_received = true;
    for (_, waiter) in inner.waiters.drain() {
      waiter.error(error.clone());
    }
  }

  pub(crate) fn register_handler(&self, handler: Box<dyn ConfirmHandler>) {
    self.inner.lock().handler = Some(handler);
  }

  pub(crate) fn unregister_handler(&self) {
    self.inner.lock().handler = None;
  }

  #[cfg(test)]
  pub(crate) fn unconfirmed(&self) -> Vec<DeliveryTag> {
    self.inner.lock().unconfirmed.iter().cloned().collect()
  }
}

impl Inner {
  fn notify_handler(&mut self, confirm: ConfirmEvent) {
    let dead = self
      .handler
      .as_ref()
      .map(|handler| !handler.on_confirm(confirm))
      .unwrap_or(false);
    if dead {
      warn!("confirm handler is gone, unregistering it");
      self.handler = None;
    }
  }

  fn complete_waiters_if_drained(&mut self) {
    if self.unconfirmed.is_empty() {
      let outcome = self.only_acks_received;
      for (_, waiter) in self.waiters.drain() {
        waiter.finish(outcome);
      }
      self.only_acks_received = true;
    }
  }
}

impl fmt::Debug for Acknowledgements {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let inner = self.inner.lock();
    f.debug_struct("Acknowledgements")
      .field("unconfirmed", &inner.unconfirmed.len())
      .field("only_acks_received", &inner.only_acks_received)
      .field("waiters", &inner.waiters.len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn multiple_ack_removes_up_to_tag() {
    let acks = Acknowledgements::default();
    for tag in 1..=5 {
      acks.register_pending(tag);
    }
    acks.ack_all_before(3).unwrap();
    assert_eq!(acks.unconfirmed(), vec![4, 5]);
  }

  #[test]
  fn single_ack_of_unknown_tag_is_an_error() {
    let acks = Acknowledgements::default();
    acks.register_pending(1);
    assert!(acks.ack(2).is_err());
    assert!(acks.ack(1).is_ok());
  }

  #[test]
  fn waiters_complete_when_set_drains() {
    let acks = Acknowledgements::default();
    acks.register_pending(1);
    acks.register_pending(2);
    let (_, wait) = acks.register_waiter();
    assert!(wait.try_wait().is_none());

    acks.nack(1).unwrap();
    assert!(wait.try_wait().is_none());
    acks.ack(2).unwrap();
    // a nack was seen in this batch
    assert_eq!(wait.try_wait().unwrap().unwrap(), false);

    // the flag resets once the batch is reported
    acks.register_pending(3);
    let (_, wait) = acks.register_waiter();
    acks.ack(3).unwrap();
    assert_eq!(wait.try_wait().unwrap().unwrap(), true);
  }

  #[test]
  fn empty_set_resolves_immediately() {
    let acks = Acknowledgements::default();
    let (_, wait) = acks.register_waiter();
    assert_eq!(wait.try_wait().unwrap().unwrap(), true);
  }

  #[test]
  fn forgotten_waiter_sees_nothing() {
    let acks = Acknowledgements::default();
    acks.register_pending(1);
    let (id, wait) = acks.register_waiter();
    acks.forget_waiter(id);
    acks.ack(1).unwrap();
    assert!(wait.try_wait().is_none());
  }
}
