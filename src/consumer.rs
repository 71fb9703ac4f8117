use crossbeam_channel::Sender;
use log::{trace, warn};
use parking_lot::Mutex;

use std::{collections::VecDeque, fmt, sync::Arc};

use crate::{error::Error, message::Delivery, types::ShortString, BasicProperties};

/// Sink for the lifecycle events of one subscription.
///
/// All callbacks for a given consumer run on the connection's reader
/// thread, one at a time.
pub trait ConsumerDelegate: Send + Sync {
  fn on_consume_ok(&self, _consumer_tag: &str) {}
  fn on_new_delivery(&self, delivery: Delivery);
  fn on_cancel_ok(&self, _consumer_tag: &str) {}
  /// The server canceled the subscription (`basic.cancel`).
  fn on_canceled(&self, _consumer_tag: &str) {}
  /// The channel or connection died with the given reason.
  fn on_error(&self, _error: Error) {}
  fn drop_prefetched_messages(&self) {}
}

/// Event relayed by the forwarding delegate.
#[derive(Clone, Debug)]
pub enum ConsumerEvent {
  ConsumeOk(ShortString),
  Delivery(Delivery),
  CancelOk(ShortString),
  Canceled(ShortString),
  Error(Error),
}

/// Forwarding variant: every event is relayed to the application through
/// a channel sender. A failed send only warns; the application decides
/// when to cancel the subscription server-side.
impl ConsumerDelegate for Sender<ConsumerEvent> {
  fn on_consume_ok(&self, consumer_tag: &str) {
    if self.send(ConsumerEvent::ConsumeOk(consumer_tag.to_string().into())).is_err() {
      warn!("consumer endpoint is gone, dropping consume-ok");
    }
  }

  fn on_new_delivery(&self, delivery: Delivery) {
    if self.send(ConsumerEvent::Delivery(delivery)).is_err() {
      warn!("consumer endpoint is gone, dropping delivery");
    }
  }

  fn on_cancel_ok(&self, consumer_tag: &str) {
    if self.send(ConsumerEvent::CancelOk(consumer_tag.to_string().into())).is_err() {
      warn!("consumer endpoint is gone, dropping cancel-ok");
    }
  }

  fn on_canceled(&self, consumer_tag: &str) {
    if self.send(ConsumerEvent::Canceled(consumer_tag.to_string().into())).is_err() {
      warn!("consumer endpoint is gone, dropping cancel notification");
    }
  }

  fn on_error(&self, error: Error) {
    if self.send(ConsumerEvent::Error(error)).is_err() {
      warn!("consumer endpoint is gone, dropping error notification");
    }
  }
}

/// One registered subscription on a channel.
///
/// Deliveries arriving before a delegate is installed are buffered and
/// replayed in arrival order by `set_delegate`.
#[derive(Clone)]
pub struct Consumer {
  inner: Arc<Mutex<ConsumerInner>>,
}

struct ConsumerInner {
  tag:        ShortString,
  current:    Option<Delivery>,
  deliveries: VecDeque<Delivery>,
  delegate:   Option<Box<dyn ConsumerDelegate>>,
  canceled:   bool,
}

impl Consumer {
  pub(crate) fn new(tag: ShortString) -> Consumer {
    Consumer {
      inner: Arc::new(Mutex::new(ConsumerInner {
        tag,
        current:    None,
        deliveries: VecDeque::new(),
        delegate:   None,
        canceled:   false,
      })),
    }
  }

  pub fn tag(&self) -> ShortString {
    self.inner.lock().tag.clone()
  }

  pub(crate) fn set_tag(&self, tag: ShortString) {
    self.inner.lock().tag = tag;
  }

  pub fn set_delegate(&self, delegate: Box<dyn ConsumerDelegate>) {
    let mut inner = self.inner.lock();
    for delivery in inner.deliveries.drain(..) {
      delegate.on_new_delivery(delivery);
    }
    inner.delegate = Some(delegate);
  }

  /// Pops a buffered delivery; only meaningful without a delegate.
  pub fn next_delivery(&self) -> Option<Delivery> {
    self.inner.lock().deliveries.pop_front()
  }

  pub(crate) fn on_consume_ok(&self) {
    let inner = self.inner.lock();
    if let Some(delegate) = inner.delegate.as_ref() {
      delegate.on_consume_ok(&inner.tag);
    }
  }

  pub(crate) fn start_new_delivery(&self, delivery: Delivery) {
    self.inner.lock().current = Some(delivery);
  }

  pub(crate) fn set_delivery_properties(&self, properties: BasicProperties) {
    if let Some(delivery) = self.inner.lock().current.as_mut() {
      delivery.properties = properties;
    }
  }

  pub(crate) fn receive_delivery_content(&self, payload: Vec<u8>) {
    if let Some(delivery) = self.inner.lock().current.as_mut() {
      delivery.receive_content(payload);
    }
  }

  pub(crate) fn new_delivery_complete(&self) {
    let mut inner = self.inner.lock();
    if let Some(delivery) = inner.current.take() {
      trace!("new delivery; consumer_tag={}", inner.tag);
      match inner.delegate.as_ref() {
        Some(delegate) => delegate.on_new_delivery(delivery),
        None           => inner.deliveries.push_back(delivery),
      }
    }
  }

  pub(crate) fn drop_prefetched_messages(&self) {
    let mut inner = self.inner.lock();
    inner.current = None;
    inner.deliveries.clear();
    if let Some(delegate) = inner.delegate.as_ref() {
      delegate.drop_prefetched_messages();
    }
  }

  pub(crate) fn cancel_ok(&self) {
    let mut inner = self.inner.lock();
    inner.canceled = true;
    if let Some(delegate) = inner.delegate.as_ref() {
      delegate.on_cancel_ok(&inner.tag);
    }
  }

  pub(crate) fn canceled_by_server(&self) {
    let mut inner = self.inner.lock();
    inner.canceled = true;
    inner.current = None;
    inner.deliveries.clear();
    if let Some(delegate) = inner.delegate.as_ref() {
      delegate.on_canceled(&inner.tag);
    }
  }

  pub(crate) fn set_error(&self, error: Error) {
    let mut inner = self.inner.lock();
    inner.canceled = true;
    inner.current = None;
    inner.deliveries.clear();
    if let Some(delegate) = inner.delegate.as_ref() {
      delegate.on_error(error);
    }
  }
}

impl fmt::Debug for Consumer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let inner = self.inner.lock();
    f.debug_struct("Consumer")
      .field("tag", &inner.tag)
      .field("buffered", &inner.deliveries.len())
      .field("canceled", &inner.canceled)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossbeam_channel::unbounded;

  fn delivery(tag: u64, data: &[u8]) -> Delivery {
    let mut delivery = Delivery::new(tag, "".to_string(), "q".to_string(), false);
    delivery.receive_content(data.to_vec());
    delivery
  }

  #[test]
  fn buffers_until_delegate_is_set() {
    let consumer = Consumer::new("tag-1".to_string());
    consumer.start_new_delivery(delivery(1, b"a"));
    consumer.new_delivery_complete();
    consumer.start_new_delivery(delivery(2, b"b"));
    consumer.new_delivery_complete();

    let (send, recv) = unbounded();
    consumer.set_delegate(Box::new(send));
    let tags: Vec<u64> = recv
      .try_iter()
      .filter_map(|event| match event {
        ConsumerEvent::Delivery(delivery) => Some(delivery.delivery_tag),
        _ => None,
      })
      .collect();
    assert_eq!(tags, vec![1, 2]);
  }

  #[test]
  fn cancel_drops_prefetched() {
    let consumer = Consumer::new("tag-2".to_string());
    consumer.start_new_delivery(delivery(1, b"a"));
    consumer.new_delivery_complete();
    consumer.canceled_by_server();
    assert!(consumer.next_delivery().is_none());
  }
}
