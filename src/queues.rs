use parking_lot::Mutex;

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
  consumer::Consumer,
  error::Error,
  message::{BasicGetMessage, Delivery},
  queue::{Queue, QueueState},
  types::ShortString,
  wait::WaitHandle,
  BasicProperties,
};

/// Registry of the queues a channel interacts with and of their consumers.
///
/// Deliveries are routed by consumer tag; content frames follow the
/// queue/tag recorded in the channel state by the triggering method.
#[derive(Clone, Default)]
pub(crate) struct Queues {
  queues: Arc<Mutex<HashMap<ShortString, QueueState>>>,
}

impl Queues {
  pub(crate) fn register(&self, queue: QueueState) {
    self.queues.lock().insert(queue.name().to_string().into(), queue);
  }

  pub(crate) fn deregister(&self, queue: &str) {
    self.queues.lock().remove(queue);
  }

  pub(crate) fn register_consumer(&self, queue: &str, tag: ShortString, consumer: Consumer) {
    let mut queues = self.queues.lock();
    let queue = queues
      .entry(queue.to_string().into())
      .or_insert_with(|| Queue::new(queue.to_string().into(), 0, 0).into());
    queue.register_consumer(tag, consumer);
  }

  pub(crate) fn deregister_consumer(&self, tag: &str) -> Option<Consumer> {
    self
      .queues
      .lock()
      .values_mut()
      .filter_map(|queue| queue.deregister_consumer(tag))
      .next()
  }

  pub(crate) fn has_consumer(&self, tag: &str) -> bool {
    self.queues.lock().values().any(|queue| queue.has_consumer(tag))
  }

  pub(crate) fn start_consumer_delivery(&self, consumer_tag: &str, delivery: Delivery) -> Option<ShortString> {
    for queue in self.queues.lock().values() {
      if let Some(consumer) = queue.consumer(consumer_tag) {
        consumer.start_new_delivery(delivery);
        return Some(queue.name().to_string().into());
      }
    }
    None
  }

  pub(crate) fn start_basic_get_delivery(
    &self,
    queue: &str,
    message: BasicGetMessage,
    wait_handle: WaitHandle<Option<BasicGetMessage>>,
  ) {
    let mut queues = self.queues.lock();
    let queue = queues
      .entry(queue.to_string().into())
      .or_insert_with(|| Queue::new(queue.to_string().into(), 0, 0).into());
    queue.start_basic_get(message, wait_handle);
  }

  pub(crate) fn handle_content_header_frame(
    &self,
    queue: &str,
    consumer_tag: Option<ShortString>,
    size: u64,
    properties: BasicProperties,
  ) {
    if let Some(queue) = self.queues.lock().get_mut(queue) {
      match consumer_tag {
        Some(consumer_tag) => {
          if let Some(consumer) = queue.consumer(consumer_tag.as_str()) {
            consumer.set_delivery_properties(properties);
            if size == 0 {
              consumer.new_delivery_complete();
            }
          }
        }
        None => {
          if let Some((message, _)) = queue.current_get() {
            message.delivery.properties = properties;
          }
          if size == 0 {
            queue.basic_get_complete();
          }
        }
      }
    }
  }

  pub(crate) fn handle_body_frame(
    &self,
    queue: &str,
    consumer_tag: Option<ShortString>,
    remaining_size: usize,
    payload_size: usize,
    payload: Vec<u8>,
  ) {
    if let Some(queue) = self.queues.lock().get_mut(queue) {
      match consumer_tag {
        Some(consumer_tag) => {
          if let Some(consumer) = queue.consumer(consumer_tag.as_str()) {
            consumer.receive_delivery_content(payload);
            if remaining_size == payload_size {
              consumer.new_delivery_complete();
            }
          }
        }
        None => {
          if let Some((message, _)) = queue.current_get() {
            message.delivery.receive_content(payload);
          }
          if remaining_size == payload_size {
            queue.basic_get_complete();
          }
        }
      }
    }
  }

  pub(crate) fn drop_prefetched_messages(&self) {
    for queue in self.queues.lock().values() {
      for consumer in queue.consumers() {
        consumer.drop_prefetched_messages();
      }
    }
  }

  /// Clean shutdown: notify every consumer of the cancellation and empty
  /// the registry.
  pub(crate) fn cancel_consumers(&self) {
    for (_, queue) in self.queues.lock().drain() {
      let mut queue = queue;
      for (_, consumer) in queue.drain_consumers() {
        consumer.canceled_by_server();
      }
    }
  }

  /// Failure shutdown: propagate the reason and empty the registry.
  pub(crate) fn error_consumers(&self, error: Error) {
    for (_, queue) in self.queues.lock().drain() {
      let mut queue = queue;
      for (_, consumer) in queue.drain_consumers() {
        consumer.set_error(error.clone());
      }
    }
  }
}

impl fmt::Debug for Queues {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Queues")
      .field("queues", &self.queues.lock().len())
      .finish()
  }
}
