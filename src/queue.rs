use std::collections::HashMap;

use crate::{
  consumer::Consumer,
  message::BasicGetMessage,
  types::{LongUInt, ShortString},
  wait::WaitHandle,
};

/// Result of a `queue.declare`, as reported by the server.
#[derive(Clone, Debug, PartialEq)]
pub struct Queue {
  name:           ShortString,
  message_count:  LongUInt,
  consumer_count: LongUInt,
}

impl Queue {
  pub(crate) fn new(name: ShortString, message_count: LongUInt, consumer_count: LongUInt) -> Self {
    Self {
      name,
      message_count,
      consumer_count,
    }
  }

  pub fn name(&self) -> &str {
    self.name.as_str()
  }

  pub fn message_count(&self) -> LongUInt {
    self.message_count
  }

  pub fn consumer_count(&self) -> LongUInt {
    self.consumer_count
  }
}

pub(crate) struct QueueState {
  name:        ShortString,
  consumers:   HashMap<ShortString, Consumer>,
  current_get: Option<(BasicGetMessage, WaitHandle<Option<BasicGetMessage>>)>,
}

impl QueueState {
  pub(crate) fn name(&self) -> &str {
    self.name.as_str()
  }

  pub(crate) fn register_consumer(&mut self, tag: ShortString, consumer: Consumer) {
    self.consumers.insert(tag, consumer);
  }

  pub(crate) fn deregister_consumer(&mut self, tag: &str) -> Option<Consumer> {
    self.consumers.remove(tag)
  }

  pub(crate) fn consumer(&self, tag: &str) -> Option<&Consumer> {
    self.consumers.get(tag)
  }

  pub(crate) fn has_consumer(&self, tag: &str) -> bool {
    self.consumers.contains_key(tag)
  }

  pub(crate) fn consumers(&self) -> impl Iterator<Item = &Consumer> {
    self.consumers.values()
  }

  pub(crate) fn drain_consumers(&mut self) -> impl Iterator<Item = (ShortString, Consumer)> {
    self.consumers.drain().collect::<Vec<_>>().into_iter()
  }

  pub(crate) fn start_basic_get(
    &mut self,
    message: BasicGetMessage,
    wait_handle: WaitHandle<Option<BasicGetMessage>>,
  ) {
    self.current_get = Some((message, wait_handle));
  }

  pub(crate) fn current_get(&mut self) -> Option<&mut (BasicGetMessage, WaitHandle<Option<BasicGetMessage>>)> {
    self.current_get.as_mut()
  }

  pub(crate) fn basic_get_complete(&mut self) {
    if let Some((message, wait_handle)) = self.current_get.take() {
      wait_handle.finish(Some(message));
    }
  }
}

impl From<Queue> for QueueState {
  fn from(queue: Queue) -> Self {
    Self {
      name:        queue.name,
      consumers:   HashMap::new(),
      current_get: None,
    }
  }
}
