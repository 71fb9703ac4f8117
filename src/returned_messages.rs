use crossbeam_channel::Sender;
use log::{trace, warn};
use parking_lot::Mutex;

use std::{fmt, sync::Arc};

use crate::{message::BasicReturnMessage, BasicProperties};

/// Sink for messages the server hands back with `basic.return`.
pub trait ReturnedMessageHandler: Send + Sync {
  /// Returns false when the receiving side is gone; the handler is then
  /// unregistered.
  fn on_returned(&self, message: BasicReturnMessage) -> bool;
}

/// Forwarding variant over a channel sender.
impl ReturnedMessageHandler for Sender<BasicReturnMessage> {
  fn on_returned(&self, message: BasicReturnMessage) -> bool {
    self.send(message).is_ok()
  }
}

#[derive(Clone, Default)]
pub(crate) struct ReturnedMessages {
  inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
  current:  Option<BasicReturnMessage>,
  messages: Vec<BasicReturnMessage>,
  handler:  Option<Box<dyn ReturnedMessageHandler>>,
}

impl ReturnedMessages {
  pub(crate) fn start_new_delivery(&self, message: BasicReturnMessage) {
    self.inner.lock().current = Some(message);
  }

  pub(crate) fn set_delivery_properties(&self, properties: BasicProperties) {
    if let Some(message) = self.inner.lock().current.as_mut() {
      message.delivery.properties = properties;
    }
  }

  pub(crate) fn receive_delivery_content(&self, payload: Vec<u8>) {
    if let Some(message) = self.inner.lock().current.as_mut() {
      message.delivery.receive_content(payload);
    }
  }

  pub(crate) fn new_delivery_complete(&self) {
    let mut inner = self.inner.lock();
    if let Some(message) = inner.current.take() {
      trace!("basic.return reassembled; routing_key={}", message.delivery.routing_key);
      let delivered = inner
        .handler
        .as_ref()
        .map(|handler| handler.on_returned(message.clone()))
        .unwrap_or(false);
      if inner.handler.is_some() && !delivered {
        warn!("returned-message handler is gone, unregistering it");
        inner.handler = None;
      }
      if !delivered {
        inner.messages.push(message);
      }
    }
  }

  pub(crate) fn drain(&self) -> Vec<BasicReturnMessage> {
    self.inner.lock().messages.drain(..).collect()
  }

  pub(crate) fn register_handler(&self, handler: Box<dyn ReturnedMessageHandler>) {
    self.inner.lock().handler = Some(handler);
  }

  pub(crate) fn unregister_handler(&self) {
    self.inner.lock().handler = None;
  }
}

impl fmt::Debug for ReturnedMessages {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let inner = self.inner.lock();
    f.debug_struct("ReturnedMessages")
      .field("stored", &inner.messages.len())
      .field("has_handler", &inner.handler.is_some())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossbeam_channel::unbounded;

  fn returned() -> BasicReturnMessage {
    BasicReturnMessage::new("amq.direct".to_string(), "nowhere".to_string(), 312, "NO_ROUTE".to_string())
  }

  #[test]
  fn stored_until_drained() {
    let messages = ReturnedMessages::default();
    messages.start_new_delivery(returned());
    messages.new_delivery_complete();
    assert_eq!(messages.drain().len(), 1);
    assert!(messages.drain().is_empty());
  }

  #[test]
  fn handler_receives_instead_of_store() {
    let messages = ReturnedMessages::default();
    let (send, recv) = unbounded();
    messages.register_handler(Box::new(send));
    messages.start_new_delivery(returned());
    messages.new_delivery_complete();
    assert!(recv.try_recv().is_ok());
    assert!(messages.drain().is_empty());
  }

  #[test]
  fn dead_handler_falls_back_to_store() {
    let messages = ReturnedMessages::default();
    let (send, recv) = unbounded();
    messages.register_handler(Box::new(send));
    drop(recv);
    messages.start_new_delivery(returned());
    messages.new_delivery_complete();
    assert_eq!(messages.drain().len(), 1);
  }
}
