use log::warn;
use parking_lot::Mutex;

use std::{fmt, sync::Arc};

use crate::types::ShortString;

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelState {
  Initial,
  Connected,
  Closing,
  Closed,
  Error,
  /// A content-bearing method arrived; the header frame is next.
  /// Fields: source queue (None for basic.return), consumer tag.
  WillReceiveContent(Option<ShortString>, Option<ShortString>),
  ReceivingContent(Option<ShortString>, Option<ShortString>, usize),
}

impl Default for ChannelState {
  fn default() -> Self {
    ChannelState::Initial
  }
}

/// Sink notified when the server pauses or resumes our content traffic
/// with `channel.flow`.
pub trait FlowHandler: Send + Sync {
  /// Returns false when the receiving side is gone; the handler is then
  /// unregistered.
  fn on_flow(&self, active: bool) -> bool;
}

impl FlowHandler for crossbeam_channel::Sender<bool> {
  fn on_flow(&self, active: bool) -> bool {
    self.send(active).is_ok()
  }
}

#[derive(Clone, Default)]
pub struct ChannelStatus {
  inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
  state:        ChannelState,
  send_flow:    Option<bool>,
  confirm:      bool,
  flow_handler: Option<Box<dyn FlowHandler>>,
}

impl ChannelStatus {
  pub fn state(&self) -> ChannelState {
    self.inner.lock().state.clone()
  }

  pub(crate) fn set_state(&self, state: ChannelState) {
    self.inner.lock().state = state;
  }

  /// Whether the channel can carry application traffic.
  pub fn connected(&self) -> bool {
    match self.inner.lock().state {
      ChannelState::Initial | ChannelState::Closing | ChannelState::Closed | ChannelState::Error => false,
      _ => true,
    }
  }

  pub fn closing(&self) -> bool {
    self.inner.lock().state == ChannelState::Closing
  }

  pub fn confirm(&self) -> bool {
    self.inner.lock().confirm
  }

  pub(crate) fn set_confirm(&self) {
    self.inner.lock().confirm = true;
  }

  /// Whether the server currently accepts content-bearing traffic from us.
  pub fn flow(&self) -> bool {
    self.inner.lock().send_flow.unwrap_or(true)
  }

  pub(crate) fn set_send_flow(&self, flow: bool) {
    let mut inner = self.inner.lock();
    inner.send_flow = Some(flow);
    let dead = inner
      .flow_handler
      .as_ref()
      .map(|handler| !handler.on_flow(flow))
      .unwrap_or(false);
    if dead {
      warn!("flow handler is gone, unregistering it");
      inner.flow_handler = None;
    }
  }

  pub(crate) fn register_flow_handler(&self, handler: Box<dyn FlowHandler>) {
    self.inner.lock().flow_handler = Some(handler);
  }

  pub(crate) fn unregister_flow_handler(&self) {
    self.inner.lock().flow_handler = None;
  }
}

impl fmt::Debug for ChannelStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let inner = self.inner.lock();
    f.debug_struct("ChannelStatus")
      .field("state", &inner.state)
      .field("send_flow", &inner.send_flow)
      .field("confirm", &inner.confirm)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crossbeam_channel::unbounded;

  #[test]
  fn flow_handler_observes_transitions() {
    let status = ChannelStatus::default();
    let (send, recv) = unbounded();
    status.register_flow_handler(Box::new(send));

    assert!(status.flow());
    status.set_send_flow(false);
    assert!(!status.flow());
    status.set_send_flow(true);
    assert_eq!(recv.try_recv().ok(), Some(false));
    assert_eq!(recv.try_recv().ok(), Some(true));
  }

  #[test]
  fn dead_flow_handler_is_unregistered() {
    let status = ChannelStatus::default();
    let (send, recv) = unbounded();
    status.register_flow_handler(Box::new(send));
    drop(recv);
    status.set_send_flow(false);
    assert!(status.inner.lock().flow_handler.is_none());
  }
}
