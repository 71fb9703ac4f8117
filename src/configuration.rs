use parking_lot::Mutex;

use std::sync::Arc;

/// Connection parameters negotiated during `connection.tune`.
///
/// Shared between the connection, its channels and the io loop; values are
/// only written while the handshake is in progress.
#[derive(Clone, Debug, Default)]
pub struct Configuration {
  inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
  channel_max: u16,
  frame_max:   u32,
  heartbeat:   u16,
}

impl Configuration {
  pub fn channel_max(&self) -> u16 {
    self.inner.lock().channel_max
  }

  pub(crate) fn set_channel_max(&self, channel_max: u16) {
    self.inner.lock().channel_max = channel_max;
  }

  pub fn frame_max(&self) -> u32 {
    self.inner.lock().frame_max
  }

  pub(crate) fn set_frame_max(&self, frame_max: u32) {
    self.inner.lock().frame_max = frame_max;
  }

  pub fn heartbeat(&self) -> u16 {
    self.inner.lock().heartbeat
  }

  pub(crate) fn set_heartbeat(&self, heartbeat: u16) {
    self.inner.lock().heartbeat = heartbeat;
  }
}
