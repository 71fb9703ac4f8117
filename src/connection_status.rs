use parking_lot::Mutex;

use std::{fmt, mem, sync::Arc};

use crate::{
  auth::Credentials,
  connection::Connection,
  connection_properties::ConnectionProperties,
  error::{Error, ErrorKind},
  wait::WaitHandle,
};

/// State machine of the connection, including the handshake steps.
///
/// The connecting states carry the handle used to hand the connection (or
/// the failure) back to the caller of `Connection::connect`.
#[derive(Clone)]
pub enum ConnectionState {
  Initial,
  SentProtocolHeader(WaitHandle<Connection>, Credentials, ConnectionProperties),
  SentStartOk(WaitHandle<Connection>, Credentials),
  SentOpen(WaitHandle<Connection>),
  Connected,
  Closing,
  Closed,
  Error,
}

impl Default for ConnectionState {
  fn default() -> Self {
    ConnectionState::Initial
  }
}

impl fmt::Debug for ConnectionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      ConnectionState::Initial               => "Initial",
      ConnectionState::SentProtocolHeader(..) => "SentProtocolHeader",
      ConnectionState::SentStartOk(..)       => "SentStartOk",
      ConnectionState::SentOpen(..)          => "SentOpen",
      ConnectionState::Connected             => "Connected",
      ConnectionState::Closing               => "Closing",
      ConnectionState::Closed                => "Closed",
      ConnectionState::Error                 => "Error",
    })
  }
}

impl PartialEq for ConnectionState {
  fn eq(&self, other: &Self) -> bool {
    mem::discriminant(self) == mem::discriminant(other)
  }
}

impl ConnectionState {
  pub fn connecting(&self) -> bool {
    match self {
      ConnectionState::SentProtocolHeader(..)
      | ConnectionState::SentStartOk(..)
      | ConnectionState::SentOpen(..) => true,
      _ => false,
    }
  }
}

#[derive(Clone, Debug, Default)]
pub struct ConnectionStatus {
  inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
  state:          ConnectionState,
  vhost:          String,
  blocked:        bool,
  closing_reason: Option<Error>,
}

impl Default for Inner {
  fn default() -> Self {
    Self {
      state:          ConnectionState::default(),
      vhost:          "/".to_string(),
      blocked:        false,
      closing_reason: None,
    }
  }
}

impl ConnectionStatus {
  pub fn state(&self) -> ConnectionState {
    self.inner.lock().state.clone()
  }

  pub(crate) fn set_state(&self, state: ConnectionState) {
    self.inner.lock().state = state;
  }

  pub fn vhost(&self) -> String {
    self.inner.lock().vhost.clone()
  }

  pub(crate) fn set_vhost(&self, vhost: &str) {
    self.inner.lock().vhost = vhost.to_string();
  }

  pub(crate) fn block(&self) {
    self.inner.lock().blocked = true;
  }

  pub(crate) fn unblock(&self) {
    self.inner.lock().blocked = false;
  }

  pub fn blocked(&self) -> bool {
    self.inner.lock().blocked
  }

  pub fn connecting(&self) -> bool {
    self.inner.lock().state.connecting()
  }

  pub fn connected(&self) -> bool {
    self.inner.lock().state == ConnectionState::Connected
  }

  pub fn closing(&self) -> bool {
    self.inner.lock().state == ConnectionState::Closing
  }

  pub fn closed(&self) -> bool {
    self.inner.lock().state == ConnectionState::Closed
  }

  pub fn errored(&self) -> bool {
    self.inner.lock().state == ConnectionState::Error
  }

  /// Record why the connection is going down.
  ///
  /// When several causes race, the strongest wins: a server-initiated
  /// close overrides an internal failure, which overrides an
  /// application-initiated close.
  pub(crate) fn set_closing_reason(&self, reason: Error) {
    let mut inner = self.inner.lock();
    let keep = inner
      .closing_reason
      .as_ref()
      .map(|current| reason_rank(current.kind()) >= reason_rank(reason.kind()))
      .unwrap_or(false);
    if !keep {
      inner.closing_reason = Some(reason);
    }
  }

  pub fn closing_reason(&self) -> Option<Error> {
    self.inner.lock().closing_reason.clone()
  }
}

fn reason_rank(kind: &ErrorKind) -> u8 {
  match kind {
    ErrorKind::ClientClosedConnection => 0,
    ErrorKind::ServerClosedConnection(..) | ErrorKind::ProtocolError(..) => 2,
    _ => 1,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn closing_reason_precedence() {
    let status = ConnectionStatus::default();
    status.set_closing_reason(ErrorKind::ClientClosedConnection.into());
    status.set_closing_reason(ErrorKind::HeartbeatTimedOut.into());
    status.set_closing_reason(ErrorKind::ClientClosedConnection.into());
    assert_eq!(
      status.closing_reason().unwrap().kind(),
      &ErrorKind::HeartbeatTimedOut
    );

    status.set_closing_reason(ErrorKind::ServerClosedConnection(320, "bye".to_string()).into());
    status.set_closing_reason(ErrorKind::HeartbeatTimedOut.into());
    assert_eq!(
      status.closing_reason().unwrap().kind(),
      &ErrorKind::ServerClosedConnection(320, "bye".to_string())
    );
  }
}
