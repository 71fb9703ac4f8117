use amq_protocol::protocol::AMQPError;
use failure::{Backtrace, Context, Fail};

use std::{fmt, io, sync::Arc};

use crate::{channel_status::ChannelState, connection_status::ConnectionState};

/// Error returned by every fallible operation of this crate.
///
/// The error is cheap to clone; the same failure can be reported to every
/// party waiting on a channel or connection.
#[derive(Clone, Debug)]
pub struct Error {
  inner: Arc<Context<ErrorKind>>,
}

impl Error {
  pub fn kind(&self) -> &ErrorKind {
    self.inner.get_context()
  }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ErrorKind {
  IOError,
  ParsingError(String),
  SerialisationError(String),
  InvalidUri(String),
  InvalidDestination(String),
  InvalidProtocolVersion(u8, u8),
  InvalidConnectionState(ConnectionState),
  InvalidChannelState(ChannelState),
  UnknownChannel(u16),
  ChannelAlreadyRegistered(u16),
  ChannelsLimitReached,
  UnexpectedReply,
  ConsumerTagAlreadyInUse(String),
  NotInConfirmMode,
  ConfirmsTimedOut,
  Blocked,
  ConnectionRefused,
  AuthenticationFailure,
  AccessRefused,
  HandshakeTimedOut,
  HeartbeatTimedOut,
  UnexpectedSocketClose,
  ProtocolError(AMQPError),
  ServerClosedConnection(u16, String),
  ServerClosedChannel(u16, String),
  ClientClosedConnection,
  ClientClosedChannel,
  TimedOutFlushing,
  TimedOutWaitingCloseOk,
  Dropped,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ErrorKind::IOError                           => write!(f, "IO error"),
      ErrorKind::ParsingError(e)                   => write!(f, "could not parse frame: {}", e),
      ErrorKind::SerialisationError(e)             => write!(f, "could not serialise frame: {}", e),
      ErrorKind::InvalidUri(e)                     => write!(f, "invalid AMQP URI: {}", e),
      ErrorKind::InvalidDestination(d)             => write!(f, "invalid destination: {}", d),
      ErrorKind::InvalidProtocolVersion(maj, min)  => write!(f, "the server speaks AMQP {}-{}-x, we speak 0-9-1", maj, min),
      ErrorKind::InvalidConnectionState(state)     => write!(f, "invalid connection state: {:?}", state),
      ErrorKind::InvalidChannelState(state)        => write!(f, "invalid channel state: {:?}", state),
      ErrorKind::UnknownChannel(id)                => write!(f, "unknown channel: {}", id),
      ErrorKind::ChannelAlreadyRegistered(id)      => write!(f, "channel {} already registered", id),
      ErrorKind::ChannelsLimitReached              => write!(f, "no more channel numbers available"),
      ErrorKind::UnexpectedReply                   => write!(f, "received an unexpected reply from the server"),
      ErrorKind::ConsumerTagAlreadyInUse(tag)      => write!(f, "consumer tag already in use: {}", tag),
      ErrorKind::NotInConfirmMode                  => write!(f, "channel is not in publisher-confirm mode"),
      ErrorKind::ConfirmsTimedOut                  => write!(f, "timed out waiting for publisher confirms"),
      ErrorKind::Blocked                           => write!(f, "content traffic is paused by channel.flow"),
      ErrorKind::ConnectionRefused                 => write!(f, "the server refused the connection"),
      ErrorKind::AuthenticationFailure             => write!(f, "the server rejected our credentials"),
      ErrorKind::AccessRefused                     => write!(f, "the server refused access to the virtual host"),
      ErrorKind::HandshakeTimedOut                 => write!(f, "timed out during the connection handshake"),
      ErrorKind::HeartbeatTimedOut                 => write!(f, "no frame received for two heartbeat intervals"),
      ErrorKind::UnexpectedSocketClose             => write!(f, "the socket was closed unexpectedly"),
      ErrorKind::ProtocolError(e)                  => write!(f, "AMQP protocol error: {:?}", e),
      ErrorKind::ServerClosedConnection(code, text) => write!(f, "the server closed the connection: {} {}", code, text),
      ErrorKind::ServerClosedChannel(code, text)   => write!(f, "the server closed the channel: {} {}", code, text),
      ErrorKind::ClientClosedConnection            => write!(f, "the connection was closed by us"),
      ErrorKind::ClientClosedChannel               => write!(f, "the channel was closed by us"),
      ErrorKind::TimedOutFlushing                  => write!(f, "timed out flushing outgoing frames"),
      ErrorKind::TimedOutWaitingCloseOk            => write!(f, "timed out waiting for connection.close-ok"),
      ErrorKind::Dropped                           => write!(f, "the handler was dropped without providing a reply"),
    }
  }
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&*self.inner, f)
  }
}

impl Fail for Error {
  fn cause(&self) -> Option<&dyn Fail> {
    self.inner.cause()
  }

  fn backtrace(&self) -> Option<&Backtrace> {
    self.inner.backtrace()
  }
}

impl From<ErrorKind> for Error {
  fn from(kind: ErrorKind) -> Self {
    Error { inner: Arc::new(Context::new(kind)) }
  }
}

impl From<Context<ErrorKind>> for Error {
  fn from(inner: Context<ErrorKind>) -> Self {
    Error { inner: Arc::new(inner) }
  }
}

impl From<io::Error> for Error {
  fn from(error: io::Error) -> Self {
    error.context(ErrorKind::IOError).into()
  }
}
