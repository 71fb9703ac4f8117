use amq_protocol::frame::AMQPFrame;
use log::{debug, error, info, trace, warn};
use mio::{Evented, Poll, PollOpt, Ready, Registration, SetReadiness, Token};

use std::{io, sync::Arc, time::Duration};

use crate::{
  auth::Credentials,
  channel::{Channel, Reply},
  channels::Channels,
  configuration::Configuration,
  confirmation::Confirmation,
  connection_properties::ConnectionProperties,
  connection_status::{ConnectionState, ConnectionStatus},
  error::{Error, ErrorKind},
  frames::{Frames, Priority, QueuedFrame},
  io_loop::{IoLoop, IoLoopHandle},
  protocol::{self, AMQPClass, AMQPError},
  tcp::AMQPUriTcpExt,
  types::*,
  uri::AMQPUri,
  wait::{Wait, WaitHandle},
};

/// How long an application close waits for `connection.close-ok`.
const CLOSE_OK_TIMEOUT: Duration = Duration::from_secs(60);
/// How long an application close flushes outgoing frames first.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(60);

/// A connection to an AMQP server, shared by its channels and the io loop.
///
/// Open one with [`Connection::connect`], then multiplex channels over it
/// with [`create_channel`].
///
/// [`Connection::connect`]: #method.connect
/// [`create_channel`]: #method.create_channel
#[derive(Clone)]
pub struct Connection {
  configuration: Configuration,
  status:        ConnectionStatus,
  channels:      Channels,
  frames:        Frames,
  registration:  Arc<Registration>,
  set_readiness: SetReadiness,
  io_loop:       IoLoopHandle,
}

impl Connection {
  pub(crate) fn new() -> Connection {
    let (registration, set_readiness) = Registration::new2();
    Connection {
      configuration: Configuration::default(),
      status:        ConnectionStatus::default(),
      channels:      Channels::default(),
      frames:        Frames::default(),
      registration:  Arc::new(registration),
      set_readiness,
      io_loop:       IoLoopHandle::default(),
    }
  }

  /// Connects to `uri` (`amqp://` or `amqps://`) and drives the AMQP
  /// handshake. The returned confirmation resolves with the open
  /// connection once the server sent `connection.open-ok`.
  pub fn connect(uri: &str, options: ConnectionProperties) -> Confirmation<Connection> {
    let (wait, wait_handle) = Wait::new();
    let res = uri
      .parse::<AMQPUri>()
      .map_err(|e| Error::from(ErrorKind::InvalidUri(e)))
      .and_then(|uri| {
        uri
          .connect(move |stream, uri| Connection::connector(stream, uri, options, wait_handle))
          .map_err(Error::from)?
      });
    match res {
      Ok(())     => Confirmation::new(wait),
      Err(error) => Confirmation::new_error(error),
    }
  }

  fn connector(
    stream: crate::tcp::TcpStream,
    uri: AMQPUri,
    options: ConnectionProperties,
    wait_handle: WaitHandle<Connection>,
  ) -> Result<(), Error> {
    let connection = Connection::new();
    connection.status.set_vhost(&uri.vhost);
    if let Some(frame_max) = uri.query.frame_max {
      connection.configuration.set_frame_max(frame_max);
    }
    if let Some(channel_max) = uri.query.channel_max {
      connection.configuration.set_channel_max(channel_max);
    }
    if let Some(heartbeat) = uri.query.heartbeat {
      connection.configuration.set_heartbeat(heartbeat);
    }
    let credentials = Credentials::new(uri.authority.userinfo.username, uri.authority.userinfo.password);
    connection.frames.push(0, Priority::Critical, AMQPFrame::ProtocolHeader, None, None);
    connection
      .status
      .set_state(ConnectionState::SentProtocolHeader(wait_handle, credentials, options));
    IoLoop::new(connection.clone(), stream)?.run()
  }

  pub fn status(&self) -> &ConnectionStatus {
    &self.status
  }

  pub fn configuration(&self) -> &Configuration {
    &self.configuration
  }

  /// Opens a channel on the next free channel number.
  pub fn create_channel(&self) -> Confirmation<Channel> {
    self.do_create_channel(None)
  }

  /// Opens a channel on `channel_id`, as long as it is free and within
  /// the negotiated `channel_max`.
  pub fn create_channel_with_id(&self, channel_id: u16) -> Confirmation<Channel> {
    self.do_create_channel(Some(channel_id))
  }

  fn do_create_channel(&self, proposed: Option<u16>) -> Confirmation<Channel> {
    if !self.status.connected() {
      return Confirmation::new_error(ErrorKind::InvalidConnectionState(self.status.state()).into());
    }
    match self.channels.create(self.clone(), proposed) {
      Ok(channel) => {
        let (wait, wait_handle) = Wait::new();
        match channel.channel_open(wait_handle) {
          Ok(())     => Confirmation::new(wait),
          Err(error) => Confirmation::new_error(error),
        }
      }
      Err(error) => Confirmation::new_error(error),
    }
  }

  /// Closes the connection: broadcasts the closure to every channel,
  /// flushes outgoing frames, then performs the `connection.close`
  /// handshake. A 200 reply code is a normal closure.
  pub fn close(&self, reply_code: ShortUInt, reply_text: &str) -> Result<(), Error> {
    if !self.status.connected() {
      return Err(ErrorKind::InvalidConnectionState(self.status.state()).into());
    }
    let reason: Error = ErrorKind::ClientClosedConnection.into();
    self.status.set_closing_reason(reason);
    self.status.set_state(ConnectionState::Closing);
    self.channels.set_connection_closing();
    if let Err(error) = self.flush(FLUSH_TIMEOUT) {
      warn!("could not flush outgoing frames before close: {}", error);
    }
    let method = AMQPClass::Connection(protocol::connection::AMQPMethod::Close(protocol::connection::Close {
      reply_code,
      reply_text: reply_text.to_string().into(),
      class_id:   0,
      method_id:  0,
    }));
    let (wait, wait_handle) = Wait::new();
    self.frames.push(
      0,
      Priority::Critical,
      AMQPFrame::Method(0, method),
      None,
      Some(Reply::AwaitingConnectionCloseOk(wait_handle)),
    );
    self.wake();
    match wait.wait_timeout(CLOSE_OK_TIMEOUT) {
      Some(res) => res,
      None => {
        let error: Error = ErrorKind::TimedOutWaitingCloseOk.into();
        self.set_closed(error.clone());
        Err(error)
      }
    }
  }

  /// Blocks until everything queued was handed to the socket.
  pub fn flush(&self, timeout: Duration) -> Result<(), Error> {
    let (wait, wait_handle) = Wait::new();
    self.frames.register_flush_waiter(wait_handle);
    self.wake();
    match wait.wait_timeout(timeout) {
      Some(res) => res,
      None      => Err(ErrorKind::TimedOutFlushing.into()),
    }
  }

  /// Blocks until the io loop terminated.
  pub fn wait_for_shutdown(&self) -> Result<(), Error> {
    self.io_loop.wait()
  }

  // Frame plumbing shared with the channels and the io loop

  pub(crate) fn send_frame(
    &self,
    channel_id: u16,
    priority: Priority,
    frame: AMQPFrame,
    resolver: Option<WaitHandle<()>>,
    expected_reply: Option<Reply>,
  ) -> Result<(), Error> {
    if self.status.errored() || self.status.closed() {
      return Err(ErrorKind::InvalidConnectionState(self.status.state()).into());
    }
    trace!("channel {} send_frame", channel_id);
    self.frames.push(channel_id, priority, frame, resolver, expected_reply);
    self.wake();
    Ok(())
  }

  pub(crate) fn send_frames(&self, channel_id: u16, frames: Vec<AMQPFrame>, resolver: WaitHandle<()>) -> Result<(), Error> {
    if self.status.errored() || self.status.closed() {
      return Err(ErrorKind::InvalidConnectionState(self.status.state()).into());
    }
    trace!("channel {} send_frames", channel_id);
    self.frames.push_frames(channel_id, frames, resolver);
    self.wake();
    Ok(())
  }

  pub(crate) fn next_frame(&self) -> Option<QueuedFrame> {
    self.frames.pop()
  }

  pub(crate) fn requeue_frame(&self, frame: QueuedFrame) {
    self.frames.requeue(frame);
  }

  pub(crate) fn has_pending_frames(&self) -> bool {
    self.frames.has_pending()
  }

  pub(crate) fn next_expected_reply(&self, channel_id: u16) -> Option<Reply> {
    self.frames.next_expected_reply(channel_id)
  }

  pub(crate) fn has_expected_reply(&self, channel_id: u16) -> bool {
    self.frames.has_expected_reply(channel_id)
  }

  pub(crate) fn drop_channel_pending(&self, channel_id: u16, error: Error) {
    self.frames.drop_channel_pending(channel_id, error);
  }

  pub(crate) fn remove_channel(&self, channel_id: u16) -> Result<(), Error> {
    self.channels.remove(channel_id)
  }

  pub(crate) fn send_heartbeat(&self) {
    self.frames.push(0, Priority::Critical, AMQPFrame::Heartbeat(0), None, None);
  }

  pub(crate) fn resolve_flush_waiters(&self) {
    self.frames.resolve_flush_waiters();
  }

  pub(crate) fn set_io_loop(&self, handle: std::thread::JoinHandle<Result<(), Error>>) {
    self.io_loop.register(handle);
  }

  pub(crate) fn wake(&self) {
    let _ = self.set_readiness.set_readiness(Ready::readable());
  }

  // State transitions

  pub(crate) fn set_closed(&self, error: Error) {
    self.status.set_state(ConnectionState::Closed);
    // a 200 reply code is a normal closure, anything else ends the
    // channels with the reason
    let normal = match error.kind() {
      ErrorKind::ClientClosedConnection => true,
      ErrorKind::ServerClosedConnection(code, _) => *code == 200,
      _ => false,
    };
    if normal {
      self.channels.set_connection_closed(error.clone());
    } else {
      self.channels.set_connection_error(error.clone());
    }
    self.frames.drop_pending(error);
    self.wake();
  }

  pub(crate) fn set_error(&self, error: Error) {
    error!("connection error: {}", error);
    if let ConnectionState::SentProtocolHeader(wait_handle, ..)
    | ConnectionState::SentStartOk(wait_handle, ..)
    | ConnectionState::SentOpen(wait_handle) = self.status.state()
    {
      wait_handle.error(error.clone());
    }
    self.status.set_closing_reason(error.clone());
    self.status.set_state(ConnectionState::Error);
    self.channels.set_connection_error(error.clone());
    self.frames.drop_pending(error);
    self.wake();
  }

  /// We caught the server violating the protocol: send `connection.close`
  /// with the matching hard error and tear everything down once the
  /// server acknowledged.
  pub(crate) fn close_on_protocol_error(&self, error: AMQPError, class_id: ShortUInt, method_id: ShortUInt, text: &str) {
    error!("closing connection due to a protocol error: {}", text);
    let method = AMQPClass::Connection(protocol::connection::AMQPMethod::Close(protocol::connection::Close {
      reply_code: error.get_id(),
      reply_text: text.to_string().into(),
      class_id,
      method_id,
    }));
    self.status.set_closing_reason(ErrorKind::ProtocolError(error).into());
    self.status.set_state(ConnectionState::Closing);
    self.channels.set_connection_closing();
    let (_, wait_handle) = Wait::new();
    self.frames.push(
      0,
      Priority::Critical,
      AMQPFrame::Method(0, method),
      None,
      Some(Reply::AwaitingConnectionCloseOk(wait_handle)),
    );
    self.wake();
  }

  // Inbound frames

  pub(crate) fn handle_frame(&self, f: AMQPFrame) -> Result<(), Error> {
    trace!("will handle frame: {:?}", f);
    match f {
      AMQPFrame::ProtocolHeader => {
        // the server answers an unsupported version with its own header
        error!("the server rejected our protocol header");
        let error: Error = ErrorKind::InvalidProtocolVersion(0, 0).into();
        self.set_error(error.clone());
        Err(error)
      }
      AMQPFrame::Method(0, method) => self.handle_connection_method(method),
      AMQPFrame::Method(channel_id, method) => {
        if let Err(error) = self.channels.receive_method(channel_id, method) {
          // channel-level failures already tore the channel down
          debug!("channel {} error: {}", channel_id, error);
        }
        Ok(())
      }
      AMQPFrame::Heartbeat(_) => {
        debug!("received heartbeat from server");
        Ok(())
      }
      AMQPFrame::Header(0, ..) | AMQPFrame::Body(0, _) => {
        error!("received content frame on channel 0");
        let error: Error = ErrorKind::UnexpectedReply.into();
        self.set_error(error.clone());
        Err(error)
      }
      AMQPFrame::Header(channel_id, _, header) => {
        if let Err(error) = self
          .channels
          .handle_content_header_frame(channel_id, header.body_size, header.properties)
        {
          debug!("channel {} error: {}", channel_id, error);
        }
        Ok(())
      }
      AMQPFrame::Body(channel_id, payload) => {
        if let Err(error) = self.channels.handle_body_frame(channel_id, payload) {
          debug!("channel {} error: {}", channel_id, error);
        }
        Ok(())
      }
    }
  }

  fn handle_connection_method(&self, method: AMQPClass) -> Result<(), Error> {
    match method {
      AMQPClass::Connection(protocol::connection::AMQPMethod::Start(m))     => self.on_connection_start_received(m),
      AMQPClass::Connection(protocol::connection::AMQPMethod::Tune(m))      => self.on_connection_tune_received(m),
      AMQPClass::Connection(protocol::connection::AMQPMethod::OpenOk(m))    => self.on_connection_open_ok_received(m),
      AMQPClass::Connection(protocol::connection::AMQPMethod::Close(m))     => self.on_connection_close_received(m),
      AMQPClass::Connection(protocol::connection::AMQPMethod::CloseOk(_))   => self.on_connection_close_ok_received(),
      AMQPClass::Connection(protocol::connection::AMQPMethod::Blocked(m))   => self.on_connection_blocked_received(m),
      AMQPClass::Connection(protocol::connection::AMQPMethod::Unblocked(m)) => self.on_connection_unblocked_received(m),
      m => {
        error!("unexpected method on channel 0: {:?}", m);
        let error: Error = ErrorKind::InvalidConnectionState(self.status.state()).into();
        self.set_error(error.clone());
        Err(error)
      }
    }
  }

  fn invalid_connection_state(&self, state: ConnectionState) -> Result<(), Error> {
    error!("invalid connection state: {:?}", state);
    let error: Error = ErrorKind::InvalidConnectionState(state).into();
    self.set_error(error.clone());
    Err(error)
  }

  fn on_connection_start_received(&self, method: protocol::connection::Start) -> Result<(), Error> {
    trace!("server sent connection::Start: {:?}", method);
    let state = self.status.state();
    if let ConnectionState::SentProtocolHeader(wait_handle, credentials, mut options) = state {
      if method.version_major != 0 || method.version_minor != 9 {
        let error: Error = ErrorKind::InvalidProtocolVersion(method.version_major, method.version_minor).into();
        self.set_error(error.clone());
        return Err(error);
      }

      let mechanism = options.mechanism;
      let mechanism_str = mechanism.to_string();
      let locale = options.locale.clone();

      if !method.mechanisms.split_whitespace().any(|m| m == mechanism_str) {
        error!("unsupported mechanism: {}", mechanism_str);
      }
      if !method.locales.split_whitespace().any(|l| l == locale) {
        error!("unsupported locale: {}", locale);
      }

      // announce who we are, user-provided entries win
      let client_properties = &mut options.client_properties;
      if !client_properties.contains_key("product") {
        client_properties.insert("product".to_string().into(), AMQPValue::LongString(env!("CARGO_PKG_NAME").to_string().into()));
      }
      if !client_properties.contains_key("version") {
        client_properties.insert("version".to_string().into(), AMQPValue::LongString(env!("CARGO_PKG_VERSION").to_string().into()));
      }
      if !client_properties.contains_key("platform") {
        client_properties.insert("platform".to_string().into(), AMQPValue::LongString("rust".to_string().into()));
      }
      if !client_properties.contains_key("copyright") {
        client_properties.insert("copyright".to_string().into(), AMQPValue::LongString("MIT licensed".to_string().into()));
      }
      if !client_properties.contains_key("information") {
        client_properties.insert(
          "information".to_string().into(),
          AMQPValue::LongString(env!("CARGO_PKG_REPOSITORY").to_string().into()),
        );
      }

      let mut capabilities = FieldTable::default();
      capabilities.insert("publisher_confirms".to_string().into(), AMQPValue::Boolean(true));
      capabilities.insert("exchange_exchange_bindings".to_string().into(), AMQPValue::Boolean(true));
      capabilities.insert("basic.nack".to_string().into(), AMQPValue::Boolean(true));
      capabilities.insert("consumer_cancel_notify".to_string().into(), AMQPValue::Boolean(true));
      capabilities.insert("connection.blocked".to_string().into(), AMQPValue::Boolean(true));
      capabilities.insert("authentication_failure_close".to_string().into(), AMQPValue::Boolean(true));
      client_properties.insert("capabilities".to_string().into(), AMQPValue::FieldTable(capabilities));

      let start_ok = AMQPClass::Connection(protocol::connection::AMQPMethod::StartOk(protocol::connection::StartOk {
        client_properties: options.client_properties,
        mechanism: mechanism_str.into(),
        response: credentials.sasl_auth_string(mechanism).into(),
        locale: locale.into(),
      }));
      debug!("sending connection::StartOk");
      self.send_frame(0, Priority::Normal, AMQPFrame::Method(0, start_ok), None, None)?;
      self.status.set_state(ConnectionState::SentStartOk(wait_handle, credentials));
      Ok(())
    } else {
      self.invalid_connection_state(state)
    }
  }

  fn tune_connection_configuration(&self, channel_max: u16, frame_max: u32, heartbeat: u16) {
    // If we disable the heartbeat (0) but the server doesn't, follow it.
    // If both sides want heartbeat enabled, pick the lowest value.
    if self.configuration.heartbeat() == 0 || heartbeat != 0 && heartbeat < self.configuration.heartbeat() {
      self.configuration.set_heartbeat(heartbeat);
    }

    if channel_max != 0 {
      // 0 means we want to take the server's value
      // If both us and the server specified a channel_max, pick the lowest value.
      if self.configuration.channel_max() == 0 || channel_max < self.configuration.channel_max() {
        self.configuration.set_channel_max(channel_max);
      }
    }
    if self.configuration.channel_max() == 0 {
      self.configuration.set_channel_max(u16::max_value());
    }

    if frame_max != 0 {
      // 0 means we want to take the server's value
      // If both us and the server specified a frame_max, pick the lowest value.
      if self.configuration.frame_max() == 0 || frame_max < self.configuration.frame_max() {
        self.configuration.set_frame_max(frame_max);
      }
    }
    if self.configuration.frame_max() == 0 {
      self.configuration.set_frame_max(u32::max_value());
    }
  }

  fn on_connection_tune_received(&self, method: protocol::connection::Tune) -> Result<(), Error> {
    debug!("server sent connection::Tune: {:?}", method);
    let state = self.status.state();
    if let ConnectionState::SentStartOk(wait_handle, _) = state {
      self.tune_connection_configuration(method.channel_max, method.frame_max, method.heartbeat);

      let tune_ok = AMQPClass::Connection(protocol::connection::AMQPMethod::TuneOk(protocol::connection::TuneOk {
        channel_max: self.configuration.channel_max(),
        frame_max:   self.configuration.frame_max(),
        heartbeat:   self.configuration.heartbeat(),
      }));
      self.send_frame(0, Priority::Normal, AMQPFrame::Method(0, tune_ok), None, None)?;

      let open = AMQPClass::Connection(protocol::connection::AMQPMethod::Open(protocol::connection::Open {
        virtual_host: self.status.vhost().into(),
      }));
      self.send_frame(0, Priority::Normal, AMQPFrame::Method(0, open), None, None)?;
      self.status.set_state(ConnectionState::SentOpen(wait_handle));
      Ok(())
    } else {
      self.invalid_connection_state(state)
    }
  }

  fn on_connection_open_ok_received(&self, _method: protocol::connection::OpenOk) -> Result<(), Error> {
    let state = self.status.state();
    if let ConnectionState::SentOpen(wait_handle) = state {
      debug!("server sent connection::OpenOk, connection is now open");
      self.status.set_state(ConnectionState::Connected);
      wait_handle.finish(self.clone());
      Ok(())
    } else {
      self.invalid_connection_state(state)
    }
  }

  fn on_connection_close_received(&self, method: protocol::connection::Close) -> Result<(), Error> {
    if let Some(error) = AMQPError::from_id(method.reply_code) {
      error!(
        "connection closed by server {}:{} => {:?} => {}",
        method.class_id, method.method_id, error, method.reply_text
      );
    } else {
      info!("connection closed by server: {:?}", method);
    }
    let state = self.status.state();
    let error: Error = ErrorKind::ServerClosedConnection(method.reply_code, method.reply_text.to_string()).into();
    self.status.set_closing_reason(error.clone());
    self.status.set_state(ConnectionState::Closing);
    self.channels.set_connection_closing();

    // a close during the handshake is a refusal
    match state {
      ConnectionState::SentProtocolHeader(wait_handle, ..)
      | ConnectionState::SentStartOk(wait_handle, ..) => {
        wait_handle.error(ErrorKind::ConnectionRefused.into());
      }
      ConnectionState::SentOpen(wait_handle) => {
        wait_handle.error(ErrorKind::AccessRefused.into());
      }
      _ => {}
    }

    let close_ok = AMQPClass::Connection(protocol::connection::AMQPMethod::CloseOk(protocol::connection::CloseOk {}));
    self.frames.push(0, Priority::Critical, AMQPFrame::Method(0, close_ok), None, None);
    self.wake();
    // the io loop finishes the teardown once the close-ok was flushed
    Ok(())
  }

  fn on_connection_close_ok_received(&self) -> Result<(), Error> {
    let reason = self
      .status
      .closing_reason()
      .unwrap_or_else(|| ErrorKind::ClientClosedConnection.into());
    match self.next_expected_reply(0) {
      Some(Reply::AwaitingConnectionCloseOk(wait_handle)) => {
        self.set_closed(reason);
        wait_handle.finish(());
        Ok(())
      }
      _ => {
        warn!("received connection.close-ok without asking for it");
        self.set_closed(reason);
        Ok(())
      }
    }
  }

  fn on_connection_blocked_received(&self, method: protocol::connection::Blocked) -> Result<(), Error> {
    info!("connection blocked by server: {}", method.reason);
    self.status.block();
    Ok(())
  }

  fn on_connection_unblocked_received(&self, _method: protocol::connection::Unblocked) -> Result<(), Error> {
    info!("connection unblocked by server");
    self.status.unblock();
    self.wake();
    Ok(())
  }

  #[cfg(test)]
  pub(crate) fn channels(&self) -> &Channels {
    &self.channels
  }

  #[cfg(test)]
  pub(crate) fn frames(&self) -> &Frames {
    &self.frames
  }
}

impl Evented for Connection {
  fn register(&self, poll: &Poll, token: Token, interest: Ready, opts: PollOpt) -> io::Result<()> {
    self.registration.register(poll, token, interest, opts)
  }

  fn reregister(&self, poll: &Poll, token: Token, interest: Ready, opts: PollOpt) -> io::Result<()> {
    self.registration.reregister(poll, token, interest, opts)
  }

  fn deregister(&self, poll: &Poll) -> io::Result<()> {
    Evented::deregister(&*self.registration, poll)
  }
}

impl std::fmt::Debug for Connection {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Connection")
      .field("configuration", &self.configuration)
      .field("status", &self.status)
      .field("channels", &self.channels)
      .field("frames", &self.frames)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    channel_status::ChannelState,
    consumer::{Consumer, ConsumerEvent},
    options::*,
    queue::{Queue, QueueState},
    BasicProperties,
  };
  use amq_protocol::frame::AMQPContentHeader;
  use crossbeam_channel::unbounded;

  fn connected_connection() -> Connection {
    let _ = env_logger::try_init();
    let connection = Connection::new();
    connection.status().set_state(ConnectionState::Connected);
    connection.configuration().set_channel_max(2047);
    connection
  }

  fn open_channel(connection: &Connection) -> Channel {
    let channel = connection.channels().create(connection.clone(), None).unwrap();
    channel.set_state(ChannelState::Connected);
    channel
  }

  fn consuming_channel(connection: &Connection, queue: &str, consumer_tag: &str) -> (Channel, Consumer) {
    let channel = open_channel(connection);
    let mut queue_state: QueueState = Queue::new(queue.to_string(), 0, 0).into();
    let consumer = Consumer::new(consumer_tag.to_string());
    queue_state.register_consumer(consumer_tag.to_string(), consumer.clone());
    channel.register_queue(queue_state);
    (channel, consumer)
  }

  /// Simulates the io loop handing queued frames to the socket, which is
  /// when expected replies get registered.
  fn drain_wire(connection: &Connection) {
    while connection.frames().pop().is_some() {}
  }

  fn deliver_frame(channel_id: u16, consumer_tag: &str, queue: &str) -> AMQPFrame {
    AMQPFrame::Method(
      channel_id,
      AMQPClass::Basic(protocol::basic::AMQPMethod::Deliver(protocol::basic::Deliver {
        consumer_tag: consumer_tag.to_string(),
        delivery_tag: 1,
        redelivered:  false,
        exchange:     "".to_string(),
        routing_key:  queue.to_string(),
      })),
    )
  }

  fn header_frame(channel_id: u16, body_size: u64) -> AMQPFrame {
    AMQPFrame::Header(
      channel_id,
      60,
      Box::new(AMQPContentHeader {
        class_id:   60,
        weight:     0,
        body_size,
        properties: BasicProperties::default(),
      }),
    )
  }

  #[test]
  fn basic_consume_small_payload() {
    let connection = connected_connection();
    let (channel, consumer) = consuming_channel(&connection, "consumed", "consumer-tag");

    connection.handle_frame(deliver_frame(channel.id(), "consumer-tag", "consumed")).unwrap();
    assert_eq!(
      channel.status().state(),
      ChannelState::WillReceiveContent(Some("consumed".to_string()), Some("consumer-tag".to_string()))
    );

    connection.handle_frame(header_frame(channel.id(), 2)).unwrap();
    assert_eq!(
      channel.status().state(),
      ChannelState::ReceivingContent(Some("consumed".to_string()), Some("consumer-tag".to_string()), 2)
    );

    connection.handle_frame(AMQPFrame::Body(channel.id(), b"{}".to_vec())).unwrap();
    assert_eq!(channel.status().state(), ChannelState::Connected);

    let delivery = consumer.next_delivery().unwrap();
    assert_eq!(delivery.delivery_tag, 1);
    assert_eq!(delivery.data, b"{}".to_vec());
  }

  #[test]
  fn basic_consume_empty_payload() {
    let connection = connected_connection();
    let (channel, consumer) = consuming_channel(&connection, "consumed", "consumer-tag");

    connection.handle_frame(deliver_frame(channel.id(), "consumer-tag", "consumed")).unwrap();
    connection.handle_frame(header_frame(channel.id(), 0)).unwrap();
    assert_eq!(channel.status().state(), ChannelState::Connected);

    let delivery = consumer.next_delivery().unwrap();
    assert!(delivery.data.is_empty());
  }

  #[test]
  fn tune_negotiation_takes_the_min_or_the_other_side() {
    let _ = env_logger::try_init();
    let connection = Connection::new();
    let (_, wait_handle) = Wait::new();
    connection
      .status()
      .set_state(ConnectionState::SentStartOk(wait_handle, Credentials::default()));
    connection.configuration().set_channel_max(2047);
    connection.configuration().set_heartbeat(0);

    let tune = AMQPFrame::Method(
      0,
      AMQPClass::Connection(protocol::connection::AMQPMethod::Tune(protocol::connection::Tune {
        channel_max: 4095,
        frame_max:   0,
        heartbeat:   60,
      })),
    );
    connection.handle_frame(tune).unwrap();

    assert_eq!(connection.configuration().channel_max(), 2047);
    assert_eq!(connection.configuration().frame_max(), u32::max_value());
    assert_eq!(connection.configuration().heartbeat(), 60);
    let (_, dummy) = Wait::new();
    assert_eq!(connection.status().state(), ConnectionState::SentOpen(dummy));
  }

  #[test]
  fn tune_negotiation_both_zero_hits_the_cap() {
    let _ = env_logger::try_init();
    let connection = Connection::new();
    let (_, wait_handle) = Wait::new();
    connection
      .status()
      .set_state(ConnectionState::SentStartOk(wait_handle, Credentials::default()));

    let tune = AMQPFrame::Method(
      0,
      AMQPClass::Connection(protocol::connection::AMQPMethod::Tune(protocol::connection::Tune {
        channel_max: 0,
        frame_max:   0,
        heartbeat:   0,
      })),
    );
    connection.handle_frame(tune).unwrap();

    assert_eq!(connection.configuration().channel_max(), u16::max_value());
    assert_eq!(connection.configuration().frame_max(), u32::max_value());
    assert_eq!(connection.configuration().heartbeat(), 0);
  }

  #[test]
  fn synchronous_rpcs_serialize_on_the_wire() {
    let connection = connected_connection();
    let channel = open_channel(&connection);

    let first = channel.queue_declare("q1", QueueDeclareOptions::default(), FieldTable::default());
    let second = channel.queue_declare("q2", QueueDeclareOptions::default(), FieldTable::default());

    // only the head request may hit the wire
    assert!(connection.frames().pop().is_some());
    assert!(connection.frames().pop().is_none());
    assert!(first.try_wait().is_none());

    let declare_ok = AMQPFrame::Method(
      channel.id(),
      AMQPClass::Queue(protocol::queue::AMQPMethod::DeclareOk(protocol::queue::DeclareOk {
        queue:          "q1".to_string(),
        message_count:  0,
        consumer_count: 0,
      })),
    );
    connection.handle_frame(declare_ok).unwrap();
    let declared = first.try_wait().unwrap().unwrap();
    assert_eq!(declared.name(), "q1");

    // the reply released the second request
    assert!(connection.frames().pop().is_some());
    assert!(second.try_wait().is_none());
  }

  #[test]
  fn flow_gates_content_bearing_methods_only() {
    let connection = connected_connection();
    let channel = open_channel(&connection);

    let flow_off = AMQPFrame::Method(
      channel.id(),
      AMQPClass::Channel(protocol::channel::AMQPMethod::Flow(protocol::channel::Flow { active: false })),
    );
    connection.handle_frame(flow_off).unwrap();
    assert!(!channel.status().flow());

    let publish = channel.basic_publish(
      "",
      "q",
      BasicPublishOptions::default(),
      b"payload".to_vec(),
      BasicProperties::default(),
    );
    assert_eq!(publish.try_wait().unwrap().unwrap_err().kind(), &ErrorKind::Blocked);

    // non-content methods stay unaffected
    let declare = channel.queue_declare("q", QueueDeclareOptions::default(), FieldTable::default());
    assert!(declare.try_wait().is_none());

    let flow_on = AMQPFrame::Method(
      channel.id(),
      AMQPClass::Channel(protocol::channel::AMQPMethod::Flow(protocol::channel::Flow { active: true })),
    );
    connection.handle_frame(flow_on).unwrap();
    assert!(channel.status().flow());

    let publish = channel.basic_publish(
      "",
      "q",
      BasicPublishOptions::default(),
      b"payload".to_vec(),
      BasicProperties::default(),
    );
    assert!(publish.try_wait().is_none());
  }

  #[test]
  fn server_close_kills_only_that_channel() {
    let connection = connected_connection();
    let (channel_a, consumer) = consuming_channel(&connection, "q", "tag");
    let channel_b = open_channel(&connection);
    let (send, events) = unbounded();
    consumer.set_delegate(Box::new(send));
    assert_eq!(connection.channels().len(), 2);

    let close = AMQPFrame::Method(
      channel_a.id(),
      AMQPClass::Channel(protocol::channel::AMQPMethod::Close(protocol::channel::Close {
        reply_code: 406,
        reply_text: "PRECONDITION_FAILED".to_string(),
        class_id:   40,
        method_id:  10,
      })),
    );
    connection.handle_frame(close).unwrap();

    assert_eq!(connection.channels().len(), 1);
    assert_eq!(channel_a.status().state(), ChannelState::Error);
    assert_eq!(channel_b.status().state(), ChannelState::Connected);
    assert!(connection.status().connected());
    match events.try_recv() {
      Ok(ConsumerEvent::Error(error)) => {
        assert_eq!(error.kind(), &ErrorKind::ServerClosedChannel(406, "PRECONDITION_FAILED".to_string()));
      }
      other => panic!("expected an error event, got {:?}", other),
    }
  }

  #[test]
  fn connection_method_on_channel_promotes_to_hard_error() {
    let connection = connected_connection();
    let channel = open_channel(&connection);

    let bogus = AMQPFrame::Method(
      channel.id(),
      AMQPClass::Connection(protocol::connection::AMQPMethod::Blocked(protocol::connection::Blocked {
        reason: "".to_string(),
      })),
    );
    connection.handle_frame(bogus).unwrap();
    assert!(connection.status().closing());
  }

  #[test]
  fn server_connection_close_tears_everything_down() {
    let connection = connected_connection();
    let (channel_a, consumer) = consuming_channel(&connection, "q", "tag");
    let channel_b = open_channel(&connection);
    let (send, events) = unbounded();
    consumer.set_delegate(Box::new(send));

    let close = AMQPFrame::Method(
      0,
      AMQPClass::Connection(protocol::connection::AMQPMethod::Close(protocol::connection::Close {
        reply_code: 540,
        reply_text: "NOT_IMPLEMENTED".to_string(),
        class_id:   60,
        method_id:  10,
      })),
    );
    connection.handle_frame(close).unwrap();
    // every channel sees the closure before the connection terminates
    assert!(connection.status().closing());
    assert!(channel_a.status().closing());
    assert!(channel_b.status().closing());

    // the io loop reports the close-ok as flushed and finishes the teardown
    let reason = connection.status().closing_reason().unwrap();
    connection.set_closed(reason);
    assert_eq!(connection.channels().len(), 0);
    match events.try_recv() {
      Ok(ConsumerEvent::Error(error)) => {
        assert_eq!(error.kind(), &ErrorKind::ServerClosedConnection(540, "NOT_IMPLEMENTED".to_string()));
      }
      other => panic!("expected an error event, got {:?}", other),
    }
  }

  #[test]
  fn close_on_a_closing_channel_reports_the_state() {
    let connection = connected_connection();
    let channel = open_channel(&connection);
    channel.set_state(ChannelState::Closing);
    let res = channel.close(200, "bye");
    assert_eq!(res.unwrap_err().kind(), &ErrorKind::InvalidChannelState(ChannelState::Closing));
  }

  #[test]
  fn confirm_select_then_publish_tracks_seqnos() {
    let connection = connected_connection();
    let channel = open_channel(&connection);

    let select = channel.confirm_select(ConfirmSelectOptions::default());
    drain_wire(&connection);
    let select_ok = AMQPFrame::Method(
      channel.id(),
      AMQPClass::Confirm(protocol::confirm::AMQPMethod::SelectOk(protocol::confirm::SelectOk {})),
    );
    connection.handle_frame(select_ok).unwrap();
    select.try_wait().unwrap().unwrap();
    assert!(channel.status().confirm());
    assert_eq!(channel.next_publish_seqno(), 1);

    for payload in &[&b"a"[..], b"b", b"c"] {
      channel
        .basic_publish("", "q", BasicPublishOptions::default(), payload.to_vec(), BasicProperties::default())
        .try_wait();
    }
    assert_eq!(channel.next_publish_seqno(), 4);
    assert_eq!(channel.acknowledgements().unconfirmed(), vec![1, 2, 3]);

    let ack = AMQPFrame::Method(
      channel.id(),
      AMQPClass::Basic(protocol::basic::AMQPMethod::Ack(protocol::basic::Ack {
        delivery_tag: 3,
        multiple:     true,
      })),
    );
    connection.handle_frame(ack).unwrap();
    assert!(channel.acknowledgements().unconfirmed().is_empty());
    assert_eq!(channel.wait_for_confirms(None).unwrap(), true);
  }

  #[test]
  fn anonymous_consume_binds_the_server_tag() {
    let connection = connected_connection();
    let channel = open_channel(&connection);
    channel
      .queue_declare("q", QueueDeclareOptions::default(), FieldTable::default())
      .try_wait();
    drain_wire(&connection);
    let declare_ok = AMQPFrame::Method(
      channel.id(),
      AMQPClass::Queue(protocol::queue::AMQPMethod::DeclareOk(protocol::queue::DeclareOk {
        queue:          "q".to_string(),
        message_count:  0,
        consumer_count: 0,
      })),
    );
    connection.handle_frame(declare_ok).unwrap();

    let pending = channel.basic_consume("q", "", BasicConsumeOptions::default(), FieldTable::default());
    drain_wire(&connection);
    let consume_ok = AMQPFrame::Method(
      channel.id(),
      AMQPClass::Basic(protocol::basic::AMQPMethod::ConsumeOk(protocol::basic::ConsumeOk {
        consumer_tag: "amq.ctag-1".to_string(),
      })),
    );
    connection.handle_frame(consume_ok).unwrap();

    let consumer = pending.try_wait().unwrap().unwrap();
    assert_eq!(consumer.tag(), "amq.ctag-1");
    assert!(channel.has_consumer("amq.ctag-1"));
  }

  #[test]
  fn large_payloads_split_at_frame_max_minus_overhead() {
    let connection = connected_connection();
    connection.configuration().set_frame_max(4104);
    let channel = open_channel(&connection);

    channel
      .basic_publish(
        "",
        "q",
        BasicPublishOptions::default(),
        vec![0u8; 9000],
        BasicProperties::default(),
      )
      .try_wait();

    let mut bodies = Vec::new();
    while let Some(queued) = connection.frames().pop() {
      if let AMQPFrame::Body(_, payload) = queued.frame {
        bodies.push(payload.len());
      }
    }
    assert_eq!(bodies, vec![4096, 4096, 808]);
  }

  #[test]
  fn duplicate_consumer_tag_is_rejected() {
    let connection = connected_connection();
    let (channel, _) = consuming_channel(&connection, "q", "tag");
    let res = channel.basic_consume("q", "tag", BasicConsumeOptions::default(), FieldTable::default());
    assert_eq!(
      res.try_wait().unwrap().unwrap_err().kind(),
      &ErrorKind::ConsumerTagAlreadyInUse("tag".to_string())
    );
  }
}
