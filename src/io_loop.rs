use amq_protocol::frame::{gen_frame, parse_frame, GenError, Offset};
use log::{error, trace, warn};
use mio::{Evented, Events, Poll, PollOpt, Ready, Registration, SetReadiness, Token};
use parking_lot::Mutex;

use std::{
  io::{self, Read, Write},
  sync::Arc,
  thread::{Builder as ThreadBuilder, JoinHandle},
  time::{Duration, Instant},
};

use crate::{
  buffer::Buffer,
  connection::Connection,
  connection_status::ConnectionState,
  error::{Error, ErrorKind},
};

const SOCKET:   Token = Token(1);
const DATA:     Token = Token(2);
const CONTINUE: Token = Token(3);

const FRAMES_STORAGE: usize = 32;

/// Cap on every single step of the AMQP handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub(crate) struct IoLoopHandle {
  handle: Arc<Mutex<Option<JoinHandle<Result<(), Error>>>>>,
}

impl Default for IoLoopHandle {
  fn default() -> Self {
    Self { handle: Arc::new(Mutex::new(None)) }
  }
}

impl IoLoopHandle {
  pub(crate) fn register(&self, handle: JoinHandle<Result<(), Error>>) {
    *self.handle.lock() = Some(handle);
  }

  pub(crate) fn wait(&self) -> Result<(), Error> {
    if let Some(handle) = self.handle.lock().take() {
      handle.join().unwrap_or_else(|_| Err(ErrorKind::Dropped.into()))?
    }
    Ok(())
  }
}

#[derive(Debug, PartialEq)]
enum Status {
  Initial,
  Setup,
  Stop,
}

pub(crate) struct IoLoop<T> {
  connection:     Connection,
  socket:         T,
  status:         Status,
  poll:           Poll,
  registration:   Registration,
  set_readiness:  SetReadiness,
  frame_size:     usize,
  receive_buffer: Buffer,
  send_buffer:    Buffer,
  can_write:      bool,
  can_read:       bool,
  has_data:       bool,
  started_at:     Instant,
  last_read:      Instant,
  last_write:     Instant,
}

impl<T: Evented + Read + Write + Send + 'static> IoLoop<T> {
  pub(crate) fn new(connection: Connection, socket: T) -> Result<Self, Error> {
    let frame_size = std::cmp::max(8192, connection.configuration().frame_max() as usize);
    let (registration, set_readiness) = Registration::new2();
    let now = Instant::now();
    let inner = Self {
      connection,
      socket,
      status:         Status::Initial,
      poll:           Poll::new().map_err(Error::from)?,
      registration,
      set_readiness,
      frame_size,
      receive_buffer: Buffer::with_capacity(FRAMES_STORAGE * frame_size),
      send_buffer:    Buffer::with_capacity(FRAMES_STORAGE * frame_size),
      can_write:      false,
      can_read:       false,
      has_data:       true,
      started_at:     now,
      last_read:      now,
      last_write:     now,
    };
    inner
      .poll
      .register(&inner.socket, SOCKET, Ready::readable() | Ready::writable(), PollOpt::edge())
      .map_err(Error::from)?;
    inner
      .poll
      .register(&inner.connection, DATA, Ready::readable(), PollOpt::edge())
      .map_err(Error::from)?;
    inner
      .poll
      .register(&inner.registration, CONTINUE, Ready::readable(), PollOpt::edge())
      .map_err(Error::from)?;
    Ok(inner)
  }

  fn ensure_setup(&mut self) {
    if self.status != Status::Setup && self.connection.status().connected() {
      let frame_max = self.connection.configuration().frame_max() as usize;
      self.frame_size = std::cmp::max(self.frame_size, frame_max);
      self.receive_buffer.grow(FRAMES_STORAGE * self.frame_size);
      self.send_buffer.grow(FRAMES_STORAGE * self.frame_size);
      self.status = Status::Setup;
    }
  }

  fn poll_timeout(&self) -> Option<Duration> {
    if self.connection.status().connecting() {
      return Some(Duration::from_secs(1));
    }
    let heartbeat = self.connection.configuration().heartbeat();
    if heartbeat != 0 {
      // wake at least twice per interval so both timers stay accurate
      Some(Duration::from_millis(u64::from(heartbeat) * 500))
    } else {
      None
    }
  }

  fn check_timers(&mut self) -> Result<(), Error> {
    if self.connection.status().connecting() && self.started_at.elapsed() >= HANDSHAKE_TIMEOUT {
      let error: Error = ErrorKind::HandshakeTimedOut.into();
      error!("AMQP handshake timed out");
      self.connection.set_error(error.clone());
      self.status = Status::Stop;
      return Err(error);
    }
    let heartbeat = self.connection.configuration().heartbeat();
    if heartbeat != 0 && self.connection.status().connected() {
      let interval = Duration::from_secs(u64::from(heartbeat));
      if self.last_read.elapsed() >= 2 * interval {
        let error: Error = ErrorKind::HeartbeatTimedOut.into();
        error!("no frame received for two heartbeat intervals");
        self.connection.set_error(error.clone());
        self.status = Status::Stop;
        return Err(error);
      }
      if self.last_write.elapsed() >= interval {
        trace!("nothing written for a heartbeat interval, sending heartbeat");
        self.connection.send_heartbeat();
        self.has_data = true;
        self.last_write = Instant::now();
      }
    }
    Ok(())
  }

  fn wants_to_write(&self) -> bool {
    self.can_write && self.has_data
  }

  fn wants_to_read(&self) -> bool {
    self.can_read
  }

  fn should_continue(&self) -> bool {
    let connection_status = self.connection.status();
    (self.status == Status::Initial || connection_status.connected() || connection_status.closing())
      && self.status != Status::Stop
      && !connection_status.errored()
      && !connection_status.closed()
  }

  pub(crate) fn run(mut self) -> Result<(), Error> {
    let connection = self.connection.clone();
    connection.set_io_loop(
      ThreadBuilder::new()
        .name("io_loop".to_owned())
        .spawn(move || {
          let mut events = Events::with_capacity(1024);
          while self.should_continue() {
            self.do_run(&mut events)?;
          }
          Ok(())
        })
        .map_err(Error::from)?,
    );
    Ok(())
  }

  fn do_run(&mut self, events: &mut Events) -> Result<(), Error> {
    trace!("io_loop run");
    self.ensure_setup();
    self
      .poll
      .poll(events, self.poll_timeout())
      .map_err(Error::from)?;
    for event in events.iter() {
      match event.token() {
        SOCKET => {
          if event.readiness().is_readable() {
            self.can_read = true;
          }
          if event.readiness().is_writable() {
            self.can_write = true;
          }
        }
        DATA => self.has_data = true,
        _ => {}
      }
    }
    self.check_timers()?;

    trace!(
      "io_loop do_run; can_read={}, can_write={}, has_data={}",
      self.can_read,
      self.can_write,
      self.has_data
    );
    loop {
      if self.wants_to_write() && !self.connection.status().blocked() {
        self.write_to_stream()?;
        self.send_buffer.shift_unless_available(self.frame_size);
      }
      if !self.connection.has_pending_frames() && self.send_buffer.available_data() == 0 {
        self.connection.resolve_flush_waiters();
        self.check_finish_closing();
      }
      if self.connection.status().closed() {
        self.status = Status::Stop;
      }
      if self.should_continue() && self.wants_to_read() {
        self.read_from_stream()?;
        self.receive_buffer.shift_unless_available(self.frame_size);
      }
      if self.can_parse() {
        self.parse()?;
      }
      if !self.wants_to_read() || !self.wants_to_write() || self.status == Status::Stop || self.connection.status().errored() {
        if self.status != Status::Stop && (self.wants_to_read() || self.can_parse() || self.has_data) {
          trace!("io_loop send continue");
          self
            .set_readiness
            .set_readiness(Ready::readable())
            .map_err(Error::from)?;
        }
        break;
      }
    }
    trace!("io_loop do_run done; status={:?}", self.status);
    Ok(())
  }

  /// A server-initiated close finishes once our `connection.close-ok`
  /// left the send buffer.
  fn check_finish_closing(&mut self) {
    if !self.connection.status().closing() {
      return;
    }
    if let Some(reason) = self.connection.status().closing_reason() {
      if let ErrorKind::ServerClosedConnection(..) = reason.kind() {
        self.connection.set_closed(reason);
        self.status = Status::Stop;
      }
    }
  }

  fn can_parse(&self) -> bool {
    self.receive_buffer.available_data() > 0
  }

  fn write_to_stream(&mut self) -> Result<(), Error> {
    self.serialize()?;

    match self.socket.write(self.send_buffer.data()) {
      Ok(sz) => {
        trace!("wrote {} bytes", sz);
        self.send_buffer.consume(sz);
        if sz > 0 {
          self.last_write = Instant::now();
        }
        Ok(())
      }
      Err(e) => {
        if e.kind() == io::ErrorKind::WouldBlock {
          self.can_write = false;
          Ok(())
        } else {
          error!("error writing: {:?}", e);
          let error = Error::from(e);
          self.connection.set_error(error.clone());
          self.status = Status::Stop;
          Err(error)
        }
      }
    }
  }

  fn read_from_stream(&mut self) -> Result<(), Error> {
    match self.socket.read(self.receive_buffer.space()) {
      Ok(0) => {
        if self.receive_buffer.available_space() > 0 {
          self.handle_socket_closed()
        } else {
          Ok(())
        }
      }
      Ok(sz) => {
        trace!("read {} bytes", sz);
        self.receive_buffer.fill(sz);
        self.last_read = Instant::now();
        Ok(())
      }
      Err(e) => {
        if e.kind() == io::ErrorKind::WouldBlock {
          self.can_read = false;
          Ok(())
        } else {
          error!("error reading: {:?}", e);
          let error = Error::from(e);
          self.connection.set_error(error.clone());
          self.status = Status::Stop;
          Err(error)
        }
      }
    }
  }

  /// Reading zero bytes means the server hung up on us; what that means
  /// depends on how far we got.
  fn handle_socket_closed(&mut self) -> Result<(), Error> {
    self.status = Status::Stop;
    let error: Error = match self.connection.status().state() {
      ConnectionState::SentProtocolHeader(..) => ErrorKind::ConnectionRefused.into(),
      ConnectionState::SentStartOk(..)        => ErrorKind::AuthenticationFailure.into(),
      ConnectionState::SentOpen(..)           => ErrorKind::AccessRefused.into(),
      ConnectionState::Closing | ConnectionState::Closed => {
        // expected once the close handshake went through
        let reason = self
          .connection
          .status()
          .closing_reason()
          .unwrap_or_else(|| ErrorKind::ClientClosedConnection.into());
        self.connection.set_closed(reason);
        return Ok(());
      }
      _ => ErrorKind::UnexpectedSocketClose.into(),
    };
    warn!("socket closed: {}", error);
    self.connection.set_error(error.clone());
    Err(error)
  }

  fn serialize(&mut self) -> Result<(), Error> {
    if let Some(queued) = self.connection.next_frame() {
      trace!("will write to buffer: {:?}", queued.frame);
      match gen_frame(self.send_buffer.space(), &queued.frame).map(|tup| tup.0) {
        Ok(sz) => {
          self.send_buffer.fill(sz);
          if let Some(resolver) = queued.resolver {
            resolver.finish(());
          }
          Ok(())
        }
        Err(e) => match e {
          GenError::BufferTooSmall(_) => {
            // requeue the frame and free room in the buffer
            self.connection.requeue_frame(queued);
            self.send_buffer.shift();
            Ok(())
          }
          e => {
            error!("error generating frame: {:?}", e);
            let error: Error = ErrorKind::SerialisationError(format!("{:?}", e)).into();
            self.connection.set_error(error.clone());
            self.status = Status::Stop;
            Err(error)
          }
        },
      }
    } else {
      self.has_data = false;
      Ok(())
    }
  }

  fn parse(&mut self) -> Result<(), Error> {
    match parse_frame(self.receive_buffer.data()) {
      Ok((i, f)) => {
        let consumed = self.receive_buffer.data().offset(i);
        self.receive_buffer.consume(consumed);

        // frame handling failures are handled where they happen; a
        // connection-fatal one flips the status and stops the loop
        if let Err(e) = self.connection.handle_frame(f) {
          trace!("error handling frame: {}", e);
        }
        Ok(())
      }
      Err(e) => {
        if e.is_incomplete() {
          self.receive_buffer.shift();
          Ok(())
        } else {
          error!("parse error: {:?}", e);
          let error: Error = ErrorKind::ParsingError(format!("{:?}", e)).into();
          self.connection.set_error(error.clone());
          self.status = Status::Stop;
          Err(error)
        }
      }
    }
  }
}
