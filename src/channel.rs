use amq_protocol::frame::{AMQPContentHeader, AMQPFrame};
use log::{error, info, trace, warn};

use std::time::Duration;

use crate::{
  acknowledgement::{Acknowledgements, ConfirmHandler, DeliveryTag},
  channel_status::{ChannelState, ChannelStatus, FlowHandler},
  confirmation::Confirmation,
  connection::Connection,
  consumer::Consumer,
  error::{Error, ErrorKind},
  frames::Priority,
  id_sequence::IdSequence,
  message::{BasicGetMessage, BasicReturnMessage, Delivery},
  options::*,
  protocol::{self, AMQPClass, AMQPError, AMQPHardError, AMQPSoftError},
  queue::Queue,
  queues::Queues,
  returned_messages::{ReturnedMessageHandler, ReturnedMessages},
  types::*,
  wait::{Wait, WaitHandle},
  BasicProperties,
};

#[cfg(test)]
use crate::queue::QueueState;

/// How long a local close waits for `channel.close-ok` before giving up
/// and closing the channel on its own.
const CLOSE_OK_TIMEOUT: Duration = Duration::from_secs(3);

/// Reply a channel is waiting for, queued in wire order.
#[derive(Debug)]
pub(crate) enum Reply {
  AwaitingChannelOpenOk(WaitHandle<Channel>, Channel),
  AwaitingChannelFlowOk(WaitHandle<Boolean>),
  AwaitingChannelCloseOk(WaitHandle<()>),
  AwaitingExchangeDeclareOk(WaitHandle<()>),
  AwaitingExchangeDeleteOk(WaitHandle<()>),
  AwaitingExchangeBindOk(WaitHandle<()>),
  AwaitingExchangeUnbindOk(WaitHandle<()>),
  AwaitingQueueDeclareOk(WaitHandle<Queue>),
  AwaitingQueueBindOk(WaitHandle<()>),
  AwaitingQueuePurgeOk(WaitHandle<LongUInt>),
  AwaitingQueueDeleteOk(WaitHandle<LongUInt>, ShortString),
  AwaitingQueueUnbindOk(WaitHandle<()>),
  AwaitingBasicQosOk(WaitHandle<()>),
  AwaitingBasicConsumeOk(WaitHandle<Consumer>, ShortString, ShortString, Consumer),
  AwaitingBasicCancelOk(WaitHandle<()>, ShortString),
  AwaitingBasicGetOk(WaitHandle<Option<BasicGetMessage>>, ShortString),
  AwaitingBasicRecoverOk(WaitHandle<()>),
  AwaitingTxSelectOk(WaitHandle<()>),
  AwaitingTxCommitOk(WaitHandle<()>),
  AwaitingTxRollbackOk(WaitHandle<()>),
  AwaitingConfirmSelectOk(WaitHandle<()>),
  AwaitingConnectionCloseOk(WaitHandle<()>),
}

impl Reply {
  pub(crate) fn error(self, error: Error) {
    match self {
      Reply::AwaitingChannelOpenOk(handle, _)   => handle.error(error),
      Reply::AwaitingChannelFlowOk(handle)      => handle.error(error),
      Reply::AwaitingChannelCloseOk(handle)     => handle.error(error),
      Reply::AwaitingExchangeDeclareOk(handle)  => handle.error(error),
      Reply::AwaitingExchangeDeleteOk(handle)   => handle.error(error),
      Reply::AwaitingExchangeBindOk(handle)     => handle.error(error),
      Reply::AwaitingExchangeUnbindOk(handle)   => handle.error(error),
      Reply::AwaitingQueueDeclareOk(handle)     => handle.error(error),
      Reply::AwaitingQueueBindOk(handle)        => handle.error(error),
      Reply::AwaitingQueuePurgeOk(handle)       => handle.error(error),
      Reply::AwaitingQueueDeleteOk(handle, _)   => handle.error(error),
      Reply::AwaitingQueueUnbindOk(handle)      => handle.error(error),
      Reply::AwaitingBasicQosOk(handle)         => handle.error(error),
      Reply::AwaitingBasicConsumeOk(handle, ..) => handle.error(error),
      Reply::AwaitingBasicCancelOk(handle, _)   => handle.error(error),
      Reply::AwaitingBasicGetOk(handle, _)      => handle.error(error),
      Reply::AwaitingBasicRecoverOk(handle)     => handle.error(error),
      Reply::AwaitingTxSelectOk(handle)         => handle.error(error),
      Reply::AwaitingTxCommitOk(handle)         => handle.error(error),
      Reply::AwaitingTxRollbackOk(handle)       => handle.error(error),
      Reply::AwaitingConfirmSelectOk(handle)    => handle.error(error),
      Reply::AwaitingConnectionCloseOk(handle)  => handle.error(error),
    }
  }
}

/// A single AMQP channel multiplexed over a [`Connection`].
///
/// Obtained from [`Connection::create_channel`]. Synchronous AMQP methods
/// return a [`Confirmation`] resolved with the server reply; asynchronous
/// ones resolve once the frames reached the send buffer.
///
/// [`Connection`]: ./struct.Connection.html
/// [`Connection::create_channel`]: ./struct.Connection.html#method.create_channel
/// [`Confirmation`]: ./struct.Confirmation.html
#[derive(Clone, Debug)]
pub struct Channel {
  id:                u16,
  connection:        Connection,
  status:            ChannelStatus,
  acknowledgements:  Acknowledgements,
  delivery_tag:      IdSequence<DeliveryTag>,
  queues:            Queues,
  returned_messages: ReturnedMessages,
}

impl Channel {
  pub(crate) fn new(channel_id: u16, connection: Connection) -> Channel {
    Channel {
      id:                channel_id,
      connection,
      status:            ChannelStatus::default(),
      acknowledgements:  Acknowledgements::default(),
      delivery_tag:      IdSequence::new(false),
      queues:            Queues::default(),
      returned_messages: ReturnedMessages::default(),
    }
  }

  pub fn status(&self) -> &ChannelStatus {
    &self.status
  }

  pub fn id(&self) -> u16 {
    self.id
  }

  pub(crate) fn set_state(&self, state: ChannelState) {
    self.status.set_state(state);
  }

  pub(crate) fn set_closing(&self) {
    self.set_state(ChannelState::Closing);
  }

  pub(crate) fn set_closed(&self) -> Result<(), Error> {
    self.set_state(ChannelState::Closed);
    self.shutdown(ErrorKind::ClientClosedChannel.into(), true);
    self.connection.remove_channel(self.id)
  }

  pub(crate) fn set_error(&self, error: Error) -> Result<(), Error> {
    self.set_state(ChannelState::Error);
    self.shutdown(error, false);
    self.connection.remove_channel(self.id)
  }

  /// Teardown driven by the connection going away; the channel is already
  /// out of the registry.
  pub(crate) fn connection_closed(&self, error: Error) {
    self.set_state(ChannelState::Closed);
    self.acknowledgements.on_channel_error(error);
    self.queues.cancel_consumers();
  }

  pub(crate) fn connection_error(&self, error: Error) {
    self.set_state(ChannelState::Error);
    self.acknowledgements.on_channel_error(error.clone());
    self.queues.error_consumers(error);
  }

  fn shutdown(&self, error: Error, normal: bool) {
    self.connection.drop_channel_pending(self.id, error.clone());
    self.acknowledgements.on_channel_error(error.clone());
    if normal {
      self.queues.cancel_consumers();
    } else {
      self.queues.error_consumers(error);
    }
  }

  /// Closes the channel and waits for `channel.close-ok`, up to 3
  /// seconds. Calling it on a closing or closed channel reports the
  /// state and does nothing.
  pub fn close(&self, reply_code: ShortUInt, reply_text: &str) -> Result<(), Error> {
    if !self.status.connected() {
      return Err(ErrorKind::InvalidChannelState(self.status.state()).into());
    }
    self.do_channel_close(reply_code, reply_text, 0, 0)
  }

  fn do_channel_close(
    &self,
    reply_code: ShortUInt,
    reply_text: &str,
    class_id: ShortUInt,
    method_id: ShortUInt,
  ) -> Result<(), Error> {
    let method = AMQPClass::Channel(protocol::channel::AMQPMethod::Close(protocol::channel::Close {
      reply_code,
      reply_text: reply_text.to_string().into(),
      class_id,
      method_id,
    }));
    let (wait, wait_handle) = Wait::new();
    self.set_closing();
    self.send_method_frame(Priority::Normal, method, None, Some(Reply::AwaitingChannelCloseOk(wait_handle)))?;
    match wait.wait_timeout(CLOSE_OK_TIMEOUT) {
      Some(res) => res,
      None => {
        warn!("channel {} timed out waiting for channel.close-ok, closing anyway", self.id);
        self.set_closed()
      }
    }
  }

  // Send plumbing

  pub(crate) fn send_method_frame(
    &self,
    priority: Priority,
    method: AMQPClass,
    resolver: Option<WaitHandle<()>>,
    expected_reply: Option<Reply>,
  ) -> Result<(), Error> {
    self
      .connection
      .send_frame(self.id, priority, AMQPFrame::Method(self.id, method), resolver, expected_reply)
  }

  fn send_method_frame_with_body(
    &self,
    method: AMQPClass,
    payload: Vec<u8>,
    properties: BasicProperties,
    resolver: WaitHandle<()>,
  ) -> Result<(), Error> {
    let class_id = method.get_amqp_class_id();
    let header = AMQPContentHeader {
      class_id,
      weight:    0,
      body_size: payload.len() as u64,
      properties,
    };
    let frame_max = match self.connection.configuration().frame_max() {
      // not negotiated yet
      0         => 8192,
      frame_max => frame_max,
    };
    let mut frames = vec![
      AMQPFrame::Method(self.id, method),
      AMQPFrame::Header(self.id, class_id, Box::new(header)),
    ];
    // a content body frame has 8 bytes of overhead
    frames.extend(
      payload
        .chunks(frame_max as usize - 8)
        .map(|chunk| AMQPFrame::Body(self.id, chunk.to_vec())),
    );
    self.connection.send_frames(self.id, frames, resolver)
  }

  fn rpc<T, F: FnOnce(WaitHandle<T>) -> Reply>(&self, method: AMQPClass, reply: F) -> Confirmation<T> {
    if !self.status.connected() {
      return Confirmation::new_error(ErrorKind::InvalidChannelState(self.status.state()).into());
    }
    let (wait, wait_handle) = Wait::new();
    match self.send_method_frame(Priority::Normal, method, None, Some(reply(wait_handle))) {
      Ok(())     => Confirmation::new(wait),
      Err(error) => Confirmation::new_error(error),
    }
  }

  fn cast(&self, method: AMQPClass) -> Confirmation<()> {
    if !self.status.connected() {
      return Confirmation::new_error(ErrorKind::InvalidChannelState(self.status.state()).into());
    }
    let (wait, wait_handle) = Wait::new();
    match self.send_method_frame(Priority::Normal, method, Some(wait_handle), None) {
      Ok(())     => Confirmation::new(wait),
      Err(error) => Confirmation::new_error(error),
    }
  }

  // Channel class

  pub(crate) fn channel_open(&self, wait_handle: WaitHandle<Channel>) -> Result<(), Error> {
    if self.status.state() != ChannelState::Initial {
      return Err(ErrorKind::InvalidChannelState(self.status.state()).into());
    }
    let method = AMQPClass::Channel(protocol::channel::AMQPMethod::Open(protocol::channel::Open {}));
    self.send_method_frame(
      Priority::Normal,
      method,
      None,
      Some(Reply::AwaitingChannelOpenOk(wait_handle, self.clone())),
    )
  }

  /// Asks the server to pause (`active = false`) or resume deliveries to
  /// us; resolves with the active state the server acknowledged.
  pub fn channel_flow(&self, options: ChannelFlowOptions) -> Confirmation<Boolean> {
    let ChannelFlowOptions { active } = options;
    let method = AMQPClass::Channel(protocol::channel::AMQPMethod::Flow(protocol::channel::Flow { active }));
    self.rpc(method, Reply::AwaitingChannelFlowOk)
  }

  fn channel_flow_ok(&self, options: ChannelFlowOkOptions) -> Confirmation<()> {
    let ChannelFlowOkOptions { active } = options;
    // queued like a regular method so it lines up behind in-flight RPCs
    self.cast(AMQPClass::Channel(protocol::channel::AMQPMethod::FlowOk(
      protocol::channel::FlowOk { active },
    )))
  }

  // Exchange class

  pub fn exchange_declare(
    &self,
    exchange: &str,
    kind: &str,
    options: ExchangeDeclareOptions,
    arguments: FieldTable,
  ) -> Confirmation<()> {
    let ExchangeDeclareOptions { passive, durable, auto_delete, internal, nowait } = options;
    let method = AMQPClass::Exchange(protocol::exchange::AMQPMethod::Declare(protocol::exchange::Declare {
      exchange: exchange.to_string().into(),
      kind: kind.to_string().into(),
      passive,
      durable,
      auto_delete,
      internal,
      nowait,
      arguments,
    }));
    if nowait {
      self.cast(method)
    } else {
      self.rpc(method, Reply::AwaitingExchangeDeclareOk)
    }
  }

  pub fn exchange_delete(&self, exchange: &str, options: ExchangeDeleteOptions) -> Confirmation<()> {
    let ExchangeDeleteOptions { if_unused, nowait } = options;
    let method = AMQPClass::Exchange(protocol::exchange::AMQPMethod::Delete(protocol::exchange::Delete {
      exchange: exchange.to_string().into(),
      if_unused,
      nowait,
    }));
    if nowait {
      self.cast(method)
    } else {
      self.rpc(method, Reply::AwaitingExchangeDeleteOk)
    }
  }

  pub fn exchange_bind(
    &self,
    destination: &str,
    source: &str,
    routing_key: &str,
    options: ExchangeBindOptions,
    arguments: FieldTable,
  ) -> Confirmation<()> {
    let ExchangeBindOptions { nowait } = options;
    let method = AMQPClass::Exchange(protocol::exchange::AMQPMethod::Bind(protocol::exchange::Bind {
      destination: destination.to_string().into(),
      source: source.to_string().into(),
      routing_key: routing_key.to_string().into(),
      nowait,
      arguments,
    }));
    if nowait {
      self.cast(method)
    } else {
      self.rpc(method, Reply::AwaitingExchangeBindOk)
    }
  }

  pub fn exchange_unbind(
    &self,
    destination: &str,
    source: &str,
    routing_key: &str,
    options: ExchangeUnbindOptions,
    arguments: FieldTable,
  ) -> Confirmation<()> {
    let ExchangeUnbindOptions { nowait } = options;
    let method = AMQPClass::Exchange(protocol::exchange::AMQPMethod::Unbind(protocol::exchange::Unbind {
      destination: destination.to_string().into(),
      source: source.to_string().into(),
      routing_key: routing_key.to_string().into(),
      nowait,
      arguments,
    }));
    if nowait {
      self.cast(method)
    } else {
      self.rpc(method, Reply::AwaitingExchangeUnbindOk)
    }
  }

  // Queue class

  pub fn queue_declare(&self, queue: &str, options: QueueDeclareOptions, arguments: FieldTable) -> Confirmation<Queue> {
    let QueueDeclareOptions { passive, durable, exclusive, auto_delete, nowait } = options;
    let method = AMQPClass::Queue(protocol::queue::AMQPMethod::Declare(protocol::queue::Declare {
      queue: queue.to_string().into(),
      passive,
      durable,
      exclusive,
      auto_delete,
      nowait,
      arguments,
    }));
    if nowait {
      if !self.status.connected() {
        return Confirmation::new_error(ErrorKind::InvalidChannelState(self.status.state()).into());
      }
      let declared = Queue::new(queue.to_string().into(), 0, 0);
      self.queues.register(declared.clone().into());
      match self.send_method_frame(Priority::Normal, method, None, None) {
        Ok(())     => Confirmation::resolved(declared),
        Err(error) => Confirmation::new_error(error),
      }
    } else {
      self.rpc(method, Reply::AwaitingQueueDeclareOk)
    }
  }

  pub fn queue_bind(
    &self,
    queue: &str,
    exchange: &str,
    routing_key: &str,
    options: QueueBindOptions,
    arguments: FieldTable,
  ) -> Confirmation<()> {
    let QueueBindOptions { nowait } = options;
    let method = AMQPClass::Queue(protocol::queue::AMQPMethod::Bind(protocol::queue::Bind {
      queue: queue.to_string().into(),
      exchange: exchange.to_string().into(),
      routing_key: routing_key.to_string().into(),
      nowait,
      arguments,
    }));
    if nowait {
      self.cast(method)
    } else {
      self.rpc(method, Reply::AwaitingQueueBindOk)
    }
  }

  pub fn queue_unbind(&self, queue: &str, exchange: &str, routing_key: &str, arguments: FieldTable) -> Confirmation<()> {
    let method = AMQPClass::Queue(protocol::queue::AMQPMethod::Unbind(protocol::queue::Unbind {
      queue: queue.to_string().into(),
      exchange: exchange.to_string().into(),
      routing_key: routing_key.to_string().into(),
      arguments,
    }));
    self.rpc(method, Reply::AwaitingQueueUnbindOk)
  }

  pub fn queue_purge(&self, queue: &str, options: QueuePurgeOptions) -> Confirmation<LongUInt> {
    let QueuePurgeOptions { nowait } = options;
    let method = AMQPClass::Queue(protocol::queue::AMQPMethod::Purge(protocol::queue::Purge {
      queue: queue.to_string().into(),
      nowait,
    }));
    if nowait {
      if !self.status.connected() {
        return Confirmation::new_error(ErrorKind::InvalidChannelState(self.status.state()).into());
      }
      match self.send_method_frame(Priority::Normal, method, None, None) {
        Ok(())     => Confirmation::resolved(0),
        Err(error) => Confirmation::new_error(error),
      }
    } else {
      self.rpc(method, Reply::AwaitingQueuePurgeOk)
    }
  }

  pub fn queue_delete(&self, queue: &str, options: QueueDeleteOptions) -> Confirmation<LongUInt> {
    let QueueDeleteOptions { if_unused, if_empty, nowait } = options;
    let method = AMQPClass::Queue(protocol::queue::AMQPMethod::Delete(protocol::queue::Delete {
      queue: queue.to_string().into(),
      if_unused,
      if_empty,
      nowait,
    }));
    if nowait {
      if !self.status.connected() {
        return Confirmation::new_error(ErrorKind::InvalidChannelState(self.status.state()).into());
      }
      self.queues.deregister(queue);
      match self.send_method_frame(Priority::Normal, method, None, None) {
        Ok(())     => Confirmation::resolved(0),
        Err(error) => Confirmation::new_error(error),
      }
    } else {
      let queue = queue.to_string();
      self.rpc(method, |handle| Reply::AwaitingQueueDeleteOk(handle, queue.into()))
    }
  }

  // Basic class

  pub fn basic_qos(&self, options: BasicQosOptions) -> Confirmation<()> {
    let BasicQosOptions { prefetch_count, global, .. } = options;
    let method = AMQPClass::Basic(protocol::basic::AMQPMethod::Qos(protocol::basic::Qos {
      prefetch_count,
      global,
    }));
    self.rpc(method, Reply::AwaitingBasicQosOk)
  }

  /// Starts a subscription on `queue`.
  ///
  /// With an empty `consumer_tag` the server picks one; the returned
  /// [`Consumer`] learns it from `basic.consume-ok`. A client-chosen tag
  /// is registered before the round-trip so deliveries route even with
  /// `nowait`.
  ///
  /// [`Consumer`]: ./struct.Consumer.html
  pub fn basic_consume(
    &self,
    queue: &str,
    consumer_tag: &str,
    options: BasicConsumeOptions,
    arguments: FieldTable,
  ) -> Confirmation<Consumer> {
    if !self.status.connected() {
      return Confirmation::new_error(ErrorKind::InvalidChannelState(self.status.state()).into());
    }
    if !consumer_tag.is_empty() && self.queues.has_consumer(consumer_tag) {
      return Confirmation::new_error(ErrorKind::ConsumerTagAlreadyInUse(consumer_tag.to_string()).into());
    }
    let BasicConsumeOptions { no_local, no_ack, exclusive, nowait } = options;
    let method = AMQPClass::Basic(protocol::basic::AMQPMethod::Consume(protocol::basic::Consume {
      queue: queue.to_string().into(),
      consumer_tag: consumer_tag.to_string().into(),
      no_local,
      no_ack,
      exclusive,
      nowait,
      arguments,
    }));
    let consumer = Consumer::new(consumer_tag.to_string().into());
    if !consumer_tag.is_empty() {
      self.queues.register_consumer(queue, consumer_tag.to_string().into(), consumer.clone());
    }
    if nowait {
      match self.send_method_frame(Priority::Normal, method, None, None) {
        Ok(())     => Confirmation::resolved(consumer),
        Err(error) => Confirmation::new_error(error),
      }
    } else {
      let (wait, wait_handle) = Wait::new();
      let reply = Reply::AwaitingBasicConsumeOk(wait_handle, queue.to_string().into(), consumer_tag.to_string().into(), consumer);
      match self.send_method_frame(Priority::Normal, method, None, Some(reply)) {
        Ok(())     => Confirmation::new(wait),
        Err(error) => Confirmation::new_error(error),
      }
    }
  }

  pub fn basic_cancel(&self, consumer_tag: &str, options: BasicCancelOptions) -> Confirmation<()> {
    let BasicCancelOptions { nowait } = options;
    let method = AMQPClass::Basic(protocol::basic::AMQPMethod::Cancel(protocol::basic::Cancel {
      consumer_tag: consumer_tag.to_string().into(),
      nowait,
    }));
    if nowait {
      if let Some(consumer) = self.queues.deregister_consumer(consumer_tag) {
        consumer.cancel_ok();
      }
      self.cast(method)
    } else {
      let consumer_tag = consumer_tag.to_string();
      self.rpc(method, |handle| Reply::AwaitingBasicCancelOk(handle, consumer_tag.into()))
    }
  }

  /// Publishes `payload` to `exchange`. Content-bearing, so it is
  /// rejected while the server paused us with `channel.flow`.
  pub fn basic_publish(
    &self,
    exchange: &str,
    routing_key: &str,
    options: BasicPublishOptions,
    payload: Vec<u8>,
    properties: BasicProperties,
  ) -> Confirmation<()> {
    if !self.status.connected() {
      return Confirmation::new_error(ErrorKind::InvalidChannelState(self.status.state()).into());
    }
    if !self.status.flow() {
      warn!("channel {} is paused by channel.flow, dropping publish", self.id);
      return Confirmation::new_error(ErrorKind::Blocked.into());
    }
    let BasicPublishOptions { mandatory, immediate } = options;
    let method = AMQPClass::Basic(protocol::basic::AMQPMethod::Publish(protocol::basic::Publish {
      exchange: exchange.to_string().into(),
      routing_key: routing_key.to_string().into(),
      mandatory,
      immediate,
    }));
    if self.status.confirm() {
      let delivery_tag = self.delivery_tag.next();
      self.acknowledgements.register_pending(delivery_tag);
    }
    let (wait, wait_handle) = Wait::new();
    match self.send_method_frame_with_body(method, payload, properties, wait_handle) {
      Ok(())     => Confirmation::new(wait),
      Err(error) => Confirmation::new_error(error),
    }
  }

  pub fn basic_get(&self, queue: &str, options: BasicGetOptions) -> Confirmation<Option<BasicGetMessage>> {
    let BasicGetOptions { no_ack } = options;
    let method = AMQPClass::Basic(protocol::basic::AMQPMethod::Get(protocol::basic::Get {
      queue: queue.to_string().into(),
      no_ack,
    }));
    let queue = queue.to_string();
    self.rpc(method, |handle| Reply::AwaitingBasicGetOk(handle, queue.into()))
  }

  pub fn basic_ack(&self, delivery_tag: DeliveryTag, options: BasicAckOptions) -> Confirmation<()> {
    let BasicAckOptions { multiple } = options;
    let method = AMQPClass::Basic(protocol::basic::AMQPMethod::Ack(protocol::basic::Ack {
      delivery_tag,
      multiple,
    }));
    let res = self.cast(method);
    if multiple && delivery_tag == 0 {
      self.queues.drop_prefetched_messages();
    }
    res
  }

  pub fn basic_nack(&self, delivery_tag: DeliveryTag, options: BasicNackOptions) -> Confirmation<()> {
    let BasicNackOptions { multiple, requeue } = options;
    let method = AMQPClass::Basic(protocol::basic::AMQPMethod::Nack(protocol::basic::Nack {
      delivery_tag,
      multiple,
      requeue,
    }));
    let res = self.cast(method);
    if multiple && delivery_tag == 0 {
      self.queues.drop_prefetched_messages();
    }
    res
  }

  pub fn basic_reject(&self, delivery_tag: DeliveryTag, options: BasicRejectOptions) -> Confirmation<()> {
    let BasicRejectOptions { requeue } = options;
    self.cast(AMQPClass::Basic(protocol::basic::AMQPMethod::Reject(protocol::basic::Reject {
      delivery_tag,
      requeue,
    })))
  }

  pub fn basic_recover(&self, options: BasicRecoverOptions) -> Confirmation<()> {
    let BasicRecoverOptions { requeue } = options;
    self.rpc(
      AMQPClass::Basic(protocol::basic::AMQPMethod::Recover(protocol::basic::Recover { requeue })),
      Reply::AwaitingBasicRecoverOk,
    )
  }

  pub fn basic_recover_async(&self, options: BasicRecoverOptions) -> Confirmation<()> {
    let BasicRecoverOptions { requeue } = options;
    let res = self.cast(AMQPClass::Basic(protocol::basic::AMQPMethod::RecoverAsync(
      protocol::basic::RecoverAsync { requeue },
    )));
    self.queues.drop_prefetched_messages();
    res
  }

  // Confirm and Tx classes

  pub fn confirm_select(&self, options: ConfirmSelectOptions) -> Confirmation<()> {
    if self.status.confirm() {
      return Confirmation::resolved(());
    }
    let ConfirmSelectOptions { nowait } = options;
    let method = AMQPClass::Confirm(protocol::confirm::AMQPMethod::Select(protocol::confirm::Select { nowait }));
    if nowait {
      self.status.set_confirm();
      self.cast(method)
    } else {
      self.rpc(method, Reply::AwaitingConfirmSelectOk)
    }
  }

  pub fn tx_select(&self) -> Confirmation<()> {
    self.rpc(
      AMQPClass::Tx(protocol::tx::AMQPMethod::Select(protocol::tx::Select {})),
      Reply::AwaitingTxSelectOk,
    )
  }

  pub fn tx_commit(&self) -> Confirmation<()> {
    self.rpc(
      AMQPClass::Tx(protocol::tx::AMQPMethod::Commit(protocol::tx::Commit {})),
      Reply::AwaitingTxCommitOk,
    )
  }

  pub fn tx_rollback(&self) -> Confirmation<()> {
    self.rpc(
      AMQPClass::Tx(protocol::tx::AMQPMethod::Rollback(protocol::tx::Rollback {})),
      Reply::AwaitingTxRollbackOk,
    )
  }

  // Publisher confirms

  /// The sequence number the next confirmed publish will get.
  pub fn next_publish_seqno(&self) -> DeliveryTag {
    self.delivery_tag.current()
  }

  /// Blocks until every outstanding publish was confirmed.
  ///
  /// Returns `true` when only acks were received, `false` when the server
  /// nacked anything in the batch. A timed-out waiter is forgotten; a
  /// late confirm completes into nothing.
  pub fn wait_for_confirms(&self, timeout: Option<Duration>) -> Result<Boolean, Error> {
    if !self.status.confirm() {
      return Err(ErrorKind::NotInConfirmMode.into());
    }
    let (id, wait) = self.acknowledgements.register_waiter();
    match timeout {
      None          => wait.wait(),
      Some(timeout) => match wait.wait_timeout(timeout) {
        Some(res) => res,
        None      => {
          self.acknowledgements.forget_waiter(id);
          Err(ErrorKind::ConfirmsTimedOut.into())
        }
      },
    }
  }

  /// Messages the server handed back with `basic.return` since the last
  /// drain, oldest first.
  pub fn take_returned_messages(&self) -> Vec<BasicReturnMessage> {
    self.returned_messages.drain()
  }

  // Handler registration

  pub fn register_return_handler(&self, handler: Box<dyn ReturnedMessageHandler>) {
    self.returned_messages.register_handler(handler);
  }

  pub fn unregister_return_handler(&self) {
    self.returned_messages.unregister_handler();
  }

  pub fn register_confirm_handler(&self, handler: Box<dyn ConfirmHandler>) {
    self.acknowledgements.register_handler(handler);
  }

  pub fn unregister_confirm_handler(&self) {
    self.acknowledgements.unregister_handler();
  }

  pub fn register_flow_handler(&self, handler: Box<dyn FlowHandler>) {
    self.status.register_flow_handler(handler);
  }

  pub fn unregister_flow_handler(&self) {
    self.status.unregister_flow_handler();
  }

  // Inbound dispatch

  fn next_reply(&self) -> Option<Reply> {
    self.connection.next_expected_reply(self.id)
  }

  fn unexpected_reply(&self, reply: Option<Reply>, method: &str) -> Result<(), Error> {
    let error: Error = ErrorKind::UnexpectedReply.into();
    if let Some(reply) = reply {
      reply.error(error.clone());
    }
    error!("channel {} received an unexpected {}", self.id, method);
    self.set_error(error.clone())?;
    Err(error)
  }

  pub(crate) fn receive_method(&self, method: AMQPClass) -> Result<(), Error> {
    trace!("channel {} received {:?}", self.id, method);
    match method {
      AMQPClass::Channel(protocol::channel::AMQPMethod::OpenOk(m))  => self.on_channel_open_ok_received(m),
      AMQPClass::Channel(protocol::channel::AMQPMethod::Flow(m))    => self.on_channel_flow_received(m),
      AMQPClass::Channel(protocol::channel::AMQPMethod::FlowOk(m))  => self.on_channel_flow_ok_received(m),
      AMQPClass::Channel(protocol::channel::AMQPMethod::Close(m))   => self.on_channel_close_received(m),
      AMQPClass::Channel(protocol::channel::AMQPMethod::CloseOk(_)) => self.on_channel_close_ok_received(),

      AMQPClass::Exchange(protocol::exchange::AMQPMethod::DeclareOk(_)) => self.on_exchange_declare_ok_received(),
      AMQPClass::Exchange(protocol::exchange::AMQPMethod::DeleteOk(_))  => self.on_exchange_delete_ok_received(),
      AMQPClass::Exchange(protocol::exchange::AMQPMethod::BindOk(_))    => self.on_exchange_bind_ok_received(),
      AMQPClass::Exchange(protocol::exchange::AMQPMethod::UnbindOk(_))  => self.on_exchange_unbind_ok_received(),

      AMQPClass::Queue(protocol::queue::AMQPMethod::DeclareOk(m)) => self.on_queue_declare_ok_received(m),
      AMQPClass::Queue(protocol::queue::AMQPMethod::BindOk(_))    => self.on_queue_bind_ok_received(),
      AMQPClass::Queue(protocol::queue::AMQPMethod::PurgeOk(m))   => self.on_queue_purge_ok_received(m),
      AMQPClass::Queue(protocol::queue::AMQPMethod::DeleteOk(m))  => self.on_queue_delete_ok_received(m),
      AMQPClass::Queue(protocol::queue::AMQPMethod::UnbindOk(_))  => self.on_queue_unbind_ok_received(),

      AMQPClass::Basic(protocol::basic::AMQPMethod::QosOk(_))     => self.on_basic_qos_ok_received(),
      AMQPClass::Basic(protocol::basic::AMQPMethod::ConsumeOk(m)) => self.on_basic_consume_ok_received(m),
      AMQPClass::Basic(protocol::basic::AMQPMethod::CancelOk(m))  => self.on_basic_cancel_ok_received(m),
      AMQPClass::Basic(protocol::basic::AMQPMethod::Cancel(m))    => self.on_basic_cancel_received(m),
      AMQPClass::Basic(protocol::basic::AMQPMethod::Deliver(m))   => self.on_basic_deliver_received(m),
      AMQPClass::Basic(protocol::basic::AMQPMethod::GetOk(m))     => self.on_basic_get_ok_received(m),
      AMQPClass::Basic(protocol::basic::AMQPMethod::GetEmpty(m))  => self.on_basic_get_empty_received(m),
      AMQPClass::Basic(protocol::basic::AMQPMethod::Ack(m))       => self.on_basic_ack_received(m),
      AMQPClass::Basic(protocol::basic::AMQPMethod::Nack(m))      => self.on_basic_nack_received(m),
      AMQPClass::Basic(protocol::basic::AMQPMethod::Return(m))    => self.on_basic_return_received(m),
      AMQPClass::Basic(protocol::basic::AMQPMethod::RecoverOk(_)) => self.on_basic_recover_ok_received(),

      AMQPClass::Confirm(protocol::confirm::AMQPMethod::SelectOk(_)) => self.on_confirm_select_ok_received(),

      AMQPClass::Tx(protocol::tx::AMQPMethod::SelectOk(_))   => self.on_tx_select_ok_received(),
      AMQPClass::Tx(protocol::tx::AMQPMethod::CommitOk(_))   => self.on_tx_commit_ok_received(),
      AMQPClass::Tx(protocol::tx::AMQPMethod::RollbackOk(_)) => self.on_tx_rollback_ok_received(),

      m @ AMQPClass::Connection(_) => {
        error!("connection method received on channel {}", self.id);
        let amqp_error = AMQPError::Hard(AMQPHardError::COMMANDINVALID);
        self.connection.close_on_protocol_error(
          amqp_error.clone(),
          m.get_amqp_class_id(),
          0,
          "connection method on non-zero channel",
        );
        Err(ErrorKind::ProtocolError(amqp_error).into())
      }

      m => {
        error!("the client should not receive {:?} on channel {}", m, self.id);
        self.unexpected_reply(None, "method")
      }
    }
  }

  fn on_channel_open_ok_received(&self, _method: protocol::channel::OpenOk) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingChannelOpenOk(wait_handle, channel)) => {
        self.set_state(ChannelState::Connected);
        wait_handle.finish(channel);
        Ok(())
      }
      reply => self.unexpected_reply(reply, "channel.open-ok"),
    }
  }

  fn on_channel_flow_received(&self, method: protocol::channel::Flow) -> Result<(), Error> {
    if self.status.closing() {
      return Ok(());
    }
    self.status.set_send_flow(method.active);
    // answered through the regular queue so in-flight RPCs stay ahead
    let _ = self.channel_flow_ok(ChannelFlowOkOptions { active: method.active });
    Ok(())
  }

  fn on_channel_flow_ok_received(&self, method: protocol::channel::FlowOk) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingChannelFlowOk(wait_handle)) => {
        // the server confirmed that we paused/resumed the receiving flow
        wait_handle.finish(method.active);
        Ok(())
      }
      reply => self.unexpected_reply(reply, "channel.flow-ok"),
    }
  }

  fn on_channel_close_received(&self, method: protocol::channel::Close) -> Result<(), Error> {
    if let Some(error) = AMQPError::from_id(method.reply_code) {
      error!(
        "channel {} closed by {}:{} => {:?} => {}",
        self.id, method.class_id, method.method_id, error, method.reply_text
      );
    } else {
      info!("channel {} closed: {:?}", self.id, method);
    }
    let simultaneous = self.status.closing();
    let close_ok = AMQPClass::Channel(protocol::channel::AMQPMethod::CloseOk(protocol::channel::CloseOk {}));
    self.connection.send_frame(
      self.id,
      Priority::Critical,
      AMQPFrame::Method(self.id, close_ok),
      None,
      None,
    )?;
    if simultaneous {
      // both sides raced a close; the close-ok answering ours is still
      // on its way and finishes the shutdown
      return Ok(());
    }
    if method.reply_code == 200 {
      self.set_closed()
    } else {
      self.set_error(ErrorKind::ServerClosedChannel(method.reply_code, method.reply_text.to_string()).into())
    }
  }

  fn on_channel_close_ok_received(&self) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingChannelCloseOk(wait_handle)) => {
        self.set_closed()?;
        wait_handle.finish(());
        Ok(())
      }
      reply => self.unexpected_reply(reply, "channel.close-ok"),
    }
  }

  fn on_exchange_declare_ok_received(&self) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingExchangeDeclareOk(wait_handle)) => {
        wait_handle.finish(());
        Ok(())
      }
      reply => self.unexpected_reply(reply, "exchange.declare-ok"),
    }
  }

  fn on_exchange_delete_ok_received(&self) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingExchangeDeleteOk(wait_handle)) => {
        wait_handle.finish(());
        Ok(())
      }
      reply => self.unexpected_reply(reply, "exchange.delete-ok"),
    }
  }

  fn on_exchange_bind_ok_received(&self) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingExchangeBindOk(wait_handle)) => {
        wait_handle.finish(());
        Ok(())
      }
      reply => self.unexpected_reply(reply, "exchange.bind-ok"),
    }
  }

  fn on_exchange_unbind_ok_received(&self) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingExchangeUnbindOk(wait_handle)) => {
        wait_handle.finish(());
        Ok(())
      }
      reply => self.unexpected_reply(reply, "exchange.unbind-ok"),
    }
  }

  fn on_queue_declare_ok_received(&self, method: protocol::queue::DeclareOk) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingQueueDeclareOk(wait_handle)) => {
        let queue = Queue::new(method.queue, method.message_count, method.consumer_count);
        self.queues.register(queue.clone().into());
        wait_handle.finish(queue);
        Ok(())
      }
      reply => self.unexpected_reply(reply, "queue.declare-ok"),
    }
  }

  fn on_queue_bind_ok_received(&self) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingQueueBindOk(wait_handle)) => {
        wait_handle.finish(());
        Ok(())
      }
      reply => self.unexpected_reply(reply, "queue.bind-ok"),
    }
  }

  fn on_queue_purge_ok_received(&self, method: protocol::queue::PurgeOk) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingQueuePurgeOk(wait_handle)) => {
        wait_handle.finish(method.message_count);
        Ok(())
      }
      reply => self.unexpected_reply(reply, "queue.purge-ok"),
    }
  }

  fn on_queue_delete_ok_received(&self, method: protocol::queue::DeleteOk) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingQueueDeleteOk(wait_handle, queue)) => {
        self.queues.deregister(&queue);
        wait_handle.finish(method.message_count);
        Ok(())
      }
      reply => self.unexpected_reply(reply, "queue.delete-ok"),
    }
  }

  fn on_queue_unbind_ok_received(&self) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingQueueUnbindOk(wait_handle)) => {
        wait_handle.finish(());
        Ok(())
      }
      reply => self.unexpected_reply(reply, "queue.unbind-ok"),
    }
  }

  fn on_basic_qos_ok_received(&self) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingBasicQosOk(wait_handle)) => {
        wait_handle.finish(());
        Ok(())
      }
      reply => self.unexpected_reply(reply, "basic.qos-ok"),
    }
  }

  fn on_basic_consume_ok_received(&self, method: protocol::basic::ConsumeOk) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingBasicConsumeOk(wait_handle, queue, tag, consumer)) => {
        if tag.is_empty() {
          consumer.set_tag(method.consumer_tag.clone());
          self.queues.register_consumer(&queue, method.consumer_tag, consumer.clone());
        } else if tag != method.consumer_tag {
          // the server renamed our tag; move the early registration
          self.queues.deregister_consumer(&tag);
          consumer.set_tag(method.consumer_tag.clone());
          self.queues.register_consumer(&queue, method.consumer_tag, consumer.clone());
        }
        consumer.on_consume_ok();
        wait_handle.finish(consumer);
        Ok(())
      }
      reply => self.unexpected_reply(reply, "basic.consume-ok"),
    }
  }

  fn on_basic_cancel_ok_received(&self, method: protocol::basic::CancelOk) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingBasicCancelOk(wait_handle, _)) => {
        if let Some(consumer) = self.queues.deregister_consumer(&method.consumer_tag) {
          consumer.cancel_ok();
        }
        wait_handle.finish(());
        Ok(())
      }
      reply => self.unexpected_reply(reply, "basic.cancel-ok"),
    }
  }

  fn on_basic_cancel_received(&self, method: protocol::basic::Cancel) -> Result<(), Error> {
    if self.status.closing() {
      return Ok(());
    }
    if let Some(consumer) = self.queues.deregister_consumer(&method.consumer_tag) {
      consumer.canceled_by_server();
    }
    if !method.nowait {
      let cancel_ok = AMQPClass::Basic(protocol::basic::AMQPMethod::CancelOk(protocol::basic::CancelOk {
        consumer_tag: method.consumer_tag,
      }));
      return self.cast(cancel_ok).as_error();
    }
    Ok(())
  }

  fn on_basic_deliver_received(&self, method: protocol::basic::Deliver) -> Result<(), Error> {
    if self.status.closing() {
      return Ok(());
    }
    let delivery = Delivery::new(
      method.delivery_tag,
      method.exchange,
      method.routing_key,
      method.redelivered,
    );
    if let Some(queue_name) = self.queues.start_consumer_delivery(&method.consumer_tag, delivery) {
      self
        .status
        .set_state(ChannelState::WillReceiveContent(Some(queue_name), Some(method.consumer_tag)));
    } else {
      warn!("channel {} got a delivery for unknown consumer {}", self.id, method.consumer_tag);
    }
    Ok(())
  }

  fn on_basic_get_ok_received(&self, method: protocol::basic::GetOk) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingBasicGetOk(wait_handle, queue)) => {
        self.queues.start_basic_get_delivery(
          &queue,
          BasicGetMessage::new(
            method.delivery_tag,
            method.exchange,
            method.routing_key,
            method.redelivered,
            method.message_count,
          ),
          wait_handle,
        );
        self.status.set_state(ChannelState::WillReceiveContent(Some(queue), None));
        Ok(())
      }
      reply => self.unexpected_reply(reply, "basic.get-ok"),
    }
  }

  fn on_basic_get_empty_received(&self, _method: protocol::basic::GetEmpty) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingBasicGetOk(wait_handle, _)) => {
        wait_handle.finish(None);
        Ok(())
      }
      reply => self.unexpected_reply(reply, "basic.get-empty"),
    }
  }

  fn on_basic_ack_received(&self, method: protocol::basic::Ack) -> Result<(), Error> {
    if self.status.closing() || !self.status.confirm() {
      return Ok(());
    }
    let res = if method.multiple {
      if method.delivery_tag > 0 {
        self.acknowledgements.ack_all_before(method.delivery_tag)
      } else {
        self.acknowledgements.ack_all_pending();
        Ok(())
      }
    } else {
      self.acknowledgements.ack(method.delivery_tag)
    };
    res.or_else(|err| self.bad_acknowledgement(err, method.get_amqp_class_id(), method.get_amqp_method_id()))
  }

  fn on_basic_nack_received(&self, method: protocol::basic::Nack) -> Result<(), Error> {
    if self.status.closing() || !self.status.confirm() {
      return Ok(());
    }
    let res = if method.multiple {
      if method.delivery_tag > 0 {
        self.acknowledgements.nack_all_before(method.delivery_tag)
      } else {
        self.acknowledgements.nack_all_pending();
        Ok(())
      }
    } else {
      self.acknowledgements.nack(method.delivery_tag)
    };
    res.or_else(|err| self.bad_acknowledgement(err, method.get_amqp_class_id(), method.get_amqp_method_id()))
  }

  fn bad_acknowledgement(&self, error: Error, class_id: ShortUInt, method_id: ShortUInt) -> Result<(), Error> {
    error!("channel {} got an acknowledgement for an unknown delivery tag, closing it", self.id);
    let code = AMQPError::Soft(AMQPSoftError::PRECONDITIONFAILED).get_id();
    self.do_channel_close(code, "precondition failed", class_id, method_id)?;
    Err(error)
  }

  fn on_basic_return_received(&self, method: protocol::basic::Return) -> Result<(), Error> {
    if self.status.closing() {
      return Ok(());
    }
    self.returned_messages.start_new_delivery(BasicReturnMessage::new(
      method.exchange,
      method.routing_key,
      method.reply_code,
      method.reply_text,
    ));
    self.status.set_state(ChannelState::WillReceiveContent(None, None));
    Ok(())
  }

  fn on_basic_recover_ok_received(&self) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingBasicRecoverOk(wait_handle)) => {
        self.queues.drop_prefetched_messages();
        wait_handle.finish(());
        Ok(())
      }
      reply => self.unexpected_reply(reply, "basic.recover-ok"),
    }
  }

  fn on_confirm_select_ok_received(&self) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingConfirmSelectOk(wait_handle)) => {
        self.status.set_confirm();
        wait_handle.finish(());
        Ok(())
      }
      reply => self.unexpected_reply(reply, "confirm.select-ok"),
    }
  }

  fn on_tx_select_ok_received(&self) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingTxSelectOk(wait_handle)) => {
        wait_handle.finish(());
        Ok(())
      }
      reply => self.unexpected_reply(reply, "tx.select-ok"),
    }
  }

  fn on_tx_commit_ok_received(&self) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingTxCommitOk(wait_handle)) => {
        wait_handle.finish(());
        Ok(())
      }
      reply => self.unexpected_reply(reply, "tx.commit-ok"),
    }
  }

  fn on_tx_rollback_ok_received(&self) -> Result<(), Error> {
    match self.next_reply() {
      Some(Reply::AwaitingTxRollbackOk(wait_handle)) => {
        wait_handle.finish(());
        Ok(())
      }
      reply => self.unexpected_reply(reply, "tx.rollback-ok"),
    }
  }

  // Content frames

  pub(crate) fn handle_content_header_frame(&self, size: u64, properties: BasicProperties) -> Result<(), Error> {
    if let ChannelState::WillReceiveContent(queue_name, consumer_tag) = self.status.state() {
      if size > 0 {
        self
          .status
          .set_state(ChannelState::ReceivingContent(queue_name.clone(), consumer_tag.clone(), size as usize));
      } else {
        self.status.set_state(ChannelState::Connected);
      }
      if let Some(queue_name) = queue_name {
        self.queues.handle_content_header_frame(&queue_name, consumer_tag, size, properties);
      } else {
        self.returned_messages.set_delivery_properties(properties);
        if size == 0 {
          self.returned_messages.new_delivery_complete();
        }
      }
      Ok(())
    } else {
      self.handle_unexpected_frame("unexpected content header frame")
    }
  }

  pub(crate) fn handle_body_frame(&self, payload: Vec<u8>) -> Result<(), Error> {
    let payload_size = payload.len();

    if let ChannelState::ReceivingContent(queue_name, consumer_tag, remaining_size) = self.status.state() {
      if remaining_size >= payload_size {
        if let Some(queue_name) = queue_name.as_ref() {
          self
            .queues
            .handle_body_frame(queue_name, consumer_tag.clone(), remaining_size, payload_size, payload);
        } else {
          self.returned_messages.receive_delivery_content(payload);
          if remaining_size == payload_size {
            self.returned_messages.new_delivery_complete();
          }
        }
        if remaining_size == payload_size {
          self.status.set_state(ChannelState::Connected);
        } else {
          self
            .status
            .set_state(ChannelState::ReceivingContent(queue_name, consumer_tag, remaining_size - payload_size));
        }
        Ok(())
      } else {
        self.handle_unexpected_frame("body frame larger than announced content")
      }
    } else {
      self.handle_unexpected_frame("unexpected content body frame")
    }
  }

  fn handle_unexpected_frame(&self, text: &str) -> Result<(), Error> {
    error!("channel {}: {}", self.id, text);
    let amqp_error = AMQPError::Hard(AMQPHardError::UNEXPECTEDFRAME);
    self.connection.close_on_protocol_error(amqp_error.clone(), 0, 0, text);
    let error: Error = ErrorKind::ProtocolError(amqp_error).into();
    self.set_error(error.clone())?;
    Err(error)
  }

  #[cfg(test)]
  pub(crate) fn register_queue(&self, queue: QueueState) {
    self.queues.register(queue);
  }

  #[cfg(test)]
  pub(crate) fn acknowledgements(&self) -> &Acknowledgements {
    &self.acknowledgements
  }

  #[cfg(test)]
  pub(crate) fn has_consumer(&self, tag: &str) -> bool {
    self.queues.has_consumer(tag)
  }
}
