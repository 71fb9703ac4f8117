//! Option structs mirroring the bit fields of the AMQP methods.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelFlowOptions {
  pub active: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelFlowOkOptions {
  pub active: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExchangeDeclareOptions {
  pub passive:     bool,
  pub durable:     bool,
  pub auto_delete: bool,
  pub internal:    bool,
  pub nowait:      bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExchangeDeleteOptions {
  pub if_unused: bool,
  pub nowait:    bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExchangeBindOptions {
  pub nowait: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExchangeUnbindOptions {
  pub nowait: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueDeclareOptions {
  pub passive:     bool,
  pub durable:     bool,
  pub exclusive:   bool,
  pub auto_delete: bool,
  pub nowait:      bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueBindOptions {
  pub nowait: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueuePurgeOptions {
  pub nowait: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueDeleteOptions {
  pub if_unused: bool,
  pub if_empty:  bool,
  pub nowait:    bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BasicQosOptions {
  pub prefetch_size:  u32,
  pub prefetch_count: u16,
  pub global:         bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BasicConsumeOptions {
  pub no_local:  bool,
  pub no_ack:    bool,
  pub exclusive: bool,
  pub nowait:    bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BasicCancelOptions {
  pub nowait: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BasicPublishOptions {
  pub mandatory: bool,
  pub immediate: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BasicGetOptions {
  pub no_ack: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BasicAckOptions {
  pub multiple: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BasicNackOptions {
  pub multiple: bool,
  pub requeue:  bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BasicRejectOptions {
  pub requeue: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BasicRecoverOptions {
  pub requeue: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConfirmSelectOptions {
  pub nowait: bool,
}
