//! coney
//!
//! An AMQP 0-9-1 client library.
//!
//! The crate multiplexes any number of [`Channel`]s over one
//! [`Connection`]. Synchronous AMQP methods return a [`Confirmation`]
//! carrying the server reply; deliveries are dispatched to a
//! [`ConsumerDelegate`] registered on the [`Consumer`] a subscription
//! returns.
//!
//! ```rust,no_run
//! use coney::{Connection, ConnectionProperties, options::*, types::FieldTable};
//!
//! let conn = Connection::connect("amqp://127.0.0.1:5672/%2f", ConnectionProperties::default())
//!   .wait()
//!   .expect("connection error");
//! let channel = conn.create_channel().wait().expect("create_channel");
//! channel
//!   .queue_declare("hello", QueueDeclareOptions::default(), FieldTable::default())
//!   .wait()
//!   .expect("queue_declare");
//! channel
//!   .basic_publish(
//!     "",
//!     "hello",
//!     BasicPublishOptions::default(),
//!     b"Hello world!".to_vec(),
//!     coney::BasicProperties::default(),
//!   )
//!   .wait()
//!   .expect("basic_publish");
//! ```
//!
//! [`Channel`]: ./struct.Channel.html
//! [`Connection`]: ./struct.Connection.html
//! [`Confirmation`]: ./struct.Confirmation.html
//! [`Consumer`]: ./struct.Consumer.html
//! [`ConsumerDelegate`]: ./trait.ConsumerDelegate.html

pub use amq_protocol::protocol;

/// Properties of an AMQP message (the `basic` class content header).
pub type BasicProperties = protocol::basic::AMQPProperties;

mod acknowledgement;
mod auth;
mod buffer;
mod channel;
mod channel_status;
mod channels;
mod configuration;
mod confirmation;
mod connection;
mod connection_properties;
mod connection_status;
mod consumer;
mod destination;
mod error;
mod frames;
mod id_sequence;
mod io_loop;
pub mod message;
pub mod options;
mod queue;
mod queues;
mod returned_messages;
pub mod tcp;
pub mod types;
pub mod uri;
mod wait;

pub use crate::{
  acknowledgement::{ConfirmEvent, ConfirmHandler, DeliveryTag},
  auth::{Credentials, SASLMechanism},
  channel::Channel,
  channel_status::{ChannelState, ChannelStatus, FlowHandler},
  configuration::Configuration,
  confirmation::Confirmation,
  connection::Connection,
  connection_properties::ConnectionProperties,
  connection_status::{ConnectionState, ConnectionStatus},
  consumer::{Consumer, ConsumerDelegate, ConsumerEvent},
  destination::Destination,
  error::{Error, ErrorKind},
  queue::Queue,
  returned_messages::ReturnedMessageHandler,
  wait::NotifyReady,
};
