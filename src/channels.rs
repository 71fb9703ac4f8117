use amq_protocol::protocol::AMQPClass;
use log::debug;
use parking_lot::Mutex;

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
  channel::Channel,
  connection::Connection,
  error::{Error, ErrorKind},
  BasicProperties,
};

/// Registry of the open channels of one connection.
///
/// The map is ordered so that number allocation can look at the smallest
/// and largest numbers in use; the reverse direction of the registry is
/// each channel's own immutable id.
#[derive(Clone, Default)]
pub(crate) struct Channels {
  channels: Arc<Mutex<BTreeMap<u16, Channel>>>,
}

impl Channels {
  /// Allocates a channel number and registers a fresh channel under it.
  pub(crate) fn create(&self, connection: Connection, proposed: Option<u16>) -> Result<Channel, Error> {
    let channel_max = connection.configuration().channel_max();
    let mut channels = self.channels.lock();
    let id = allocate_id(&channels, proposed, channel_max)?;
    if channels.contains_key(&id) {
      return Err(ErrorKind::ChannelAlreadyRegistered(id).into());
    }
    let channel = Channel::new(id, connection);
    channels.insert(id, channel.clone());
    Ok(channel)
  }

  pub(crate) fn get(&self, id: u16) -> Option<Channel> {
    self.channels.lock().get(&id).cloned()
  }

  pub(crate) fn remove(&self, id: u16) -> Result<(), Error> {
    self
      .channels
      .lock()
      .remove(&id)
      .map(|_| ())
      .ok_or_else(|| ErrorKind::UnknownChannel(id).into())
  }

  pub(crate) fn receive_method(&self, id: u16, method: AMQPClass) -> Result<(), Error> {
    self
      .get(id)
      .ok_or_else(|| Error::from(ErrorKind::UnknownChannel(id)))?
      .receive_method(method)
  }

  pub(crate) fn handle_content_header_frame(
    &self,
    id: u16,
    size: u64,
    properties: BasicProperties,
  ) -> Result<(), Error> {
    self
      .get(id)
      .ok_or_else(|| Error::from(ErrorKind::UnknownChannel(id)))?
      .handle_content_header_frame(size, properties)
  }

  pub(crate) fn handle_body_frame(&self, id: u16, payload: Vec<u8>) -> Result<(), Error> {
    self
      .get(id)
      .ok_or_else(|| Error::from(ErrorKind::UnknownChannel(id)))?
      .handle_body_frame(payload)
  }

  /// Connection-wide broadcast: the connection starts closing, channels
  /// reject new work but drain what is in flight.
  pub(crate) fn set_connection_closing(&self) {
    for channel in self.channels.lock().values() {
      channel.set_closing();
    }
  }

  /// Clean connection teardown: cancel consumers, fail parked waiters,
  /// empty the registry.
  pub(crate) fn set_connection_closed(&self, error: Error) {
    for (id, channel) in std::mem::take(&mut *self.channels.lock()) {
      debug!("closing channel {} with the connection", id);
      channel.connection_closed(error.clone());
    }
  }

  /// Abrupt teardown: every channel dies with the reason.
  pub(crate) fn set_connection_error(&self, error: Error) {
    for (id, channel) in std::mem::take(&mut *self.channels.lock()) {
      debug!("erroring channel {} with the connection", id);
      channel.connection_error(error.clone());
    }
  }

  #[cfg(test)]
  pub(crate) fn len(&self) -> usize {
    self.channels.lock().len()
  }
}

/// Channel-number allocation policy.
///
/// A valid proposed number wins; otherwise take 1 on an empty registry,
/// then grow below the smallest or above the largest number in use, and
/// only scan for a gap once both ends are taken.
fn allocate_id(channels: &BTreeMap<u16, Channel>, proposed: Option<u16>, max: u16) -> Result<u16, Error> {
  let max = if max == 0 { u16::max_value() } else { max };
  if let Some(id) = proposed {
    if id > 0 && id <= max && !channels.contains_key(&id) {
      return Ok(id);
    }
  }
  let smallest = channels.keys().next().cloned();
  let largest = channels.keys().next_back().cloned();
  match (smallest, largest) {
    (None, _) => Ok(1),
    (Some(smallest), _) if smallest > 1 => Ok(smallest - 1),
    (_, Some(largest)) if largest < max => Ok(largest + 1),
    _ => {
      let mut expected: u32 = 1;
      for id in channels.keys() {
        if u32::from(*id) != expected {
          return Ok(expected as u16);
        }
        expected += 1;
      }
      Err(ErrorKind::ChannelsLimitReached.into())
    }
  }
}

impl fmt::Debug for Channels {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Channels")
      .field("channels", &self.channels.lock().keys().collect::<Vec<_>>())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::connection::Connection;

  fn ids(connection: &Connection, taken: &[u16]) -> BTreeMap<u16, Channel> {
    taken
      .iter()
      .map(|id| (*id, Channel::new(*id, connection.clone())))
      .collect()
  }

  #[test]
  fn allocation_policy() {
    let connection = Connection::new();

    assert_eq!(allocate_id(&ids(&connection, &[]), None, 10).unwrap(), 1);
    assert_eq!(allocate_id(&ids(&connection, &[]), Some(7), 10).unwrap(), 7);
    // invalid proposals fall back to automatic allocation
    assert_eq!(allocate_id(&ids(&connection, &[7]), Some(7), 10).unwrap(), 6);
    assert_eq!(allocate_id(&ids(&connection, &[1]), Some(11), 10).unwrap(), 2);
    // below the smallest first, then above the largest
    assert_eq!(allocate_id(&ids(&connection, &[3, 4]), None, 10).unwrap(), 2);
    assert_eq!(allocate_id(&ids(&connection, &[1, 2, 5]), None, 5).unwrap(), 3);
    // full range
    assert!(allocate_id(&ids(&connection, &[1, 2, 3]), None, 3).is_err());
  }

  #[test]
  fn allocation_stays_in_range() {
    let connection = Connection::new();
    let channels = ids(&connection, &[1, 2]);
    let id = allocate_id(&channels, None, 2);
    assert!(id.is_err());
    let id = allocate_id(&channels, None, 3).unwrap();
    assert!(id >= 1 && id <= 3);
    assert!(!channels.contains_key(&id));
  }
}
