use amq_protocol::frame::AMQPFrame;
use log::trace;
use parking_lot::Mutex;

use std::{
  collections::{HashMap, HashSet, VecDeque},
  fmt,
  sync::Arc,
};

use crate::{channel::Reply, error::Error, wait::WaitHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Priority {
  /// Heartbeats, close-ok replies and the protocol header; bypasses the
  /// per-channel reply gating.
  Critical,
  /// Plain methods.
  Normal,
  /// Content-bearing method trains; drained once no method is waiting,
  /// so a fresh method is not starved behind queued payloads.
  Low,
}

pub(crate) struct QueuedFrame {
  pub(crate) channel_id: u16,
  pub(crate) frame:      AMQPFrame,
  pub(crate) resolver:   Option<WaitHandle<()>>,
}

/// Outbound frame queues plus the per-channel RPC FIFO.
///
/// A frame expecting a reply is only released once its channel has no
/// outstanding reply, and while a channel waits for a reply all of its
/// queued frames hold, so the wire order per channel is the order the
/// requests were accepted in. Frames of other channels keep draining and
/// interleave at frame boundaries only.
///
/// Outbound traffic drains per [`Priority`] tier; once the method frame
/// of a content train went out, the header and body frames that belong
/// to it follow before anything but heartbeats, since the server treats
/// an interposed frame on that channel as a protocol error.
#[derive(Clone, Default)]
pub(crate) struct Frames {
  inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
  priority_frames:  VecDeque<(QueuedFrame, Option<Reply>)>,
  /// remainder of a content train whose method frame already went out
  publish_frames:   VecDeque<(QueuedFrame, Option<Reply>)>,
  frames:           VecDeque<(QueuedFrame, Option<Reply>)>,
  low_prio_frames:  VecDeque<(QueuedFrame, Option<Reply>)>,
  expected_replies: HashMap<u16, VecDeque<Reply>>,
  flush_waiters:    Vec<WaitHandle<()>>,
}

impl Frames {
  pub(crate) fn push(
    &self,
    channel_id: u16,
    priority: Priority,
    frame: AMQPFrame,
    resolver: Option<WaitHandle<()>>,
    expected_reply: Option<Reply>,
  ) {
    let mut inner = self.inner.lock();
    let queued = (QueuedFrame { channel_id, frame, resolver }, expected_reply);
    inner.queue(priority).push_back(queued);
  }

  /// Push a method frame and its content train as one unit, resolving
  /// `resolver` once the last frame hit the send buffer.
  pub(crate) fn push_frames(&self, channel_id: u16, mut frames: Vec<AMQPFrame>, resolver: WaitHandle<()>) {
    let mut inner = self.inner.lock();
    let last_frame = frames.pop();
    for frame in frames {
      inner
        .queue(Priority::Low)
        .push_back((QueuedFrame { channel_id, frame, resolver: None }, None));
    }
    match last_frame {
      Some(frame) => inner
        .queue(Priority::Low)
        .push_back((QueuedFrame { channel_id, frame, resolver: Some(resolver) }, None)),
      None => resolver.finish(()),
    }
  }

  pub(crate) fn pop(&self) -> Option<QueuedFrame> {
    let mut inner = self.inner.lock();
    inner.pop()
  }

  /// Put a frame back at the front after a short write (the reply, if
  /// any, stays registered).
  pub(crate) fn requeue(&self, frame: QueuedFrame) {
    self.inner.lock().priority_frames.push_front((frame, None));
  }

  pub(crate) fn next_expected_reply(&self, channel_id: u16) -> Option<Reply> {
    self
      .inner
      .lock()
      .expected_replies
      .get_mut(&channel_id)
      .and_then(|replies| replies.pop_front())
  }

  pub(crate) fn has_expected_reply(&self, channel_id: u16) -> bool {
    self
      .inner
      .lock()
      .expected_replies
      .get(&channel_id)
      .map(|replies| !replies.is_empty())
      .unwrap_or(false)
  }

  pub(crate) fn has_pending(&self) -> bool {
    let inner = self.inner.lock();
    !(inner.priority_frames.is_empty()
      && inner.publish_frames.is_empty()
      && inner.frames.is_empty()
      && inner.low_prio_frames.is_empty())
  }

  pub(crate) fn register_flush_waiter(&self, waiter: WaitHandle<()>) {
    self.inner.lock().flush_waiters.push(waiter);
  }

  pub(crate) fn resolve_flush_waiters(&self) {
    for waiter in self.inner.lock().flush_waiters.drain(..) {
      waiter.finish(());
    }
  }

  /// Fail everything still queued or awaiting a reply, connection-wide.
  pub(crate) fn drop_pending(&self, error: Error) {
    let inner = &mut *self.inner.lock();
    for (frame, reply) in inner
      .priority_frames
      .drain(..)
      .chain(inner.publish_frames.drain(..))
      .chain(inner.frames.drain(..))
      .chain(inner.low_prio_frames.drain(..))
    {
      if let Some(resolver) = frame.resolver {
        resolver.error(error.clone());
      }
      if let Some(reply) = reply {
        reply.error(error.clone());
      }
    }
    for (_, replies) in inner.expected_replies.drain() {
      for reply in replies {
        reply.error(error.clone());
      }
    }
    for waiter in inner.flush_waiters.drain(..) {
      waiter.error(error.clone());
    }
  }

  /// Fail everything belonging to one channel.
  pub(crate) fn drop_channel_pending(&self, channel_id: u16, error: Error) {
    let inner = &mut *self.inner.lock();
    drop_channel_frames(&mut inner.publish_frames, channel_id, &error);
    drop_channel_frames(&mut inner.frames, channel_id, &error);
    drop_channel_frames(&mut inner.low_prio_frames, channel_id, &error);
    if let Some(replies) = inner.expected_replies.remove(&channel_id) {
      for reply in replies {
        reply.error(error.clone());
      }
    }
  }
}

fn drop_channel_frames(queue: &mut VecDeque<(QueuedFrame, Option<Reply>)>, channel_id: u16, error: &Error) {
  let mut kept = VecDeque::new();
  for (frame, reply) in queue.drain(..) {
    if frame.channel_id == channel_id {
      if let Some(resolver) = frame.resolver {
        resolver.error(error.clone());
      }
      if let Some(reply) = reply {
        reply.error(error.clone());
      }
    } else {
      kept.push_back((frame, reply));
    }
  }
  *queue = kept;
}

impl Inner {
  fn queue(&mut self, priority: Priority) -> &mut VecDeque<(QueuedFrame, Option<Reply>)> {
    match priority {
      Priority::Critical => &mut self.priority_frames,
      Priority::Normal   => &mut self.frames,
      Priority::Low      => &mut self.low_prio_frames,
    }
  }

  fn pop(&mut self) -> Option<QueuedFrame> {
    if let Some((frame, reply)) = self.priority_frames.pop_front() {
      return Some(self.release(frame, reply));
    }
    if let Some((frame, reply)) = self.publish_frames.pop_front() {
      return Some(self.release(frame, reply));
    }
    if let Some(index) = eligible_index(&self.frames, &self.expected_replies) {
      let (frame, reply) = self.frames.remove(index)?;
      return Some(self.release(frame, reply));
    }
    let index = eligible_index(&self.low_prio_frames, &self.expected_replies)?;
    let (frame, reply) = self.low_prio_frames.remove(index)?;
    // the rest of a started train has to follow its method frame
    // directly on that channel, ahead of whatever gets queued meanwhile
    if entry_is_header(self.low_prio_frames.get(index)) {
      while entry_is_content(self.low_prio_frames.get(index)) {
        if let Some(entry) = self.low_prio_frames.remove(index) {
          self.publish_frames.push_back(entry);
        }
      }
    }
    Some(self.release(frame, reply))
  }

  fn release(&mut self, frame: QueuedFrame, reply: Option<Reply>) -> QueuedFrame {
    if let Some(reply) = reply {
      trace!("channel {} now awaits {:?}", frame.channel_id, reply);
      self
        .expected_replies
        .entry(frame.channel_id)
        .or_insert_with(VecDeque::new)
        .push_back(reply);
    }
    frame
  }
}

/// First frame whose channel is not blocked on a reply; every frame of a
/// blocked channel holds to keep its wire order intact.
fn eligible_index(
  queue: &VecDeque<(QueuedFrame, Option<Reply>)>,
  expected_replies: &HashMap<u16, VecDeque<Reply>>,
) -> Option<usize> {
  let mut held = HashSet::new();
  for (i, (frame, _)) in queue.iter().enumerate() {
    if held.contains(&frame.channel_id) {
      continue;
    }
    let awaits_reply = expected_replies
      .get(&frame.channel_id)
      .map(|replies| !replies.is_empty())
      .unwrap_or(false);
    if awaits_reply {
      held.insert(frame.channel_id);
      continue;
    }
    return Some(i);
  }
  None
}

fn entry_is_header(entry: Option<&(QueuedFrame, Option<Reply>)>) -> bool {
  match entry {
    Some((queued, _)) => match queued.frame {
      AMQPFrame::Header(..) => true,
      _ => false,
    },
    None => false,
  }
}

fn entry_is_content(entry: Option<&(QueuedFrame, Option<Reply>)>) -> bool {
  match entry {
    Some((queued, _)) => match queued.frame {
      AMQPFrame::Header(..) | AMQPFrame::Body(..) => true,
      _ => false,
    },
    None => false,
  }
}

impl fmt::Debug for Frames {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let inner = self.inner.lock();
    f.debug_struct("Frames")
      .field("priority_frames", &inner.priority_frames.len())
      .field("publish_frames", &inner.publish_frames.len())
      .field("frames", &inner.frames.len())
      .field("low_prio_frames", &inner.low_prio_frames.len())
      .field("expected_replies", &inner.expected_replies)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{protocol, wait::Wait, BasicProperties};
  use amq_protocol::frame::AMQPContentHeader;

  fn method_frame(channel_id: u16) -> AMQPFrame {
    AMQPFrame::Method(
      channel_id,
      protocol::AMQPClass::Basic(protocol::basic::AMQPMethod::Ack(protocol::basic::Ack {
        delivery_tag: 0,
        multiple:     false,
      })),
    )
  }

  fn train(channel_id: u16) -> Vec<AMQPFrame> {
    vec![
      method_frame(channel_id),
      AMQPFrame::Header(
        channel_id,
        60,
        Box::new(AMQPContentHeader {
          class_id:   60,
          weight:     0,
          body_size:  2,
          properties: BasicProperties::default(),
        }),
      ),
      AMQPFrame::Body(channel_id, vec![1, 2]),
    ]
  }

  #[test]
  fn methods_overtake_queued_content_trains() {
    let frames = Frames::default();
    let (_wait, resolver) = Wait::new();
    frames.push_frames(1, train(1), resolver);
    frames.push(2, Priority::Normal, method_frame(2), None, None);

    // the fresh method goes first, then the train drains contiguously
    assert_eq!(frames.pop().unwrap().channel_id, 2);
    let train_channels: Vec<u16> = (0..3).map(|_| frames.pop().unwrap().channel_id).collect();
    assert_eq!(train_channels, vec![1, 1, 1]);
    assert!(frames.pop().is_none());
  }

  #[test]
  fn started_train_finishes_before_new_methods() {
    let frames = Frames::default();
    let (_wait, resolver) = Wait::new();
    frames.push_frames(1, train(1), resolver);
    assert_eq!(frames.pop().unwrap().channel_id, 1);

    // the method frame is on the wire; the rest of the train cannot be
    // interposed even by a fresh method
    frames.push(2, Priority::Normal, method_frame(2), None, None);
    match frames.pop().unwrap().frame {
      AMQPFrame::Header(..) => {}
      f => panic!("expected the train header, got {:?}", f),
    }
    match frames.pop().unwrap().frame {
      AMQPFrame::Body(..) => {}
      f => panic!("expected the train body, got {:?}", f),
    }
    assert_eq!(frames.pop().unwrap().channel_id, 2);
  }
}
