//! Bounded FIFO with priority lanes and drop policy.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::clock::Timestamp;
use crate::error::DropReason;

/// High-priority messages are dequeued (and, on overflow, protected) ahead
/// of normal ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Normal,
    High,
}

/// An unforgeable message identity, generated once per `SEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub struct MessageId(u64);

#[derive(Debug, Default)]
pub struct MessageIdGenerator(AtomicU64);

impl MessageIdGenerator {
    pub fn next(&self) -> MessageId {
        MessageId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// `{id, payload, enqueueTime, attempts, priority, timeoutAt?}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub payload: Vec<u8>,
    pub enqueue_time: Timestamp,
    pub attempts: u32,
    pub priority: Priority,
    pub timeout_at: Option<Timestamp>,
}

/// Bounded, priority-laned FIFO. Ordering within a lane is plain
/// first-in-first-out (enqueue order already encodes the enqueueTime/id
/// tie-break, since both only increase).
#[derive(Debug)]
pub struct MessageQueue {
    high: VecDeque<QueuedMessage>,
    normal: VecDeque<QueuedMessage>,
    max_size: usize,
}

impl MessageQueue {
    pub fn new(max_size: usize) -> Self {
        MessageQueue {
            high: VecDeque::new(),
            normal: VecDeque::new(),
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lane_mut(&mut self, priority: Priority) -> &mut VecDeque<QueuedMessage> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
        }
    }

    /// Admits `msg`. If the queue is full: evicts the oldest message from a
    /// strictly-lower-priority lane if one exists (returning it as the
    /// eviction victim), otherwise rejects `msg` itself. Equal priority
    /// never evicts. Both outcomes share the `queue_overflow` reason.
    pub fn enqueue(
        &mut self,
        msg: QueuedMessage,
    ) -> Result<Option<(MessageId, DropReason)>, (QueuedMessage, DropReason)> {
        if self.len() < self.max_size {
            self.lane_mut(msg.priority).push_back(msg);
            return Ok(None);
        }

        // Overflow: a victim lane only exists when it is strictly lower
        // priority than the incoming message. Equal priority never evicts;
        // `Normal` can never evict (there is no lower lane) and always
        // rejects on overflow.
        let victim_lane = match msg.priority {
            Priority::High if !self.normal.is_empty() => Some(Priority::Normal),
            _ => None,
        };

        match victim_lane {
            Some(lane) => {
                let victim = self.lane_mut(lane).pop_front().expect("lane non-empty");
                self.lane_mut(msg.priority).push_back(msg);
                Ok(Some((victim.id, DropReason::QueueOverflow)))
            },
            None => Err((msg, DropReason::QueueOverflow)),
        }
    }

    /// Dequeues the next message to attempt delivery: high-priority lane
    /// drained before normal.
    pub fn dequeue(&mut self) -> Option<QueuedMessage> {
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }

    /// Puts `msg` back at the head of its lane without counting it as a
    /// delivery attempt -- used when a rate-limit rejection, not a failed
    /// send, is why it didn't go out. Dequeue only happens while connected
    /// and only after rate-limit admission.
    pub fn return_to_front(&mut self, msg: QueuedMessage) {
        self.lane_mut(msg.priority).push_front(msg);
    }

    /// Re-enqueues `msg` at the head of its lane after a failed delivery
    /// attempt, bumping `attempts`. Beyond `max_retries` attempts the
    /// message is dropped with `exhausted` instead.
    pub fn requeue_failed(
        &mut self,
        mut msg: QueuedMessage,
        max_retries: u32,
    ) -> Option<(MessageId, DropReason)> {
        msg.attempts += 1;
        if msg.attempts > max_retries {
            return Some((msg.id, DropReason::Exhausted));
        }
        self.lane_mut(msg.priority).push_front(msg);
        None
    }

    /// Removes and returns every message whose `timeoutAt` has passed.
    pub fn evict_expired(&mut self, now: Timestamp) -> Vec<(MessageId, DropReason)> {
        let mut dropped = Vec::new();
        for lane in [&mut self.high, &mut self.normal] {
            lane.retain(|m| match m.timeout_at {
                Some(t) if now > t => {
                    dropped.push((m.id, DropReason::TimedOut));
                    false
                },
                _ => true,
            });
        }
        dropped
    }

    /// Drains every message with `terminated`, used by `forceTerminate`.
    pub fn drain_terminated(&mut self) -> Vec<(MessageId, DropReason)> {
        let mut dropped = Vec::new();
        for lane in [&mut self.high, &mut self.normal] {
            dropped.extend(lane.drain(..).map(|m| (m.id, DropReason::Terminated)));
        }
        dropped
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn msg(id: u64, priority: Priority) -> QueuedMessage {
        QueuedMessage {
            id: MessageId(id),
            payload: vec![],
            enqueue_time: Timestamp::ZERO,
            attempts: 0,
            priority,
            timeout_at: None,
        }
    }

    #[test]
    fn queue_bound_never_exceeded() {
        let mut q = MessageQueue::new(2);
        assert!(q.enqueue(msg(1, Priority::Normal)).unwrap().is_none());
        assert!(q.enqueue(msg(2, Priority::Normal)).unwrap().is_none());
        assert!(q.len() <= 2);
        // third normal with queue full of normals: rejected outright
        assert!(q.enqueue(msg(3, Priority::Normal)).is_err());
        assert!(q.len() <= 2);
    }

    #[test]
    fn scenario_queue_overflow_with_priority() {
        // max_queue_size=2, submit (normal, normal, high)
        let mut q = MessageQueue::new(2);
        assert!(q.enqueue(msg(1, Priority::Normal)).unwrap().is_none());
        assert!(q.enqueue(msg(2, Priority::Normal)).unwrap().is_none());
        let evicted = q.enqueue(msg(3, Priority::High)).unwrap();
        assert_eq!(evicted, Some((MessageId(1), DropReason::QueueOverflow)));

        let first = q.dequeue().unwrap();
        assert_eq!(first.id, MessageId(3));
        assert_eq!(first.priority, Priority::High);
        let second = q.dequeue().unwrap();
        assert_eq!(second.id, MessageId(2));
    }

    #[test]
    fn high_priority_drained_before_normal() {
        let mut q = MessageQueue::new(10);
        q.enqueue(msg(1, Priority::Normal)).unwrap();
        q.enqueue(msg(2, Priority::High)).unwrap();
        q.enqueue(msg(3, Priority::Normal)).unwrap();
        assert_eq!(q.dequeue().unwrap().id, MessageId(2));
        assert_eq!(q.dequeue().unwrap().id, MessageId(1));
        assert_eq!(q.dequeue().unwrap().id, MessageId(3));
    }

    #[test]
    fn requeue_failed_bumps_attempts_until_exhausted() {
        let mut q = MessageQueue::new(10);
        let m = msg(1, Priority::Normal);
        let m = {
            q.requeue_failed(m, 2);
            q.dequeue().unwrap()
        };
        assert_eq!(m.attempts, 1);
        let dropped = q.requeue_failed(m, 1);
        // attempts becomes 2, max_retries 1 -> exhausted
        assert_eq!(dropped, Some((MessageId(1), DropReason::Exhausted)));
    }

    #[test]
    fn evict_expired_removes_only_timed_out() {
        let mut q = MessageQueue::new(10);
        let mut m1 = msg(1, Priority::Normal);
        m1.timeout_at = Some(Timestamp::from_millis(100));
        let m2 = msg(2, Priority::Normal);
        q.enqueue(m1).unwrap();
        q.enqueue(m2).unwrap();

        let dropped = q.evict_expired(Timestamp::from_millis(200));
        assert_eq!(dropped, vec![(MessageId(1), DropReason::TimedOut)]);
        assert_eq!(q.len(), 1);
    }
}
