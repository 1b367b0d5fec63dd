//! Single-slot handoff between one producer and one consumer
//!
//! The slot holds at most one value. What happens when a producer publishes
//! into a full slot is decided by [`MailboxPolicy`]: either the unread value
//! is replaced ("latest wins"), or the producer waits until the consumer has
//! taken it.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Behavior of [`Mailbox::publish`] when the slot is already full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailboxPolicy {
    /// Replace the unread value
    #[default]
    Overwrite,
    /// Wait until the unread value is taken
    Block,
}

/// Why a value could not be published; the value is handed back
#[derive(PartialEq, Eq)]
pub enum PublishError<T> {
    /// The mailbox was closed
    Closed(T),
    /// The slot is full and the policy is [`MailboxPolicy::Block`]
    Full(T),
}

impl<T> PublishError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PublishError::Closed(v) | PublishError::Full(v) => v,
        }
    }
}

impl<T> fmt::Debug for PublishError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::Closed(_) => f.write_str("Closed(..)"),
            PublishError::Full(_) => f.write_str("Full(..)"),
        }
    }
}

struct State<T> {
    slot: Option<T>,
    closed: bool,
}

/// Capacity-one channel with a configurable full-slot policy
pub struct Mailbox<T> {
    policy: MailboxPolicy,
    state: Mutex<State<T>>,
    changed: Condvar,
}

impl<T> Mailbox<T> {
    pub fn new(policy: MailboxPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(State {
                slot: None,
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn policy(&self) -> MailboxPolicy {
        self.policy
    }

    /// Store `value`, returning the unread value it replaced
    ///
    /// Under [`MailboxPolicy::Block`] this waits for the slot to empty, so
    /// nothing is ever replaced. Fails only if the mailbox is or becomes
    /// closed.
    pub fn publish(&self, value: T) -> Result<Option<T>, PublishError<T>> {
        let mut state = self.state.lock();
        if self.policy == MailboxPolicy::Block {
            while state.slot.is_some() && !state.closed {
                self.changed.wait(&mut state);
            }
        }
        if state.closed {
            return Err(PublishError::Closed(value));
        }
        let displaced = state.slot.replace(value);
        self.changed.notify_all();
        Ok(displaced)
    }

    /// Like [`publish`](Self::publish) but never waits: a full slot under
    /// [`MailboxPolicy::Block`] yields [`PublishError::Full`].
    pub fn try_publish(&self, value: T) -> Result<Option<T>, PublishError<T>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PublishError::Closed(value));
        }
        if self.policy == MailboxPolicy::Block && state.slot.is_some() {
            return Err(PublishError::Full(value));
        }
        let displaced = state.slot.replace(value);
        self.changed.notify_all();
        Ok(displaced)
    }

    /// Read and clear the slot
    pub fn take(&self) -> Option<T> {
        let mut state = self.state.lock();
        let value = state.slot.take();
        if value.is_some() {
            self.changed.notify_all();
        }
        value
    }

    /// Wait for a value. Returns `None` once the mailbox is closed and empty.
    pub fn recv(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.slot.take() {
                self.changed.notify_all();
                return Some(value);
            }
            if state.closed {
                return None;
            }
            self.changed.wait(&mut state);
        }
    }

    /// Wait up to `timeout` for a value
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.slot.take() {
                self.changed.notify_all();
                return Some(value);
            }
            if state.closed {
                return None;
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                let value = state.slot.take();
                if value.is_some() {
                    self.changed.notify_all();
                }
                return value;
            }
        }
    }

    /// Refuse further publishes and wake every waiter. A value already in
    /// the slot can still be taken.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.changed.notify_all();
    }

    /// Close and empty the slot in one step, so no consumer can take the
    /// value in between
    pub fn close_and_take(&self) -> Option<T> {
        let mut state = self.state.lock();
        state.closed = true;
        let value = state.slot.take();
        self.changed.notify_all();
        value
    }

    /// Accept publishes again after [`close`](Self::close)
    pub fn reopen(&self) {
        self.state.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().slot.is_none()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new(MailboxPolicy::default())
    }
}

impl<T> fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Mailbox")
            .field("policy", &self.policy)
            .field("full", &state.slot.is_some())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_overwrite_keeps_latest() {
        let mb = Mailbox::new(MailboxPolicy::Overwrite);
        assert_eq!(mb.publish(1).unwrap(), None);
        assert_eq!(mb.publish(2).unwrap(), Some(1));
        assert_eq!(mb.publish(3).unwrap(), Some(2));
        assert_eq!(mb.take(), Some(3));
        assert_eq!(mb.take(), None);
    }

    #[test]
    fn test_block_waits_for_consumer() {
        let mb = Arc::new(Mailbox::new(MailboxPolicy::Block));
        mb.publish(1).unwrap();
        assert_eq!(mb.try_publish(2), Err(PublishError::Full(2)));

        let producer = {
            let mb = Arc::clone(&mb);
            thread::spawn(move || mb.publish(2).unwrap())
        };

        assert_eq!(mb.recv_timeout(Duration::from_secs(5)), Some(1));
        assert_eq!(mb.recv_timeout(Duration::from_secs(5)), Some(2));
        assert_eq!(producer.join().unwrap(), None);
    }

    #[test]
    fn test_block_sees_every_value_in_order() {
        let mb = Arc::new(Mailbox::new(MailboxPolicy::Block));
        let producer = {
            let mb = Arc::clone(&mb);
            thread::spawn(move || {
                for i in 0..100 {
                    mb.publish(i).unwrap();
                }
                mb.close();
            })
        };

        let mut seen = Vec::new();
        while let Some(v) = mb.recv() {
            seen.push(v);
        }
        producer.join().unwrap();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_close_and_take_leaves_nothing_for_consumers() {
        let mb = Arc::new(Mailbox::new(MailboxPolicy::Overwrite));
        let consumer = {
            let mb = Arc::clone(&mb);
            thread::spawn(move || mb.recv_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));

        // Publish and reclaim under contention: the waiting consumer may win
        // the value, but never after close_and_take has run
        mb.publish(7).unwrap();
        let reclaimed = mb.close_and_take();
        let received = consumer.join().unwrap();
        assert_eq!(reclaimed.is_some(), received.is_none());

        assert!(mb.is_closed());
        assert!(mb.is_empty());
        assert_eq!(mb.recv_timeout(Duration::from_millis(10)), None);
        assert!(matches!(mb.try_publish(8), Err(PublishError::Closed(8))));
    }

    #[test]
    fn test_close_and_take_on_idle_mailbox() {
        let mb: Mailbox<u32> = Mailbox::new(MailboxPolicy::Block);
        mb.publish(1).unwrap();
        assert_eq!(mb.close_and_take(), Some(1));
        assert_eq!(mb.recv(), None);
        assert_eq!(mb.close_and_take(), None);
    }

    #[test]
    fn test_close_unblocks_producer_and_consumer() {
        let mb = Arc::new(Mailbox::new(MailboxPolicy::Block));
        mb.publish(1).unwrap();
        let producer = {
            let mb = Arc::clone(&mb);
            thread::spawn(move || mb.publish(2))
        };
        thread::sleep(Duration::from_millis(20));
        mb.close();
        assert_eq!(producer.join().unwrap(), Err(PublishError::Closed(2)));

        // The stored value survives close
        assert_eq!(mb.recv(), Some(1));
        assert_eq!(mb.recv(), None);

        mb.reopen();
        assert!(!mb.is_closed());
        assert_eq!(mb.try_publish(3).unwrap(), None);
    }

    #[test]
    fn test_recv_timeout_expires() {
        let mb: Mailbox<u8> = Mailbox::default();
        assert_eq!(mb.recv_timeout(Duration::from_millis(10)), None);
        assert!(mb.is_empty());
    }
}
