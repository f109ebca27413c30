//! Bounded mailbox for task signaling
//!
//! A fixed number of slots; `send` blocks while all slots are full and
//! `recv` blocks while none are. There is no timeout or cancellation.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// Bounded FIFO channel
#[derive(Debug)]
pub struct Mailbox<T> {
    slots: usize,
    queue: Mutex<VecDeque<T>>,
    cv: Condvar,
}

impl<T> Mailbox<T> {
    /// Create a mailbox with `slots` slots (at least one)
    pub fn new(slots: usize) -> Self {
        let slots = slots.max(1);
        Self {
            slots,
            queue: Mutex::new(VecDeque::with_capacity(slots)),
            cv: Condvar::new(),
        }
    }

    /// Deposit a message, waiting for a free slot
    pub fn send(&self, msg: T) {
        let mut queue = self.queue.lock();
        while queue.len() >= self.slots {
            self.cv.wait(&mut queue);
        }
        queue.push_back(msg);
        self.cv.notify_all();
    }

    /// Take the oldest message, waiting for one to arrive
    pub fn recv(&self) -> T {
        let mut queue = self.queue.lock();
        loop {
            if let Some(msg) = queue.pop_front() {
                self.cv.notify_all();
                return msg;
            }
            self.cv.wait(&mut queue);
        }
    }

    /// Take the oldest message if there is one
    pub fn try_recv(&self) -> Option<T> {
        let mut queue = self.queue.lock();
        let msg = queue.pop_front();
        if msg.is_some() {
            self.cv.notify_all();
        }
        msg
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let mb = Mailbox::new(3);
        mb.send(1);
        mb.send(2);
        assert_eq!(mb.len(), 2);
        assert_eq!(mb.recv(), 1);
        assert_eq!(mb.try_recv(), Some(2));
        assert_eq!(mb.try_recv(), None);
    }

    #[test]
    fn test_zero_slots_rounds_up() {
        let mb: Mailbox<()> = Mailbox::new(0);
        assert_eq!(mb.capacity(), 1);
    }

    #[test]
    fn test_send_blocks_when_full() {
        let mb = Arc::new(Mailbox::new(1));
        mb.send(1u32);

        let sender = {
            let mb = mb.clone();
            thread::spawn(move || mb.send(2))
        };
        assert_eq!(mb.recv(), 1);
        sender.join().unwrap();
        assert_eq!(mb.recv(), 2);
        assert!(mb.is_empty());
    }
}
