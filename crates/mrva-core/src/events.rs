//! Fire-and-forget event fan-out.
//!
//! Each event type gets its own emitter; any number of listeners may
//! subscribe and each receives every event on its own unbounded channel.
//! Listeners that drop their receiver are pruned on the next emit.

use std::sync::Mutex;

use tokio::sync::mpsc;

pub struct EventEmitter<T> {
    senders: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> EventEmitter<T> {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().expect("event emitter lock poisoned").push(tx);
        rx
    }

    pub fn emit(&self, event: T) {
        let mut senders = self.senders.lock().expect("event emitter lock poisoned");
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn listener_count(&self) -> usize {
        self.senders.lock().expect("event emitter lock poisoned").len()
    }
}

impl<T: Clone> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}
