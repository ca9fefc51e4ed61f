//! Handoff channels between gateway processes.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Messages wait here until the consumer takes them, one at a time.
pub const HANDOFF_CAPACITY: usize = 1;

/// Receiving end of a handoff channel. It outlives any single consumer task:
/// whichever incarnation of the consuming process is alive holds the lock.
pub type Inbox<T> = Arc<Mutex<mpsc::Receiver<T>>>;

/// Create a handoff channel.
pub fn handoff<T>() -> (mpsc::Sender<T>, Inbox<T>) {
    let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
    (tx, Arc::new(Mutex::new(rx)))
}
