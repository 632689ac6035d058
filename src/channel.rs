//! Unbounded channel between the DSP thread and a recorder's writer thread.
//!
//! Thin layer over `crossbeam-channel` that gives the writer the two
//! operations it actually needs: a blocking drain-everything and an orderly
//! close. Sends never block, so the DSP thread cannot stall on a slow
//! writer; throughput is one descriptor per snapshot interval.

use crossbeam_channel::{RecvError, TryRecvError};

/// Producer end. Dropping the last sender closes the channel; the receiver
/// still drains whatever was queued before the close.
pub struct Sender<T> {
    inner: crossbeam_channel::Sender<T>,
}

/// Consumer end, owned by a single writer thread.
pub struct Receiver<T> {
    inner: crossbeam_channel::Receiver<T>,
}

/// Create an unbounded sender/receiver pair.
pub fn unbounded<T>() -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (Sender { inner: tx }, Receiver { inner: rx })
}

impl<T> Sender<T> {
    /// Queue an item without blocking. Returns false if the receiver is
    /// gone, which only happens after the writer thread has exited.
    pub fn send(&self, item: T) -> bool {
        self.inner.send(item).is_ok()
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Receiver<T> {
    /// Block until at least one item is queued (or the channel closes),
    /// then move everything currently queued into `sink`.
    ///
    /// Returns true while the channel is open. After the last sender drops,
    /// queued items are still delivered; once the queue is empty the drain
    /// returns false and the caller's work loop ends.
    pub fn drain(&self, sink: &mut Vec<T>) -> bool {
        match self.inner.recv() {
            Ok(item) => {
                sink.push(item);
                loop {
                    match self.inner.try_recv() {
                        Ok(item) => sink.push(item),
                        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                    }
                }
                true
            }
            Err(RecvError) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_moves_all_queued() {
        let (tx, rx) = unbounded();
        for i in 0..5 {
            assert!(tx.send(i));
        }

        let mut sink = Vec::new();
        assert!(rx.drain(&mut sink));
        assert_eq!(sink, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_close_delivers_remainder_then_ends() {
        let (tx, rx) = unbounded();
        tx.send(1);
        tx.send(2);
        drop(tx);

        let mut sink = Vec::new();
        assert!(rx.drain(&mut sink));
        assert_eq!(sink, vec![1, 2]);
        assert!(!rx.drain(&mut sink));
    }

    #[test]
    fn test_drain_blocks_until_send() {
        let (tx, rx) = unbounded::<u32>();

        let handle = std::thread::spawn(move || {
            let mut sink = Vec::new();
            let open = rx.drain(&mut sink);
            (open, sink)
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        tx.send(42);

        let (open, sink) = handle.join().unwrap();
        assert!(open);
        assert_eq!(sink, vec![42]);
    }
}
