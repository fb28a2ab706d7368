//! Typed channel endpoints recovered from bound ports
//!
//! A source port broadcasts to every fan-out destination; each destination
//! input port owns exactly one receiver. Endpoints are cheap clones of the
//! channel handles stored inside the type-erased port bindings.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, SendError, Sender, TryRecvError, TrySendError};

use super::sample::Sample;

/// Broadcast writer bound to one source port.
///
/// Sends a clone of each value to every connected destination. A send fails
/// only when no destination accepted the value.
pub struct StreamWriter<T> {
    destinations: Vec<Sender<T>>,
}

impl<T: Sample> StreamWriter<T> {
    pub(crate) fn new(destinations: Vec<Sender<T>>) -> Self {
        Self { destinations }
    }

    /// Number of fan-out destinations attached to the port.
    pub fn destination_count(&self) -> usize {
        self.destinations.len()
    }

    /// Whether any destination is attached.
    pub fn is_connected(&self) -> bool {
        !self.destinations.is_empty()
    }

    /// Send a value to all destinations, blocking on full buffers.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        if self.destinations.is_empty() {
            return Ok(());
        }

        let mut any_success = false;
        let mut last_error = None;
        for dest in &self.destinations {
            match dest.send(value.clone()) {
                Ok(()) => any_success = true,
                Err(e) => last_error = Some(e),
            }
        }

        match (any_success, last_error) {
            (false, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }

    /// Send without blocking; fails if any destination buffer is full.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        for dest in &self.destinations {
            dest.try_send(value.clone())?;
        }
        Ok(())
    }
}

impl<T> Clone for StreamWriter<T> {
    fn clone(&self) -> Self {
        Self {
            destinations: self.destinations.clone(),
        }
    }
}

/// Reader bound to one destination input port.
pub struct StreamReader<T> {
    inner: Receiver<T>,
}

impl<T: Sample> StreamReader<T> {
    pub(crate) fn new(inner: Receiver<T>) -> Self {
        Self { inner }
    }

    /// Blocking receive.
    pub fn recv(&self) -> Result<T, RecvError> {
        self.inner.recv()
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.inner.try_recv()
    }

    /// Receive with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.inner.recv_timeout(timeout)
    }

    /// Number of values currently buffered.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.inner.len());
        while let Ok(value) = self.inner.try_recv() {
            out.push(value);
        }
        out
    }
}

impl<T> Clone for StreamReader<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn broadcast_reaches_every_destination() {
        let (tx1, rx1) = bounded::<u32>(4);
        let (tx2, rx2) = bounded::<u32>(4);
        let writer = StreamWriter::new(vec![tx1, tx2]);

        writer.send(7).unwrap();
        writer.send(8).unwrap();

        assert_eq!(StreamReader::new(rx1).drain(), vec![7, 8]);
        assert_eq!(StreamReader::new(rx2).drain(), vec![7, 8]);
    }

    #[test]
    fn unconnected_writer_discards() {
        let writer = StreamWriter::<u32>::new(Vec::new());
        assert!(!writer.is_connected());
        assert!(writer.send(1).is_ok());
    }

    #[test]
    fn try_send_reports_full_buffer() {
        let (tx, rx) = bounded::<u32>(1);
        let writer = StreamWriter::new(vec![tx]);
        writer.try_send(1).unwrap();
        assert!(writer.try_send(2).is_err());
        drop(rx);
    }
}
