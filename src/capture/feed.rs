//! In-memory frame source.

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use super::FrameSource;

/// Pushes synthetic frames into a [`FeedSource`].
#[derive(Debug, Clone)]
pub struct FeedSender(Sender<Vec<u8>>);

impl FeedSender {
    /// Returns false once the source is gone.
    pub fn push(&self, frame: impl Into<Vec<u8>>) -> bool {
        self.0.send(frame.into()).is_ok()
    }
}

/// A [`FrameSource`] fed by a channel instead of a socket.
#[derive(Debug)]
pub struct FeedSource(Receiver<Vec<u8>>);

impl FeedSource {
    pub fn channel() -> (FeedSender, FeedSource) {
        let (tx, rx) = mpsc::channel();
        (FeedSender(tx), FeedSource(rx))
    }
}

impl FrameSource for FeedSource {
    fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        match self.0.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "feed sender dropped",
            )),
        }
    }
}
