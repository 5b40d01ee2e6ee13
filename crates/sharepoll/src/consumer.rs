//! Receivers of delivered files.

use crate::client::FileAttributes;
use crate::post_action::Outcome;
use std::sync::mpsc::{self, Receiver, SyncSender};
use tracing::warn;

/// A matched file and its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMessage {
    pub attributes: FileAttributes,
    pub payload: Vec<u8>,
}

impl FileMessage {
    pub fn path(&self) -> &str {
        &self.attributes.path
    }

    /// Payload as UTF-8, lossy.
    pub fn payload_as_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Processes one delivered file and reports how it went.
///
/// Runs on the listener thread while the file and its post-action
/// destination are locked, so it must not operate on those paths through the
/// connector. A panic counts as [`Outcome::Failure`].
pub trait FileConsumer: Send + Sync {
    fn consume(&self, message: FileMessage) -> Outcome;
}

impl<F> FileConsumer for F
where
    F: Fn(FileMessage) -> Outcome + Send + Sync,
{
    fn consume(&self, message: FileMessage) -> Outcome {
        self(message)
    }
}

/// Forwards messages into a bounded channel.
///
/// Blocks while the channel is full. A dropped receiver turns every
/// delivery into [`Outcome::Failure`].
pub struct ChannelConsumer {
    sender: SyncSender<FileMessage>,
    outcome: Outcome,
}

impl ChannelConsumer {
    pub fn bounded(capacity: usize) -> (Self, Receiver<FileMessage>) {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        (
            Self {
                sender,
                outcome: Outcome::Success,
            },
            receiver,
        )
    }

    /// Outcome reported for every successfully forwarded message.
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }
}

impl FileConsumer for ChannelConsumer {
    fn consume(&self, message: FileMessage) -> Outcome {
        let path = message.attributes.path.clone();
        match self.sender.send(message) {
            Ok(()) => self.outcome,
            Err(_) => {
                warn!(path = %path, "Consumer channel closed");
                Outcome::Failure
            }
        }
    }
}
