//! Progress and completion notifications

use log::info;
use mvreg_core::CloudKey;
use std::sync::mpsc::Sender;
use std::sync::Mutex;

/// Something that happened while a batch ran
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A batch of `total` tasks started
    Started { name: String, total: usize },
    /// One task finished; `completed` counts finished tasks so far
    Progress {
        name: String,
        key: CloudKey,
        completed: usize,
        total: usize,
    },
    /// The batch ended; `failed` tasks returned an error or panicked
    Finished {
        name: String,
        completed: usize,
        failed: usize,
        cancelled: bool,
    },
    /// A free-form status line, e.g. from the registrator
    Message(String),
}

/// Receiver of notifications; shared between worker threads
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::Started { name, total } => info!("{}: {} tasks started", name, total),
            Notification::Progress {
                name, completed, total, ..
            } => info!("{}: {}/{} completed", name, completed, total),
            Notification::Finished {
                name,
                completed,
                failed,
                cancelled,
            } => {
                if cancelled {
                    info!("{}: cancelled after {} tasks ({} failed)", name, completed, failed);
                } else {
                    info!("{}: finished, {} tasks ({} failed)", name, completed, failed);
                }
            }
            Notification::Message(message) => info!("{}", message),
        }
    }
}

/// Forwards notifications into an mpsc channel
#[derive(Debug)]
pub struct ChannelSink {
    sender: Mutex<Sender<Notification>>,
}

impl ChannelSink {
    pub fn new(sender: Sender<Notification>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, notification: Notification) {
        // A dropped receiver just means nobody is listening anymore
        let _ = crate::lock(&self.sender).send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_channel_sink_forwards() {
        let (tx, rx) = mpsc::channel();
        let sink = ChannelSink::new(tx);
        sink.notify(Notification::Message("hello".to_string()));
        sink.notify(Notification::Started {
            name: "denoise".to_string(),
            total: 3,
        });

        assert_eq!(rx.recv().unwrap(), Notification::Message("hello".to_string()));
        assert!(matches!(rx.recv().unwrap(), Notification::Started { total: 3, .. }));
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        ChannelSink::new(tx).notify(Notification::Message("nobody".to_string()));
    }
}
