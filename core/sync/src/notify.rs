//! Notification channel between worker tasks and the host UI.
//!
//! Background tasks must never touch the host directly; they publish
//! [`SyncMessage`]s here and the host drains them from the one context
//! that is allowed to perform UI effects (typically a periodic timer).

use tokio::sync::mpsc;
use tracing::debug;

use autosync_common::{Notice, SyncMessage};

/// Host-side effects the drain loop is allowed to perform.
pub trait HostHooks {
    /// Display a message, styled as information or as an error.
    fn show_message(&mut self, text: &str, is_error: bool);

    /// Files changed on disk; refresh any open views of them.
    fn reload_changed_files(&mut self);
}

/// Producer half of the channel. Cheap to clone into worker tasks.
///
/// The channel is unbounded, so publishing never blocks a producer and
/// the reload marker can never be dropped. Suppression under silent mode
/// is the producer's decision, made before a message is enqueued; the
/// channel itself delivers everything it is given.
#[derive(Debug, Clone)]
pub struct NotificationChannel {
    tx: mpsc::UnboundedSender<SyncMessage>,
}

impl NotificationChannel {
    /// Create the channel pair.
    pub fn new() -> (Self, NotificationReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, NotificationReceiver { rx })
    }

    /// Publish a raw message.
    pub fn publish(&self, message: SyncMessage) {
        // A closed channel means the host is gone; nothing to do but log.
        if self.tx.send(message).is_err() {
            debug!("notification dropped: consumer disconnected");
        }
    }

    /// Publish an informational notice.
    pub fn info(&self, text: impl Into<String>) {
        self.publish(SyncMessage::Notice(Notice::info(text)));
    }

    /// Publish an error notice.
    pub fn error(&self, text: impl Into<String>) {
        self.publish(SyncMessage::Notice(Notice::error(text)));
    }

    /// Ask the host to reload files that changed on disk.
    pub fn request_reload(&self) {
        self.publish(SyncMessage::ReloadRequest);
    }
}

/// Consumer half of the channel. Owned by the single drain loop.
#[derive(Debug)]
pub struct NotificationReceiver {
    rx: mpsc::UnboundedReceiver<SyncMessage>,
}

impl NotificationReceiver {
    /// Dequeue up to `max_batch` messages in FIFO order, dispatching each
    /// to `host`. Returns how many were handled.
    ///
    /// Never blocks; bounding the batch keeps the host responsive when a
    /// burst of operations completes at once.
    pub fn drain<H: HostHooks>(&mut self, max_batch: usize, host: &mut H) -> usize {
        let mut handled = 0;
        while handled < max_batch {
            match self.rx.try_recv() {
                Ok(SyncMessage::Notice(notice)) => {
                    host.show_message(&notice.text, notice.is_error);
                }
                Ok(SyncMessage::ReloadRequest) => {
                    host.reload_changed_files();
                }
                Err(_) => break,
            }
            handled += 1;
        }
        handled
    }

    /// Whether anything is waiting without consuming it.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every host effect in order.
    #[derive(Default)]
    struct RecordingHost {
        events: Vec<String>,
    }

    impl HostHooks for RecordingHost {
        fn show_message(&mut self, text: &str, is_error: bool) {
            let tag = if is_error { "error" } else { "info" };
            self.events.push(format!("{tag}:{text}"));
        }

        fn reload_changed_files(&mut self) {
            self.events.push("reload".to_string());
        }
    }

    #[tokio::test]
    async fn test_drain_preserves_fifo_order() {
        let (channel, mut receiver) = NotificationChannel::new();
        channel.info("first");
        channel.error("second");
        channel.request_reload();
        channel.info("third");

        let mut host = RecordingHost::default();
        let handled = receiver.drain(10, &mut host);

        assert_eq!(handled, 4);
        assert_eq!(
            host.events,
            vec!["info:first", "error:second", "reload", "info:third"]
        );
        assert!(receiver.is_empty());
    }

    #[tokio::test]
    async fn test_drain_respects_batch_bound() {
        let (channel, mut receiver) = NotificationChannel::new();
        for i in 0..5 {
            channel.info(format!("message {i}"));
        }

        let mut host = RecordingHost::default();
        assert_eq!(receiver.drain(2, &mut host), 2);
        assert_eq!(host.events.len(), 2);

        // The rest stays queued for the next tick.
        assert_eq!(receiver.drain(10, &mut host), 3);
        assert_eq!(host.events.len(), 5);
    }

    #[tokio::test]
    async fn test_producers_survive_dropped_consumer() {
        let (channel, receiver) = NotificationChannel::new();
        drop(receiver);
        // Must not panic or block.
        channel.info("anyone there?");
        channel.request_reload();
    }

    #[tokio::test]
    async fn test_clones_share_one_stream() {
        let (channel, mut receiver) = NotificationChannel::new();
        let other = channel.clone();
        channel.info("a");
        other.info("b");

        let mut host = RecordingHost::default();
        receiver.drain(10, &mut host);
        assert_eq!(host.events, vec!["info:a", "info:b"]);
    }
}
