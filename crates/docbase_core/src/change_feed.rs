//! Feed of committed writes.
//!
//! The [`Database`](crate::database::Database) queues one [`ChangeEvent`]
//! per insert, update, delete or rename and publishes the queue when the
//! outermost transaction commits; rolled back writes never appear. Each
//! published event gets the next sequence number. Consumers either hold a
//! channel from [`ChangeFeed::subscribe`] or read the bounded backlog with
//! [`ChangeFeed::since`]:
//!
//! ```rust,ignore
//! let app = App::builder(Config::new()).open()?;
//! let mut cursor = 0;
//! for event in app.database().changes().since(cursor, 100) {
//!     println!("{:?} {} {}", event.change_type, event.doctype, event.name);
//!     cursor = event.sequence;
//! }
//! ```

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender};

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// Record was inserted.
    Insert,
    /// Record was updated.
    Update,
    /// Record was deleted.
    Delete,
    /// Record identifier changed.
    Rename,
}

/// One committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Position in the feed; 0 until published.
    pub sequence: u64,
    /// Entity kind the write was addressed to.
    pub doctype: String,
    /// Identifier of the record (the new one for renames).
    pub name: String,
    /// Kind of write.
    pub change_type: ChangeType,
    /// Previous identifier, for renames.
    pub old_name: Option<String>,
}

impl ChangeEvent {
    /// An unpublished insert, update or delete event.
    #[must_use]
    pub fn new(doctype: &str, name: &str, change_type: ChangeType) -> Self {
        Self {
            sequence: 0,
            doctype: doctype.to_string(),
            name: name.to_string(),
            change_type,
            old_name: None,
        }
    }

    /// An unpublished rename event.
    #[must_use]
    pub fn renamed(doctype: &str, old_name: &str, new_name: &str) -> Self {
        Self {
            old_name: Some(old_name.to_string()),
            ..Self::new(doctype, new_name, ChangeType::Rename)
        }
    }
}

struct Backlog {
    events: VecDeque<ChangeEvent>,
    last_sequence: u64,
}

/// Ordered, bounded record of committed writes with channel subscribers.
pub struct ChangeFeed {
    backlog: Mutex<Backlog>,
    capacity: usize,
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
}

impl ChangeFeed {
    /// A feed keeping the last `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            backlog: Mutex::new(Backlog {
                events: VecDeque::new(),
                last_sequence: 0,
            }),
            capacity,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// A channel receiving every event published from now on. Dropping the
    /// receiver unsubscribes it.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (sender, receiver) = channel();
        self.subscribers.write().push(sender);
        receiver
    }

    /// Assigns the next sequence number to `event`, keeps it in the backlog
    /// and sends it to the subscribers. Returns the sequence number.
    pub fn publish(&self, mut event: ChangeEvent) -> u64 {
        {
            let mut backlog = self.backlog.lock();
            backlog.last_sequence += 1;
            event.sequence = backlog.last_sequence;
            backlog.events.push_back(event.clone());
            while backlog.events.len() > self.capacity {
                backlog.events.pop_front();
            }
        }
        let sequence = event.sequence;
        self.subscribers
            .write()
            .retain(|sender| sender.send(event.clone()).is_ok());
        sequence
    }

    /// Up to `limit` kept events published after `cursor`.
    #[must_use]
    pub fn since(&self, cursor: u64, limit: usize) -> Vec<ChangeEvent> {
        self.backlog
            .lock()
            .events
            .iter()
            .skip_while(|event| event.sequence <= cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Sequence number of the last published event, 0 before the first.
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.backlog.lock().last_sequence
    }

    /// Number of kept events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.backlog.lock().events.len()
    }

    /// No event is kept.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live subscribers, as of the last publish.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("kept", &self.len())
            .field("capacity", &self.capacity)
            .field("last_sequence", &self.last_sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishing_numbers_events() {
        let feed = ChangeFeed::with_capacity(10);
        let receiver = feed.subscribe();
        assert_eq!(feed.publish(ChangeEvent::new("ToDo", "t1", ChangeType::Insert)), 1);
        assert_eq!(feed.publish(ChangeEvent::renamed("ToDo", "t1", "t2")), 2);

        let first = receiver.try_recv().unwrap();
        assert_eq!((first.sequence, first.name.as_str()), (1, "t1"));
        let second = receiver.try_recv().unwrap();
        assert_eq!(second.change_type, ChangeType::Rename);
        assert_eq!(second.old_name.as_deref(), Some("t1"));
        assert_eq!(feed.last_sequence(), 2);
    }

    #[test]
    fn dropped_receivers_are_forgotten() {
        let feed = ChangeFeed::with_capacity(10);
        drop(feed.subscribe());
        let _kept = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 2);
        feed.publish(ChangeEvent::new("ToDo", "t1", ChangeType::Delete));
        assert_eq!(feed.subscriber_count(), 1);
    }

    #[test]
    fn backlog_is_bounded_and_read_from_a_cursor() {
        let feed = ChangeFeed::with_capacity(3);
        assert!(feed.is_empty());
        for i in 1..=5 {
            feed.publish(ChangeEvent::new("Note", &format!("n{i}"), ChangeType::Update));
        }
        assert_eq!(feed.len(), 3);

        let names = |events: Vec<ChangeEvent>| -> Vec<String> {
            events.into_iter().map(|e| e.name).collect()
        };
        assert_eq!(names(feed.since(0, 10)), ["n3", "n4", "n5"]);
        assert_eq!(names(feed.since(3, 10)), ["n4", "n5"]);
        assert_eq!(names(feed.since(3, 1)), ["n4"]);
        assert!(feed.since(5, 10).is_empty());
    }
}
