//! # Sync events.

use async_channel::{self as channel, Receiver, Sender, TrySendError};

use crate::sync::SyncState;

/// Event channel.
#[derive(Debug, Clone)]
pub struct Events {
    receiver: Receiver<Event>,
    sender: Sender<Event>,
}

impl Default for Events {
    fn default() -> Self {
        Self::new()
    }
}

impl Events {
    /// Creates a new event channel.
    pub fn new() -> Self {
        let (sender, receiver) = channel::bounded(1_000);

        Self { receiver, sender }
    }

    /// Emits an event.
    pub fn emit(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                // when we are full, we pop remove the oldest event and push on the new one
                let _ = self.receiver.try_recv();

                // try again
                self.emit(event);
            }
            Err(TrySendError::Closed(_)) => {
                unreachable!("unable to emit event, channel disconnected");
            }
        }
    }

    /// Creates an event emitter.
    pub fn get_emitter(&self) -> EventEmitter {
        EventEmitter(self.receiver.clone())
    }
}

/// A receiver of events from a [`Context`].
///
/// [`Context`]: crate::context::Context
#[derive(Debug, Clone)]
pub struct EventEmitter(Receiver<Event>);

impl EventEmitter {
    /// Async recv of an event. Return `None` if the `Sender` has been dropped.
    pub async fn recv(&self) -> Option<Event> {
        self.0.recv().await.ok()
    }

    /// Tries to receive an event without blocking.
    pub fn try_recv(&self) -> Option<Event> {
        self.0.try_recv().ok()
    }
}

/// The event emitted by a [`Context`] from an [`EventEmitter`].
///
/// [`Context`]: crate::context::Context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// The ID of the [`Context`] which emitted this event.
    ///
    /// [`Context`]: crate::context::Context
    pub id: u32,

    /// The event payload.
    pub typ: EventType,
}

/// Event payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    /// The library-user may write an informational string to the log.
    ///
    /// This event should *not* be reported to the end-user using a popup or something like
    /// that.
    Info(String),

    /// The library-user should write a warning string to the log.
    ///
    /// This event should *not* be reported to the end-user using a popup or something like
    /// that.
    Warning(String),

    /// A sync pass drained its work queue and the folder state was persisted.
    FolderSynced {
        /// Folder name.
        folder: String,
        /// Persisted UIDNEXT.
        uid_next: u32,
    },

    /// A message was fetched and handed over to the store.
    MessageIngested {
        /// Folder name.
        folder: String,
        /// Server UID of the message.
        uid: u32,
    },

    /// A message deleted on the server was purged from the store.
    MessageDeleted { folder: String, uid: u32 },

    /// Stored flags of a message were replaced.
    FlagsChanged { folder: String, uid: u32 },

    /// The engine of a folder changed its state.
    SyncStateChanged { folder: String, state: SyncState },

    /// A notification arrived while the engine was not prepared for it,
    /// the folder needs another resynchronization.
    FolderDirty { folder: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_channel_drops_oldest() {
        let events = Events::new();
        let emitter = events.get_emitter();
        for i in 0..1_001 {
            events.emit(Event {
                id: 1,
                typ: EventType::Info(i.to_string()),
            });
        }

        let first = emitter.try_recv().unwrap();
        assert_eq!(first.typ, EventType::Info("1".to_string()));
        let mut last = first;
        while let Some(event) = emitter.try_recv() {
            last = event;
        }
        assert_eq!(last.typ, EventType::Info("1000".to_string()));
    }
}
