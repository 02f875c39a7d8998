//! Context module.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::Config;
use crate::events::{Event, EventEmitter, EventType, Events};

/// The context of one account's synchronization.
///
/// Cheap to clone, all clones share the configuration and the event channel.
#[derive(Clone, Debug)]
pub struct Context {
    pub(crate) inner: Arc<InnerContext>,
}

impl Deref for Context {
    type Target = InnerContext;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Actual context, expensive to clone.
#[derive(Debug)]
pub struct InnerContext {
    /// ID of this context, used to tell apart events of different contexts.
    pub(crate) id: u32,

    /// Configuration overriding the defaults of [`Config`] keys.
    config: RwLock<BTreeMap<Config, String>>,

    events: Events,
}

/// The next context ID.
static CONTEXT_ID: AtomicU32 = AtomicU32::new(1);

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates a new context with its own event channel.
    pub fn new() -> Self {
        Self::with_events(Events::new())
    }

    /// Creates a new context emitting to the given event channel.
    ///
    /// Useful to share one channel between the contexts of several folders.
    pub fn with_events(events: Events) -> Self {
        let id = CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let inner = InnerContext {
            id,
            config: RwLock::new(BTreeMap::new()),
            events,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Returns the context ID.
    pub fn get_id(&self) -> u32 {
        self.id
    }

    /// Emits a single event.
    pub fn emit_event(&self, event: EventType) {
        self.events.emit(Event {
            id: self.id,
            typ: event,
        });
    }

    /// Returns a receiver for emitted events.
    pub fn get_event_emitter(&self) -> EventEmitter {
        self.events.get_emitter()
    }

    pub(crate) fn config_overrides(&self) -> &RwLock<BTreeMap<Config, String>> {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = Context::new();
        let b = Context::new();
        assert_ne!(a.get_id(), b.get_id());
    }

    #[test]
    fn test_clone_shares_config_and_events() {
        let a = Context::new();
        let b = a.clone();
        b.set_config(Config::MaxReentries, Some("1")).unwrap();
        assert_eq!(a.get_config(Config::MaxReentries).as_deref(), Some("1"));

        let emitter = a.get_event_emitter();
        b.emit_event(EventType::Info("hello".to_string()));
        let event = emitter.try_recv().unwrap();
        assert_eq!(event.id, a.get_id());
        assert_eq!(event.typ, EventType::Info("hello".to_string()));
    }

    #[test]
    fn test_shared_event_channel() {
        let events = Events::new();
        let emitter = events.get_emitter();
        let a = Context::with_events(events.clone());
        let b = Context::with_events(events);
        a.emit_event(EventType::Info("a".to_string()));
        b.emit_event(EventType::Info("b".to_string()));
        assert_eq!(emitter.try_recv().unwrap().id, a.get_id());
        assert_eq!(emitter.try_recv().unwrap().id, b.get_id());
    }
}
