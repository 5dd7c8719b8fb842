//! Observable containers and synchronous named events.
//!
//! [`Observable`] is a small publish/subscribe hub keyed by event name.
//! Listeners run synchronously, in registration order, on the thread that
//! calls [`Observable::trigger`]. A listener returning an error stops the
//! dispatch and the error is handed back to the trigger site, which is how
//! `before_*` hooks veto an operation.
//!
//! [`Container`] is the ordered field map every schema-aware object is
//! built on. Writing through [`Container::set`] fires `before_change` and
//! `after_change`.
//!
//! # Usage
//!
//! ```rust
//! use docbase_core::{Container, Event};
//! use docbase_core::Value;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let mut container = Container::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&seen);
//! container.events().on("after_change", move |_event: &Event| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//!     Ok(())
//! });
//!
//! container.set("status", Value::from("Open")).unwrap();
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! ```

use crate::error::CoreResult;
use docbase_storage::Value;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Handle returned by [`Observable::on`], used to unsubscribe.
pub type ListenerId = u64;

/// A synchronous event listener.
pub type Listener = Arc<dyn Fn(&Event) -> CoreResult<()> + Send + Sync>;

static NULL: Value = Value::Null;

/// Payload delivered to listeners.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    /// Event name (`before_change`, `after_insert`, `change:ToDo`, ...).
    pub name: String,
    /// Entity kind of the emitting record, when known.
    pub doctype: Option<String>,
    /// Identifier of the emitting record, when known.
    pub docname: Option<String>,
    /// Field that changed, for field-level events.
    pub fieldname: Option<String>,
    /// Value before the change.
    pub old_value: Value,
    /// Value after the change.
    pub new_value: Value,
}

impl Event {
    /// Creates an event with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the emitting record.
    #[must_use]
    pub fn record(mut self, doctype: impl Into<String>, docname: Option<String>) -> Self {
        self.doctype = Some(doctype.into());
        self.docname = docname;
        self
    }

    /// Sets the changed field and its values.
    #[must_use]
    pub fn field(mut self, fieldname: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        self.fieldname = Some(fieldname.into());
        self.old_value = old_value;
        self.new_value = new_value;
        self
    }

    /// Returns a copy of this event under another name.
    #[must_use]
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

#[derive(Default)]
struct Registry {
    next_id: ListenerId,
    listeners: HashMap<String, Vec<(ListenerId, Listener)>>,
    once: HashMap<String, Vec<(ListenerId, Listener)>>,
}

/// Named-event publish/subscribe hub.
#[derive(Default)]
pub struct Observable {
    registry: RwLock<Registry>,
}

impl Observable {
    /// Creates a hub with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to an event.
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Event) -> CoreResult<()> + Send + Sync + 'static,
    {
        let mut registry = self.registry.write();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .listeners
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Subscribes to the next occurrence of an event only.
    pub fn once<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Event) -> CoreResult<()> + Send + Sync + 'static,
    {
        let mut registry = self.registry.write();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .once
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut guard = self.registry.write();
        let registry = &mut *guard;
        let mut removed = false;
        for map in [&mut registry.listeners, &mut registry.once] {
            if let Some(list) = map.get_mut(event) {
                let before = list.len();
                list.retain(|(lid, _)| *lid != id);
                removed |= list.len() != before;
            }
        }
        removed
    }

    /// Fires an event. Regular listeners run first, then one-shot listeners,
    /// which are dropped whether or not they succeed.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by a listener; later listeners
    /// are not called.
    pub fn trigger(&self, event: &str, payload: &Event) -> CoreResult<()> {
        let listeners: Vec<Listener> = {
            let registry = self.registry.read();
            registry
                .listeners
                .get(event)
                .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
                .unwrap_or_default()
        };
        let once: Vec<Listener> = {
            let mut registry = self.registry.write();
            registry
                .once
                .remove(event)
                .map(|list| list.into_iter().map(|(_, l)| l).collect())
                .unwrap_or_default()
        };

        for listener in listeners.iter().chain(once.iter()) {
            listener(payload)?;
        }
        Ok(())
    }

    /// Number of listeners (regular and one-shot) for an event.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        let registry = self.registry.read();
        registry.listeners.get(event).map_or(0, Vec::len)
            + registry.once.get(event).map_or(0, Vec::len)
    }

    /// Drops every listener.
    pub fn clear_listeners(&self) {
        let mut registry = self.registry.write();
        registry.listeners.clear();
        registry.once.clear();
    }
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.read();
        let mut events: Vec<&String> = registry.listeners.keys().chain(registry.once.keys()).collect();
        events.sort();
        events.dedup();
        f.debug_struct("Observable").field("events", &events).finish()
    }
}

/// Ordered key/value map with change events.
#[derive(Debug, Default)]
pub struct Container {
    values: IndexMap<String, Value>,
    events: Observable,
}

impl Container {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns the value for a key, `Null` when absent.
    #[must_use]
    pub fn value(&self, key: &str) -> &Value {
        self.values.get(key).unwrap_or(&NULL)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Sets a value, firing `before_change` and `after_change`.
    ///
    /// # Errors
    ///
    /// Returns the error of a listener; a failing `before_change` leaves
    /// the old value in place.
    pub fn set(&mut self, key: &str, value: Value) -> CoreResult<()> {
        let old = self.value(key).clone();
        let event = Event::default().field(key, old, value.clone());
        self.events
            .trigger("before_change", &event.renamed("before_change"))?;
        self.values.insert(key.to_string(), value);
        self.events
            .trigger("after_change", &event.renamed("after_change"))
    }

    /// Sets a value without firing events. Returns the previous value.
    pub fn set_raw(&mut self, key: &str, value: Value) -> Option<Value> {
        self.values.insert(key.to_string(), value)
    }

    /// Removes a key, keeping the order of the remaining ones.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.shift_remove(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Removes every key. Listeners are kept.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// The event hub of this container.
    #[must_use]
    pub fn events(&self) -> &Observable {
        &self.events
    }
}

impl Clone for Container {
    /// Copies the values. Listeners stay with the original.
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            events: Observable::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use parking_lot::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> impl Fn(&Event) -> CoreResult<()> {
        let log = Arc::clone(log);
        move |event: &Event| {
            log.lock().push(format!("{tag}:{}", event.name));
            Ok(())
        }
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let hub = Observable::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        hub.on("save", recorder(&log, "a"));
        hub.on("save", recorder(&log, "b"));
        hub.on("other", recorder(&log, "c"));

        hub.trigger("save", &Event::new("save")).unwrap();
        assert_eq!(*log.lock(), vec!["a:save", "b:save"]);
    }

    #[test]
    fn once_listeners_fire_once() {
        let hub = Observable::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        hub.once("ping", recorder(&log, "once"));
        assert_eq!(hub.listener_count("ping"), 1);

        hub.trigger("ping", &Event::new("ping")).unwrap();
        hub.trigger("ping", &Event::new("ping")).unwrap();
        assert_eq!(log.lock().len(), 1);
        assert_eq!(hub.listener_count("ping"), 0);
    }

    #[test]
    fn off_removes_listener() {
        let hub = Observable::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = hub.on("x", recorder(&log, "a"));
        assert!(hub.off("x", id));
        assert!(!hub.off("x", id));
        hub.trigger("x", &Event::new("x")).unwrap();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn failing_listener_stops_dispatch() {
        let hub = Observable::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        hub.on("x", |_: &Event| Err(CoreError::validation("vetoed")));
        hub.on("x", recorder(&log, "late"));

        let err = hub.trigger("x", &Event::new("x")).unwrap_err();
        assert_eq!(err.to_string(), "vetoed");
        assert!(log.lock().is_empty());
    }

    #[test]
    fn container_set_fires_change_events() {
        let mut container = Container::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&log);
        container.events().on("before_change", move |e: &Event| {
            seen.lock()
                .push(format!("before {:?} -> {:?}", e.old_value, e.new_value));
            Ok(())
        });
        container.events().on("after_change", recorder(&log, "after"));

        container.set("qty", Value::Int(3)).unwrap();
        assert_eq!(container.value("qty"), &Value::Int(3));
        assert_eq!(
            *log.lock(),
            vec!["before Null -> Int(3)", "after:after_change"]
        );
    }

    #[test]
    fn vetoed_change_keeps_old_value() {
        let mut container = Container::new();
        container.set_raw("status", Value::from("Open"));
        container
            .events()
            .on("before_change", |_: &Event| Err(CoreError::validation("locked")));

        assert!(container.set("status", Value::from("Closed")).is_err());
        assert_eq!(container.value("status"), &Value::from("Open"));
    }

    #[test]
    fn container_preserves_order() {
        let mut container = Container::new();
        container.set_raw("b", Value::Int(1));
        container.set_raw("a", Value::Int(2));
        container.set_raw("c", Value::Int(3));
        container.remove("a");
        assert_eq!(container.keys().collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(container.value("missing"), &Value::Null);

        let copy = container.clone();
        assert_eq!(copy.len(), 2);
        assert_eq!(copy.events().listener_count("after_change"), 0);
    }
}
