//! The immutable message unit routed between cells.
//!
//! An [`Event`] is a non-empty topic plus a [`Payload`], optionally carrying
//! an opaque scene token and, by convention under [`topics::KEY_REPLY`],
//! a one-shot [`ReplySlot`] for the request/response pattern.
//!
//! ## Rules
//! - Events and payloads are **read-many/write-once**: [`Payload::apply`]
//!   returns a new payload merging values (rightmost wins) and never
//!   mutates the original. Clones share the underlying map.
//! - The reply slot answers exactly once; later replies fail.
//!
//! ## Example
//! ```
//! use hive::{Event, Payload, Value};
//!
//! let payload = Payload::new([("who", "foo")]);
//! let richer = payload.apply([("who", Value::from("bar")), ("count", Value::Int(1))]);
//!
//! assert_eq!(payload.text("who"), Some("foo"));   // original untouched
//! assert_eq!(richer.text("who"), Some("bar"));    // rightmost wins
//!
//! let event = Event::new("ping?", richer).expect("topic not empty");
//! assert_eq!(event.topic(), "ping?");
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use crate::error::CellError;

/// Reserved topic strings and payload keys used by convention.
pub mod topics {
    /// Ask a collecting behavior for its processed events.
    pub const PROCESSED: &str = "processed?";
    /// Ask a behavior to drop its accumulated state.
    pub const RESET: &str = "reset!";
    /// Liveness probe.
    pub const PING: &str = "ping?";
    /// Liveness answer.
    pub const PONG: &str = "pong!";
    /// Payload key smuggling a one-shot reply slot through the payload map
    /// for the request/response pattern.
    pub const KEY_REPLY: &str = "reply:slot";
}

/// A payload value.
///
/// `Reply` carries the one-shot slot of the request pattern; it compares
/// unequal to everything, including itself.
#[derive(Clone, Debug)]
pub enum Value {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Ordered list of values.
    List(Vec<Value>),
    /// One-shot reply slot (request pattern).
    Reply(ReplySlot),
}

impl Value {
    /// Returns the contained boolean, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the contained integer, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the contained float, if this is a `Float`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the contained text, if this is a `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Returns the contained list, if this is a `List`.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Returns the contained reply slot, if this is a `Reply`.
    pub fn as_reply(&self) -> Option<&ReplySlot> {
        match self {
            Value::Reply(r) => Some(r),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            // Reply slots are identities, not values.
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<ReplySlot> for Value {
    fn from(v: ReplySlot) -> Self {
        Value::Reply(v)
    }
}

/// Cloneable one-shot reply channel.
///
/// Created by [`ReplySlot::new`]; every clone shares the same underlying
/// sender, and the first successful [`ReplySlot::reply`] consumes it.
#[derive(Clone)]
pub struct ReplySlot {
    tx: Arc<Mutex<Option<oneshot::Sender<Result<Value, CellError>>>>>,
}

impl ReplySlot {
    /// Creates a slot and the receiver its answer arrives on.
    pub fn new() -> (ReplySlot, oneshot::Receiver<Result<Value, CellError>>) {
        let (tx, rx) = oneshot::channel();
        (
            ReplySlot {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Answers the request exactly once.
    ///
    /// An `Err` value travels the same channel and becomes the requester's
    /// error. Replying twice, or after the requester gave up, fails.
    pub fn reply(&self, result: Result<Value, CellError>) -> Result<(), CellError> {
        let sender = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => tx
                .send(result)
                .map_err(|_| CellError::failed("requester abandoned the reply slot")),
            None => Err(CellError::failed("reply slot already consumed")),
        }
    }

    /// Returns `true` while no reply has been sent yet.
    pub fn is_pending(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl fmt::Debug for ReplySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_pending() { "pending" } else { "consumed" };
        write!(f, "ReplySlot({state})")
    }
}

/// Immutable ordered key→value mapping carried by events.
///
/// Cheap to clone; all clones share the same map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Payload {
    values: Arc<BTreeMap<String, Value>>,
}

impl Payload {
    /// Returns the payload with no values.
    pub fn empty() -> Payload {
        Payload::default()
    }

    /// Builds a payload from key/value pairs.
    pub fn new<I, K, V>(values: I) -> Payload
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Payload::empty().apply(values)
    }

    /// Returns a new payload merging `values` over this one.
    ///
    /// The rightmost occurrence of a key wins; the original payload is
    /// never mutated.
    pub fn apply<I, K, V>(&self, values: I) -> Payload
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut merged = (*self.values).clone();
        for (key, value) in values {
            merged.insert(key.into(), value.into());
        }
        Payload {
            values: Arc::new(merged),
        }
    }

    /// Returns a new payload merging another payload over this one.
    pub fn merged(&self, other: &Payload) -> Payload {
        self.apply(
            other
                .values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        )
    }

    /// Looks up a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Looks up a text value by key.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_text)
    }

    /// Looks up an integer value by key.
    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_int)
    }

    /// Looks up a float value by key.
    pub fn float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_float)
    }

    /// Looks up a boolean value by key.
    pub fn bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Returns the reply slot stored under [`topics::KEY_REPLY`], if any.
    pub fn reply_slot(&self) -> Option<&ReplySlot> {
        self.get(topics::KEY_REPLY).and_then(Value::as_reply)
    }

    /// Number of values in the payload.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when the payload has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates the keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// The immutable message unit routed between cells.
#[derive(Clone, Debug)]
pub struct Event {
    topic: Arc<str>,
    payload: Payload,
    scene: Option<Arc<str>>,
}

impl Event {
    /// Creates an event; the topic must not be empty.
    pub fn new(topic: impl Into<String>, payload: Payload) -> Result<Event, CellError> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(CellError::EmptyTopic);
        }
        Ok(Event {
            topic: Arc::from(topic),
            payload,
            scene: None,
        })
    }

    /// Returns the topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns the opaque scene token, if one is attached.
    pub fn scene(&self) -> Option<&str> {
        self.scene.as_deref()
    }

    /// Attaches a causal scene token.
    pub fn with_scene(mut self, scene: impl Into<Arc<str>>) -> Event {
        self.scene = Some(scene.into());
        self
    }

    /// Answers the reply slot carried in the payload.
    ///
    /// Fails when the event carries no slot or the slot was already
    /// consumed.
    pub fn respond(&self, result: Result<Value, CellError>) -> Result<(), CellError> {
        match self.payload.reply_slot() {
            Some(slot) => slot.reply(result),
            None => Err(CellError::failed("event carries no reply slot")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_topic_rejected() {
        let err = Event::new("", Payload::empty()).expect_err("empty topic");
        assert_eq!(err, CellError::EmptyTopic);
    }

    #[test]
    fn test_apply_never_mutates_original() {
        let first = Payload::new([("a", 1), ("b", 2)]);
        let second = first.apply([("b", 20), ("c", 30)]);

        assert_eq!(first.int("b"), Some(2));
        assert_eq!(first.get("c"), None);
        assert_eq!(second.int("a"), Some(1));
        assert_eq!(second.int("b"), Some(20));
        assert_eq!(second.int("c"), Some(30));
    }

    #[test]
    fn test_merged_rightmost_wins() {
        let base = Payload::new([("k", "old")]);
        let over = Payload::new([("k", "new")]);
        assert_eq!(base.merged(&over).text("k"), Some("new"));
        assert_eq!(over.merged(&base).text("k"), Some("old"));
    }

    #[test]
    fn test_typed_getters() {
        let payload = Payload::new([
            ("flag", Value::Bool(true)),
            ("count", Value::Int(42)),
            ("ratio", Value::Float(0.5)),
            ("name", Value::Text("hive".into())),
        ]);
        assert_eq!(payload.bool("flag"), Some(true));
        assert_eq!(payload.int("count"), Some(42));
        assert_eq!(payload.float("ratio"), Some(0.5));
        assert_eq!(payload.text("name"), Some("hive"));
        assert_eq!(payload.int("name"), None);
        assert_eq!(payload.len(), 4);
    }

    #[test]
    fn test_keys_are_ordered() {
        let payload = Payload::new([("zeta", 1), ("alpha", 2), ("mid", 3)]);
        let keys: Vec<&str> = payload.keys().collect();
        assert_eq!(keys, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_reply_slot_answers_once() {
        let (slot, rx) = ReplySlot::new();
        let event = Event::new(
            topics::PING,
            Payload::new([(topics::KEY_REPLY, Value::Reply(slot))]),
        )
        .expect("event");

        assert!(event.payload().reply_slot().is_some());
        event
            .respond(Ok(Value::Text("pong!".into())))
            .expect("first reply");
        let err = event
            .respond(Ok(Value::Bool(true)))
            .expect_err("second reply fails");
        assert_eq!(err.as_label(), "behavior_failed");

        let answer = rx.await.expect("reply arrives").expect("no error");
        assert_eq!(answer, Value::Text("pong!".into()));
    }

    #[test]
    fn test_respond_without_slot_fails() {
        let event = Event::new(topics::PING, Payload::empty()).expect("event");
        assert!(event.respond(Ok(Value::Bool(true))).is_err());
    }

    #[test]
    fn test_scene_travels_with_clones() {
        let event = Event::new("observe", Payload::empty())
            .expect("event")
            .with_scene("scene-42");
        let clone = event.clone();
        assert_eq!(clone.scene(), Some("scene-42"));
    }

    #[test]
    fn test_reply_values_compare_unequal() {
        let (a, _rx_a) = ReplySlot::new();
        let va = Value::Reply(a.clone());
        assert_ne!(va, Value::Reply(a));
        assert_eq!(Value::Int(1), Value::Int(1));
    }
}
