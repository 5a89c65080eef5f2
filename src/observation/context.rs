//! Observation data model.
//!
//! An [`Observation`] is one traced and measured unit of work. It is owned by
//! the code path that started it (through its handle); handlers only borrow it
//! for the duration of a callback.

use std::fmt;

use axum::http::{Extensions, HeaderMap};

/// Role of the observed operation, used by handlers to decide support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationKind {
    /// Outbound request (e.g. an HTTP client call).
    Client,
    /// Inbound request handled by this process.
    Server,
    /// Message sent to a broker.
    Producer,
    /// Message received from a broker.
    Consumer,
    /// Local unit of work with no remote peer.
    Internal,
}

impl ObservationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationKind::Client => "client",
            ObservationKind::Server => "server",
            ObservationKind::Producer => "producer",
            ObservationKind::Consumer => "consumer",
            ObservationKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationStatus {
    NotStarted,
    Running,
    Stopped,
    Errored,
}

impl ObservationStatus {
    /// True once stop or error has been signalled.
    pub fn is_closed(self) -> bool {
        matches!(self, ObservationStatus::Stopped | ObservationStatus::Errored)
    }
}

impl fmt::Display for ObservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObservationStatus::NotStarted => "not-started",
            ObservationStatus::Running => "running",
            ObservationStatus::Stopped => "stopped",
            ObservationStatus::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// A single key/value attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// Attribute set kept sorted by key, one value per key.
///
/// Sorting makes two sets with the same content compare and hash equal, which
/// is what meter identities rely on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeyValues(Vec<KeyValue>);

impl KeyValues {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert or replace the value for `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.binary_search_by(|kv| kv.key.as_str().cmp(key.as_str())) {
            Ok(pos) => self.0[pos].value = value,
            Err(pos) => self.0.insert(pos, KeyValue { key, value }),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .binary_search_by(|kv| kv.key.as_str().cmp(key))
            .ok()
            .map(|pos| self.0[pos].value.as_str())
    }

    /// Copy every entry of `other` into `self`, replacing existing keys.
    pub fn extend_from(&mut self, other: &KeyValues) {
        for kv in other.iter() {
            self.insert(kv.key.clone(), kv.value.clone());
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KeyValue> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for KeyValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut kvs = KeyValues::new();
        for (k, v) in iter {
            kvs.insert(k, v);
        }
        kvs
    }
}

impl<'a> IntoIterator for &'a KeyValues {
    type Item = &'a KeyValue;
    type IntoIter = std::slice::Iter<'a, KeyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Renders as `[tag(k=v),tag(k=v)]`.
impl fmt::Display for KeyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, kv) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "tag({}={})", kv.key, kv.value)?;
        }
        f.write_str("]")
    }
}

/// Why an observation was closed with an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationCause {
    kind: String,
    message: String,
}

impl ObservationCause {
    /// `kind` is low cardinality (it becomes the `error` meter tag).
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn from_error(kind: impl Into<String>, error: &dyn std::error::Error) -> Self {
        Self::new(kind, error.to_string())
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ObservationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A named point-in-time event signalled on a running observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationEvent {
    name: String,
}

impl ObservationEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One traced unit of work.
#[derive(Debug)]
pub struct Observation {
    name: String,
    kind: ObservationKind,
    contextual_name: Option<String>,
    low_cardinality: KeyValues,
    high_cardinality: KeyValues,
    /// Headers used to inject (client) or extract (server) trace context.
    carrier: HeaderMap,
    /// Handler-owned per-observation state, one store per dispatch slot.
    states: Vec<Extensions>,
    slot: usize,
    status: ObservationStatus,
    error: Option<ObservationCause>,
}

impl Observation {
    pub fn new(name: impl Into<String>, kind: ObservationKind) -> Self {
        Self {
            name: name.into(),
            kind,
            contextual_name: None,
            low_cardinality: KeyValues::new(),
            high_cardinality: KeyValues::new(),
            carrier: HeaderMap::new(),
            states: vec![Extensions::new()],
            slot: 0,
            status: ObservationStatus::NotStarted,
            error: None,
        }
    }

    pub fn with_contextual_name(mut self, name: impl Into<String>) -> Self {
        self.contextual_name = Some(name.into());
        self
    }

    pub fn with_low_cardinality(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.low_cardinality.insert(key, value);
        self
    }

    pub fn with_high_cardinality(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.high_cardinality.insert(key, value);
        self
    }

    pub fn with_carrier(mut self, carrier: HeaderMap) -> Self {
        self.carrier = carrier;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ObservationKind {
        self.kind
    }

    pub fn contextual_name(&self) -> Option<&str> {
        self.contextual_name.as_deref()
    }

    pub fn set_contextual_name(&mut self, name: impl Into<String>) {
        self.contextual_name = Some(name.into());
    }

    /// Key values that are safe to use as meter tags.
    pub fn low_cardinality(&self) -> &KeyValues {
        &self.low_cardinality
    }

    /// Key values that only end up on spans (URLs, ids).
    pub fn high_cardinality(&self) -> &KeyValues {
        &self.high_cardinality
    }

    pub fn add_low_cardinality(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.low_cardinality.insert(key, value);
    }

    pub fn add_high_cardinality(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.high_cardinality.insert(key, value);
    }

    pub fn carrier(&self) -> &HeaderMap {
        &self.carrier
    }

    pub fn carrier_mut(&mut self) -> &mut HeaderMap {
        &mut self.carrier
    }

    /// State of the handler currently being dispatched.
    ///
    /// Every selected handler gets its own store, so two handlers of the same
    /// type (or one handler selected by two groups) never see each other's
    /// values.
    pub fn state(&self) -> &Extensions {
        &self.states[self.slot]
    }

    pub fn state_mut(&mut self) -> &mut Extensions {
        &mut self.states[self.slot]
    }

    /// Point `state`/`state_mut` at the store of dispatch slot `slot`.
    pub(crate) fn enter_slot(&mut self, slot: usize) {
        if self.states.len() <= slot {
            self.states.resize_with(slot + 1, Extensions::new);
        }
        self.slot = slot;
    }

    pub fn status(&self) -> ObservationStatus {
        self.status
    }

    pub fn error(&self) -> Option<&ObservationCause> {
        self.error.as_ref()
    }

    pub(crate) fn set_status(&mut self, status: ObservationStatus) {
        self.status = status;
    }

    pub(crate) fn set_error(&mut self, cause: ObservationCause) {
        self.error = Some(cause);
    }
}
