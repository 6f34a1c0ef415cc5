use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

/// Identifier a channel assigns to an event when it is put. Increases in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

impl EventId {
    pub fn new(sequence: u64) -> Self {
        Self(sequence)
    }

    pub fn sequence(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque payload plus optional headers. Cheap to clone, never mutated after it is put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    pub body: Bytes,
    pub headers: Arc<HashMap<String, String>>,
}

impl Event {
    pub fn new(id: EventId, body: impl Into<Bytes>) -> Self {
        Self {
            id,
            body: body.into(),
            headers: Arc::default(),
        }
    }

    pub fn with_headers(
        id: EventId,
        body: impl Into<Bytes>,
        headers: HashMap<String, String>,
    ) -> Self {
        Self {
            id,
            body: body.into(),
            headers: Arc::new(headers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_construction() {
        let event = Event::new(EventId::new(3), "hello");
        assert_eq!(event.id.sequence(), 3);
        assert_eq!(event.body, Bytes::from_static(b"hello"));
        assert!(event.headers.is_empty());
        assert_eq!(event.id.to_string(), "3");

        let headers = HashMap::from([("source".to_string(), "stdin".to_string())]);
        let event = Event::with_headers(EventId::new(4), b"raw".to_vec(), headers);
        assert_eq!(event.headers.get("source").map(String::as_str), Some("stdin"));
    }

    #[test]
    fn test_event_id_ordering() {
        assert!(EventId::new(1) < EventId::new(2));
    }
}
