//! Request-scoped diagnostic log.
//!
//! Every render request owns exactly one `DiagnosticLog`. Components append
//! human-readable progress and error entries to it, and the accumulated
//! entries are returned to the caller on both the success and the error
//! path. The log is never shared between requests.

use std::sync::Mutex;

/// An append-only, ordered sequence of log entries for one render request.
///
/// Interior mutability lets concurrent per-node hydration tasks append
/// through a shared reference; entries keep arrival order.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    entries: Mutex<Vec<String>>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single entry.
    pub fn push(&self, message: impl Into<String>) {
        let message = message.into();
        log::debug!("{}", message);
        self.entries
            .lock()
            .expect("diagnostic log poisoned")
            .push(message);
    }

    /// Append a non-string value, flattened to a `key: value` entry.
    pub fn push_kv(&self, key: &str, value: impl std::fmt::Display) {
        self.push(format!("{}: {}", key, value));
    }

    /// Snapshot of the entries recorded so far.
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("diagnostic log poisoned")
            .clone()
    }

    /// Consume the log and return its entries.
    pub fn into_entries(self) -> Vec<String> {
        self.entries
            .into_inner()
            .expect("diagnostic log poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_insertion_order() {
        let log = DiagnosticLog::new();
        log.push("first");
        log.push("second");
        log.push(String::from("third"));
        assert_eq!(log.entries(), vec!["first", "second", "third"]);
    }

    #[test]
    fn kv_entries_are_flattened() {
        let log = DiagnosticLog::new();
        log.push_kv("cacheKey", "roboto-regular-abc123");
        log.push_kv("width", 640);
        assert_eq!(
            log.into_entries(),
            vec!["cacheKey: roboto-regular-abc123", "width: 640"]
        );
    }
}
