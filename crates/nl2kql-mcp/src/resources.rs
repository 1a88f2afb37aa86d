//! Resource registry with subscription and notification semantics.
//!
//! Resources live for the process lifetime, from registration until explicit
//! removal. Every mutation is atomic with respect to other mutations: one
//! mutex guards both the record map and the subscription set. Change
//! notifications are best-effort and never fail the mutation that triggered
//! them.

use crate::error::McpError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Outbound notification channel to the owning server session.
/// Fire-and-forget: implementations log delivery failures and return.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, method: &str, params: Option<Value>);
}

/// A sink that drops every notification. Useful when no session is attached.
pub struct NullNotificationSink;

impl NotificationSink for NullNotificationSink {
    fn notify(&self, _method: &str, _params: Option<Value>) {}
}

/// Metadata for one registered resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Unique key.
    pub uri: String,
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form properties, e.g. the query that produced a CSV file.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
}

#[derive(Default)]
struct RegistryState {
    resources: HashMap<String, ResourceRecord>,
    subscriptions: HashSet<String>,
}

/// Process-lifetime registry of resources and subscribed URIs.
pub struct ResourceRegistry {
    state: Mutex<RegistryState>,
    sink: Arc<dyn NotificationSink>,
}

impl ResourceRegistry {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            sink,
        }
    }

    /// Register a new resource. Duplicate URIs are an error, not an
    /// overwrite; use [`ResourceRegistry::update`] for overwrites.
    pub fn add(&self, record: ResourceRecord) -> Result<(), McpError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.resources.contains_key(&record.uri) {
                return Err(McpError::ResourceExists { uri: record.uri });
            }
            state.resources.insert(record.uri.clone(), record);
        }

        self.sink.notify("notifications/resources/list_changed", None);
        Ok(())
    }

    /// Remove a resource. Missing URIs are an error.
    pub fn remove(&self, uri: &str) -> Result<(), McpError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.resources.remove(uri).is_none() {
                return Err(McpError::ResourceNotFound {
                    uri: uri.to_string(),
                });
            }
        }

        self.sink.notify("notifications/resources/list_changed", None);
        Ok(())
    }

    /// Overwrite an existing resource. Subscribers to the URI are notified;
    /// an unsubscribed URI emits nothing.
    pub fn update(&self, record: ResourceRecord) -> Result<(), McpError> {
        let subscribed = {
            let mut state = self.state.lock().unwrap();
            if !state.resources.contains_key(&record.uri) {
                return Err(McpError::ResourceNotFound { uri: record.uri });
            }
            let subscribed = state.subscriptions.contains(&record.uri);
            let uri = record.uri.clone();
            state.resources.insert(uri.clone(), record);
            subscribed.then_some(uri)
        };

        if let Some(uri) = subscribed {
            self.sink
                .notify("notifications/resources/updated", Some(json!({ "uri": uri })));
        }
        Ok(())
    }

    /// Look up a resource. Absence is not an error.
    pub fn get(&self, uri: &str) -> Option<ResourceRecord> {
        self.state.lock().unwrap().resources.get(uri).cloned()
    }

    /// All current records, order unspecified.
    pub fn list(&self) -> Vec<ResourceRecord> {
        self.state.lock().unwrap().resources.values().cloned().collect()
    }

    /// Subscribe to change notifications for a URI. The URI does not have to
    /// name an existing resource.
    pub fn subscribe(&self, uri: &str) {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(uri.to_string());
    }

    /// Drop a subscription. Unsubscribing a URI that was never subscribed is
    /// an error.
    pub fn unsubscribe(&self, uri: &str) -> Result<(), McpError> {
        if !self.state.lock().unwrap().subscriptions.remove(uri) {
            return Err(McpError::SubscriptionNotFound {
                uri: uri.to_string(),
            });
        }
        Ok(())
    }
}

/// MIME types starting with `application/`, `image/`, or `video/` are served
/// as binary blobs; everything else as text.
pub fn is_binary_mime(mime_type: &str) -> bool {
    mime_type.starts_with("application/")
        || mime_type.starts_with("image/")
        || mime_type.starts_with("video/")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Sink recording every notification it is asked to deliver.
    pub(crate) struct RecordingSink {
        pub notifications: Mutex<Vec<(String, Option<Value>)>>,
    }

    impl RecordingSink {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                notifications: Mutex::new(Vec::new()),
            })
        }

        fn methods(&self) -> Vec<String> {
            self.notifications
                .lock()
                .unwrap()
                .iter()
                .map(|(m, _)| m.clone())
                .collect()
        }
    }

    impl NotificationSink for RecordingSink {
        fn notify(&self, method: &str, params: Option<Value>) {
            self.notifications
                .lock()
                .unwrap()
                .push((method.to_string(), params));
        }
    }

    fn record(uri: &str) -> ResourceRecord {
        ResourceRecord {
            uri: uri.to_string(),
            name: "results.csv".to_string(),
            mime_type: "text/csv".to_string(),
            size: Some(128),
            description: None,
            properties: HashMap::new(),
        }
    }

    #[test]
    fn add_twice_is_a_conflict() {
        let sink = RecordingSink::new();
        let registry = ResourceRegistry::new(sink.clone());

        registry.add(record("/tmp/a.csv")).unwrap();
        let err = registry.add(record("/tmp/a.csv")).unwrap_err();
        assert!(matches!(err, McpError::ResourceExists { .. }));

        // Only the successful add announced a change.
        assert_eq!(sink.methods(), vec!["notifications/resources/list_changed"]);
    }

    #[test]
    fn remove_then_get_returns_none() {
        let registry = ResourceRegistry::new(RecordingSink::new());
        registry.add(record("/tmp/a.csv")).unwrap();
        registry.remove("/tmp/a.csv").unwrap();
        assert!(registry.get("/tmp/a.csv").is_none());

        let err = registry.remove("/tmp/a.csv").unwrap_err();
        assert!(matches!(err, McpError::ResourceNotFound { .. }));
    }

    #[test]
    fn update_notifies_only_subscribers() {
        let sink = RecordingSink::new();
        let registry = ResourceRegistry::new(sink.clone());
        registry.add(record("/tmp/a.csv")).unwrap();

        registry.update(record("/tmp/a.csv")).unwrap();
        assert!(!sink.methods().contains(&"notifications/resources/updated".to_string()));

        registry.subscribe("/tmp/a.csv");
        registry.update(record("/tmp/a.csv")).unwrap();

        let notifications = sink.notifications.lock().unwrap();
        let (method, params) = notifications.last().unwrap();
        assert_eq!(method, "notifications/resources/updated");
        assert_eq!(params.as_ref().unwrap()["uri"], "/tmp/a.csv");
    }

    #[test]
    fn update_of_missing_resource_fails() {
        let registry = ResourceRegistry::new(RecordingSink::new());
        let err = registry.update(record("/tmp/a.csv")).unwrap_err();
        assert!(matches!(err, McpError::ResourceNotFound { .. }));
    }

    #[test]
    fn unsubscribe_without_subscription_fails() {
        let registry = ResourceRegistry::new(RecordingSink::new());
        let err = registry.unsubscribe("/tmp/a.csv").unwrap_err();
        assert!(matches!(err, McpError::SubscriptionNotFound { .. }));
    }

    #[test]
    fn subscription_may_precede_the_resource() {
        let registry = ResourceRegistry::new(RecordingSink::new());
        registry.subscribe("/tmp/future.csv");
        assert!(registry.get("/tmp/future.csv").is_none());
        registry.unsubscribe("/tmp/future.csv").unwrap();
    }

    #[test]
    fn classifies_binary_mime_types() {
        assert!(is_binary_mime("application/octet-stream"));
        assert!(is_binary_mime("image/png"));
        assert!(is_binary_mime("video/mp4"));
        assert!(!is_binary_mime("text/csv"));
        assert!(!is_binary_mime("text/plain"));
    }
}
