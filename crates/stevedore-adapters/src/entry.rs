//! Scraped log entries and their extenders.

use serde_json::Value;
use stevedore_core::runenv;
use tokio::sync::mpsc;

/// One scraped log line as a flat key-value store.
pub type Entry = serde_json::Map<String, Value>;

/// Extends log entries with additional data.
pub trait Extender: Send + Sync {
    /// Returns a new entry based on the passed one. The original is not
    /// modified; duplicate keys are overwritten in the result.
    fn extend(&self, entry: Entry) -> Entry;
}

/// Adds a fixed data set to every entry.
pub struct StaticDataExtender {
    pub data: Entry,
}

impl Extender for StaticDataExtender {
    fn extend(&self, mut entry: Entry) -> Entry {
        for (key, value) in &self.data {
            entry.insert(key.clone(), value.clone());
        }
        entry
    }
}

/// Adds host facts (hostname, region, availability zone) to every entry,
/// when the runtime environment publishes them.
pub struct SystemDataExtender;

impl Extender for SystemDataExtender {
    fn extend(&self, mut entry: Entry) -> Entry {
        if let Some(hostname) = runenv::hostname() {
            entry.insert("srchost".into(), Value::String(hostname));
        }
        if let Some(region) = runenv::region() {
            entry.insert("region".into(), Value::String(region));
        }
        if let Some(zone) = runenv::availability_zone() {
            entry.insert("zone".into(), Value::String(zone));
        }
        entry
    }
}

/// Returns a channel delivering entries from `input` with every extender
/// applied, in order.
pub fn extend(
    mut input: mpsc::Receiver<Entry>,
    extenders: Vec<Box<dyn Extender>>,
) -> mpsc::Receiver<Entry> {
    if extenders.is_empty() {
        return input;
    }
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        while let Some(entry) = input.recv().await {
            let extended = extenders
                .iter()
                .fold(entry, |entry, extender| extender.extend(entry));
            if tx.send(extended).await.is_err() {
                break;
            }
        }
    });
    rx
}
