use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An immutable change event flowing through the pipeline.
///
/// The payload is opaque to the core: `value` carries the structured
/// before/after/source envelope produced by the capture engine, and the
/// core only inspects the `source.snapshot` marker. An event whose value
/// is null at the engine boundary is a tombstone and is filtered before
/// it ever reaches the queue, so `value` here is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub key: Option<Value>,
    pub value: Value,
}

impl ChangeEvent {
    pub fn new(key: Option<Value>, value: Value) -> Self {
        Self { key, value }
    }

    /// Snapshot-phase classification derived from the event's own metadata.
    pub fn snapshot_metadata(&self) -> SnapshotMetadata {
        SnapshotMetadata::from_value(self.value.get("source").and_then(|s| s.get("snapshot")))
    }
}

/// Classification of an event as belonging to the initial bulk-read phase
/// or the streaming phase, read from the engine's `source.snapshot` marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotMetadata {
    /// Snapshot in progress.
    True,
    /// Final record of the snapshot phase.
    Last,
    /// Streaming phase.
    False,
}

impl SnapshotMetadata {
    pub fn from_value(marker: Option<&Value>) -> Self {
        match marker {
            Some(Value::Bool(true)) => SnapshotMetadata::True,
            Some(Value::String(s)) => match s.as_str() {
                "true" => SnapshotMetadata::True,
                "last" => SnapshotMetadata::Last,
                _ => SnapshotMetadata::False,
            },
            _ => SnapshotMetadata::False,
        }
    }

    /// True for events produced during the bulk-read phase, including the
    /// final snapshot record.
    pub fn is_snapshot_event(&self) -> bool {
        matches!(self, SnapshotMetadata::True | SnapshotMetadata::Last)
    }

    /// The snapshot counts as finished once the marker is anything other
    /// than an in-progress `true` (the `last` record closes the phase).
    pub fn snapshot_finished(&self) -> bool {
        !matches!(self, SnapshotMetadata::True)
    }
}
