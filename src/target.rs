use crate::event::ChangeEvent;
use crate::store::offset::Offset;

/// Per-connector policy comparing events and offsets.
///
/// The core never interprets positions itself; a connector supplies the
/// comparisons it needs. The defaults are conservative: with no override,
/// no record is ever considered behind a staged offset, so no periodic
/// checkpoint can be emitted ahead of the stream.
pub trait TargetPosition: Send + Sync {
    /// Whether this event shows the sync has reached its target position.
    fn reached(&self, event: &ChangeEvent) -> bool;

    /// Whether the event belongs to the initial bulk-read phase.
    fn is_snapshot_event(&self, event: &ChangeEvent) -> bool {
        event.snapshot_metadata().is_snapshot_event()
    }

    /// Whether two offset snapshots denote the same position.
    fn is_same_offset(&self, a: &Offset, b: &Offset) -> bool {
        a == b
    }

    /// Whether the event is causally behind the given offset, i.e. the
    /// offset already covers it.
    fn is_record_behind_offset(&self, _offset: &Offset, _event: &ChangeEvent) -> bool {
        false
    }
}

/// A target that is never reached; the sync runs until the stream stalls.
pub struct NeverReached;

impl TargetPosition for NeverReached {
    fn reached(&self, _event: &ChangeEvent) -> bool {
        false
    }
}
