//! Checkpoint decoration of the record stream.
//!
//! [`CheckpointingIterator`] wraps a [`RecordSource`] and interleaves
//! [`Checkpoint`] messages into the output. A checkpoint is staged when a
//! record-count or elapsed-time threshold fires and the store's offset has
//! advanced, but it is only *armed*, and emitted on the following call,
//! once a record is seen that is causally behind the staged offset. That
//! deferral is what guarantees an emitted checkpoint is never ahead of the
//! records already streamed. One final checkpoint is always emitted at
//! stream end, even if no threshold ever fired.
//!
//! # Example
//!
//! ```rust,no_run
//! use cdc_bridge::{CheckpointingIterator, CheckpointConfig, PipelineMessage};
//! # use cdc_bridge::{RecordSource, TargetPosition, OffsetStore};
//! # use std::sync::Arc;
//! # async fn example(
//! #     consumer: impl RecordSource,
//! #     offset_store: Arc<dyn OffsetStore>,
//! #     target: Arc<dyn TargetPosition>,
//! # ) -> cdc_bridge::Result<()> {
//! let mut stream = CheckpointingIterator::new(
//!     consumer,
//!     offset_store,
//!     None,   // no schema-history tracking
//!     false,
//!     target,
//!     CheckpointConfig::default(),
//! )
//! .await?;
//!
//! while let Some(message) = stream.next_message().await? {
//!     match message {
//!         PipelineMessage::Record(record) => { /* hand to the sink */ }
//!         PipelineMessage::Checkpoint(checkpoint) => { /* commit, then persist */ }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::{
    config::CheckpointConfig,
    consumer::RecordSource,
    event::ChangeEvent,
    store::{history::SchemaHistory, offset::Offset, SchemaHistoryStore},
    store::OffsetStore,
    target::TargetPosition,
    Error, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// A durable resume point interleaved into the output stream.
///
/// The caller must treat it as the resume point only after all records
/// preceding it are committed downstream (at-least-once discipline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub offset: Offset,
    pub schema_history: Option<SchemaHistory>,
    pub emitted_at: DateTime<Utc>,
}

impl Checkpoint {
    fn new(offset: Offset, schema_history: Option<SchemaHistory>) -> Self {
        Self {
            offset,
            schema_history,
            emitted_at: Utc::now(),
        }
    }
}

/// One element of the checkpointed output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineMessage {
    Record(ChangeEvent),
    Checkpoint(Checkpoint),
}

/// Wraps a record source and interleaves checkpoints per the policy.
pub struct CheckpointingIterator<S: RecordSource> {
    source: S,
    offset_store: Arc<dyn OffsetStore>,
    history_store: Option<Arc<dyn SchemaHistoryStore>>,
    track_schema_history: bool,
    target: Arc<dyn TargetPosition>,
    policy: CheckpointConfig,
    // Single staged slot: while one offset is pending, further threshold
    // checks are skipped until it is flushed.
    staged_offset: Option<Offset>,
    last_emitted_offset: Offset,
    records_since_checkpoint: u64,
    checkpoint_window_start: Instant,
    checkpoint_armed: bool,
    finished: bool,
}

impl<S: RecordSource> CheckpointingIterator<S> {
    /// Builds the decorator, seeding `last_emitted_offset` from the store.
    ///
    /// Requesting schema-history tracking without a history store is a
    /// configuration error, raised here rather than mid-stream.
    pub async fn new(
        source: S,
        offset_store: Arc<dyn OffsetStore>,
        history_store: Option<Arc<dyn SchemaHistoryStore>>,
        track_schema_history: bool,
        target: Arc<dyn TargetPosition>,
        policy: CheckpointConfig,
    ) -> Result<Self> {
        if track_schema_history && history_store.is_none() {
            return Err(Error::Config(
                "schema-history tracking requested without a history store".to_string(),
            ));
        }
        let last_emitted_offset = offset_store.read().await?;
        Ok(Self {
            source,
            offset_store,
            history_store,
            track_schema_history,
            target,
            policy,
            staged_offset: None,
            last_emitted_offset,
            records_since_checkpoint: 0,
            checkpoint_window_start: Instant::now(),
            checkpoint_armed: false,
            finished: false,
        })
    }

    /// Pulls the next message: a record, an interleaved checkpoint, or the
    /// final checkpoint at stream end, then `Ok(None)`.
    pub async fn next_message(&mut self) -> Result<Option<PipelineMessage>> {
        if self.finished {
            return Ok(None);
        }

        if self.checkpoint_armed {
            let offset = self.staged_offset.take().unwrap_or_default();
            let checkpoint = self.build_checkpoint(offset.clone()).await?;
            info!("emitting checkpoint after {} record(s)", self.records_since_checkpoint);
            self.last_emitted_offset = offset;
            self.records_since_checkpoint = 0;
            self.checkpoint_window_start = Instant::now();
            self.checkpoint_armed = false;
            return Ok(Some(PipelineMessage::Checkpoint(checkpoint)));
        }

        match self.source.next_record().await? {
            Some(event) => {
                if self.policy.enabled() && self.staged_offset.is_none() && self.threshold_met() {
                    self.try_stage_offset().await?;
                }
                if let Some(staged) = &self.staged_offset {
                    if !self.target.is_snapshot_event(&event)
                        && self.target.is_record_behind_offset(staged, &event)
                    {
                        // Safe now: the staged offset no longer points ahead
                        // of anything still to be streamed.
                        self.checkpoint_armed = true;
                    }
                }
                self.records_since_checkpoint += 1;
                Ok(Some(PipelineMessage::Record(event)))
            }
            None => {
                self.finished = true;
                let offset = self.offset_store.read().await?;
                let checkpoint = self.build_checkpoint(offset.clone()).await?;
                info!("source exhausted, emitting final checkpoint");
                self.last_emitted_offset = offset;
                Ok(Some(PipelineMessage::Checkpoint(checkpoint)))
            }
        }
    }

    fn threshold_met(&self) -> bool {
        self.records_since_checkpoint >= self.policy.max_records
            || self.checkpoint_window_start.elapsed() >= self.policy.max_interval()
    }

    /// Reads the store and stages its offset if it advanced. A retryable
    /// read failure (store mid-write) skips staging this cycle.
    async fn try_stage_offset(&mut self) -> Result<()> {
        match self.offset_store.read().await {
            Ok(current) => {
                if !self.target.is_same_offset(&current, &self.last_emitted_offset) {
                    debug!("staging advanced offset for checkpoint");
                    self.staged_offset = Some(current);
                }
                Ok(())
            }
            Err(e) if e.is_retryable() => {
                debug!("offset store busy, deferring checkpoint: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn build_checkpoint(&self, offset: Offset) -> Result<Checkpoint> {
        let schema_history = match (&self.track_schema_history, &self.history_store) {
            (true, Some(store)) => Some(store.read().await?),
            _ => None,
        };
        Ok(Checkpoint::new(offset, schema_history))
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted source yielding pre-built events.
    struct VecSource {
        events: VecDeque<ChangeEvent>,
    }

    impl VecSource {
        fn new(events: Vec<ChangeEvent>) -> Self {
            Self {
                events: events.into(),
            }
        }
    }

    #[async_trait]
    impl RecordSource for VecSource {
        async fn next_record(&mut self) -> Result<Option<ChangeEvent>> {
            Ok(self.events.pop_front())
        }
    }

    /// In-memory offset store whose value advances as scripted; can simulate
    /// a mid-write race on selected reads.
    struct ScriptedOffsetStore {
        reads: Mutex<VecDeque<Result<Offset>>>,
        fallback: Offset,
    }

    impl ScriptedOffsetStore {
        fn new(reads: Vec<Result<Offset>>, fallback: Offset) -> Self {
            Self {
                reads: Mutex::new(reads.into()),
                fallback,
            }
        }
    }

    #[async_trait]
    impl OffsetStore for ScriptedOffsetStore {
        async fn read(&self) -> Result<Offset> {
            match self.reads.lock().unwrap().pop_front() {
                Some(next) => next,
                None => Ok(self.fallback.clone()),
            }
        }

        async fn persist(&self, _offset: &Offset) -> Result<()> {
            Ok(())
        }
    }

    /// Orders events and offsets by an LSN number.
    struct LsnTarget;

    impl TargetPosition for LsnTarget {
        fn reached(&self, _event: &ChangeEvent) -> bool {
            false
        }

        fn is_record_behind_offset(&self, offset: &Offset, event: &ChangeEvent) -> bool {
            let staged: u64 = offset.get("lsn").and_then(|l| l.parse().ok()).unwrap_or(0);
            let event_lsn = event.value["source"]["lsn"].as_u64().unwrap_or(u64::MAX);
            event_lsn <= staged
        }
    }

    fn streaming_event(lsn: u64) -> ChangeEvent {
        ChangeEvent::new(
            Some(json!(lsn)),
            json!({"after": {"id": lsn}, "source": {"lsn": lsn, "snapshot": "false"}}),
        )
    }

    fn snapshot_event(lsn: u64) -> ChangeEvent {
        ChangeEvent::new(
            Some(json!(lsn)),
            json!({"after": {"id": lsn}, "source": {"lsn": lsn, "snapshot": "true"}}),
        )
    }

    fn lsn_offset(lsn: u64) -> Offset {
        Offset::from_iter([("lsn".to_string(), lsn.to_string())])
    }

    fn policy(max_records: u64) -> CheckpointConfig {
        CheckpointConfig {
            max_records,
            max_interval_secs: 900,
        }
    }

    async fn drain(
        iter: &mut CheckpointingIterator<VecSource>,
    ) -> (Vec<ChangeEvent>, Vec<Checkpoint>) {
        let mut records = Vec::new();
        let mut checkpoints = Vec::new();
        while let Some(message) = iter.next_message().await.unwrap() {
            match message {
                PipelineMessage::Record(r) => records.push(r),
                PipelineMessage::Checkpoint(c) => checkpoints.push(c),
            }
        }
        (records, checkpoints)
    }

    #[tokio::test]
    async fn config_error_without_history_store() {
        let result = CheckpointingIterator::new(
            VecSource::new(vec![]),
            Arc::new(ScriptedOffsetStore::new(vec![], Offset::default())),
            None,
            true,
            Arc::new(LsnTarget),
            policy(3),
        )
        .await;
        match result {
            Err(Error::Config(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("construction must fail without a history store"),
        }
    }

    #[tokio::test]
    async fn final_checkpoint_always_emitted() {
        // Two events, threshold 100: no periodic checkpoint ever fires.
        let store = ScriptedOffsetStore::new(
            vec![Ok(Offset::default())], // construction seed
            lsn_offset(2),
        );
        let mut iter = CheckpointingIterator::new(
            VecSource::new(vec![streaming_event(1), streaming_event(2)]),
            Arc::new(store),
            None,
            false,
            Arc::new(LsnTarget),
            policy(100),
        )
        .await
        .unwrap();

        let (records, checkpoints) = drain(&mut iter).await;
        assert_eq!(records.len(), 2);
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].offset, lsn_offset(2));
        // The sequence stays ended.
        assert!(iter.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn checkpoint_emitted_once_record_is_behind_staged_offset() {
        // Threshold 3: staged at the 4th pull (3 records already returned),
        // armed by that same event (its LSN 4 <= staged LSN 5), emitted
        // before the 5th record.
        let events: Vec<_> = (1..=10).map(streaming_event).collect();
        // The store advances to LSN 5 and then holds still, so later
        // threshold checks see an unchanged offset and stage nothing.
        let store = ScriptedOffsetStore::new(
            vec![Ok(Offset::default()), Ok(lsn_offset(5))],
            lsn_offset(5),
        );
        let mut iter = CheckpointingIterator::new(
            VecSource::new(events),
            Arc::new(store),
            None,
            false,
            Arc::new(LsnTarget),
            policy(3),
        )
        .await
        .unwrap();

        let mut sequence = Vec::new();
        while let Some(message) = iter.next_message().await.unwrap() {
            sequence.push(message);
        }

        let checkpoint_positions: Vec<usize> = sequence
            .iter()
            .enumerate()
            .filter(|(_, m)| matches!(m, PipelineMessage::Checkpoint(_)))
            .map(|(i, _)| i)
            .collect();
        // Exactly one periodic checkpoint (after the 4th record) plus the
        // final one at the end.
        assert_eq!(checkpoint_positions, vec![4, 11]);

        match &sequence[4] {
            PipelineMessage::Checkpoint(c) => {
                assert_eq!(c.offset, lsn_offset(5));
                // P2: every record before the checkpoint is covered by it.
                for message in &sequence[..4] {
                    if let PipelineMessage::Record(r) = message {
                        assert!(r.value["source"]["lsn"].as_u64().unwrap() <= 5);
                    }
                }
            }
            other => panic!("expected checkpoint, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn elapsed_interval_stages_a_checkpoint() {
        // Record threshold far out of reach; only the time leg can fire.
        let events: Vec<_> = (1..=3).map(streaming_event).collect();
        let store = ScriptedOffsetStore::new(
            vec![Ok(Offset::default()), Ok(lsn_offset(2))],
            lsn_offset(3),
        );
        let mut iter = CheckpointingIterator::new(
            VecSource::new(events),
            Arc::new(store),
            None,
            false,
            Arc::new(LsnTarget),
            CheckpointConfig {
                max_records: 1000,
                max_interval_secs: 1,
            },
        )
        .await
        .unwrap();

        // The first record streams before the window elapses.
        assert!(matches!(
            iter.next_message().await.unwrap().unwrap(),
            PipelineMessage::Record(_)
        ));

        tokio::time::sleep(Duration::from_millis(1100)).await;

        // Interval elapsed: the advanced offset is staged, the second record
        // (behind it) arms, and the checkpoint lands on the following call.
        assert!(matches!(
            iter.next_message().await.unwrap().unwrap(),
            PipelineMessage::Record(_)
        ));
        match iter.next_message().await.unwrap().unwrap() {
            PipelineMessage::Checkpoint(c) => assert_eq!(c.offset, lsn_offset(2)),
            other => panic!("expected checkpoint, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn snapshot_events_never_arm_a_checkpoint() {
        let events = vec![
            snapshot_event(1),
            snapshot_event(2),
            snapshot_event(3),
            snapshot_event(4),
            snapshot_event(5),
        ];
        let store = ScriptedOffsetStore::new(vec![Ok(Offset::default())], lsn_offset(99));
        let mut iter = CheckpointingIterator::new(
            VecSource::new(events),
            Arc::new(store),
            None,
            false,
            Arc::new(LsnTarget),
            policy(2),
        )
        .await
        .unwrap();

        let (records, checkpoints) = drain(&mut iter).await;
        assert_eq!(records.len(), 5);
        // Only the final checkpoint: snapshot events cannot arm.
        assert_eq!(checkpoints.len(), 1);
    }

    #[tokio::test]
    async fn offset_read_race_skips_cycle_and_retries() {
        let events: Vec<_> = (1..=6).map(streaming_event).collect();
        let store = ScriptedOffsetStore::new(
            vec![
                Ok(Offset::default()),
                Err(Error::OffsetReadRace("mid-write".into())), // threshold fires, read races
                Ok(lsn_offset(4)),                              // next cycle succeeds
            ],
            lsn_offset(6),
        );
        let mut iter = CheckpointingIterator::new(
            VecSource::new(events),
            Arc::new(store),
            None,
            false,
            Arc::new(LsnTarget),
            policy(2),
        )
        .await
        .unwrap();

        let (records, checkpoints) = drain(&mut iter).await;
        assert_eq!(records.len(), 6);
        // The raced attempt was skipped, the retry staged and emitted.
        assert_eq!(checkpoints.len(), 2);
        assert_eq!(checkpoints[0].offset, lsn_offset(4));
    }

    #[tokio::test]
    async fn single_staged_slot_is_not_restaged_until_flushed() {
        // Offset advances on every read, but only the first staged value may
        // be emitted before restaging happens.
        let events: Vec<_> = (1..=8).map(streaming_event).collect();
        let reads = vec![
            Ok(Offset::default()),
            Ok(lsn_offset(3)),
            Ok(lsn_offset(7)),
        ];
        let store = ScriptedOffsetStore::new(reads, lsn_offset(8));
        let mut iter = CheckpointingIterator::new(
            VecSource::new(events),
            Arc::new(store),
            None,
            false,
            Arc::new(LsnTarget),
            policy(2),
        )
        .await
        .unwrap();

        let (_records, checkpoints) = drain(&mut iter).await;
        // First periodic checkpoint carries the first staged offset, not a
        // later one that became eligible while it was pending.
        assert_eq!(checkpoints[0].offset, lsn_offset(3));
    }

    #[tokio::test]
    async fn disabled_policy_emits_only_final_checkpoint() {
        let events: Vec<_> = (1..=5).map(streaming_event).collect();
        let store = ScriptedOffsetStore::new(vec![Ok(Offset::default())], lsn_offset(5));
        let mut iter = CheckpointingIterator::new(
            VecSource::new(events),
            Arc::new(store),
            None,
            false,
            Arc::new(LsnTarget),
            CheckpointConfig::disabled(),
        )
        .await
        .unwrap();

        let (records, checkpoints) = drain(&mut iter).await;
        assert_eq!(records.len(), 5);
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].offset, lsn_offset(5));
    }

    #[tokio::test]
    async fn checkpoint_carries_schema_history_when_tracked() {
        struct FixedHistoryStore;

        #[async_trait]
        impl SchemaHistoryStore for FixedHistoryStore {
            async fn read(&self) -> Result<SchemaHistory> {
                Ok(SchemaHistory::new(&b"CREATE TABLE t"[..]))
            }
            async fn persist(&self, _history: &SchemaHistory) -> Result<()> {
                Ok(())
            }
            async fn persist_compressed(&self, _history: &SchemaHistory) -> Result<()> {
                Ok(())
            }
        }

        let store = ScriptedOffsetStore::new(vec![Ok(Offset::default())], lsn_offset(1));
        let mut iter = CheckpointingIterator::new(
            VecSource::new(vec![streaming_event(1)]),
            Arc::new(store),
            Some(Arc::new(FixedHistoryStore)),
            true,
            Arc::new(LsnTarget),
            policy(100),
        )
        .await
        .unwrap();

        let (_records, checkpoints) = drain(&mut iter).await;
        assert_eq!(checkpoints.len(), 1);
        let history = checkpoints[0].schema_history.as_ref().unwrap();
        assert_eq!(history.as_bytes(), b"CREATE TABLE t");
    }
}
