#![allow(dead_code)]

use async_trait::async_trait;
use cdc_bridge::{
    ChangeEngine, ChangeEvent, EventSink, Offset, OffsetStore, Result, StopSignal, TargetPosition,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

pub fn streaming_event_value(lsn: u64) -> Value {
    json!({
        "before": null,
        "after": {"id": lsn, "name": format!("row-{lsn}")},
        "source": {"lsn": lsn, "snapshot": "false"}
    })
}

pub fn snapshot_event_value(lsn: u64) -> Value {
    json!({
        "before": null,
        "after": {"id": lsn, "name": format!("row-{lsn}")},
        "source": {"lsn": lsn, "snapshot": "true"}
    })
}

pub fn event_lsn(event: &ChangeEvent) -> u64 {
    event.value["source"]["lsn"].as_u64().expect("event lsn")
}

fn lsn_offset(lsn: u64) -> Offset {
    Offset::from_iter([("lsn".to_string(), lsn.to_string())])
}

/// Engine that emits a fixed script of events, advancing the offset store
/// after each one the way a real capture engine maintains its own offsets.
pub struct ScriptedEngine {
    events: Vec<Value>,
    offset_store: Option<Arc<dyn OffsetStore>>,
    failure: Option<String>,
    wait_for_stop: bool,
}

impl ScriptedEngine {
    pub fn new(events: Vec<Value>) -> Self {
        Self {
            events,
            offset_store: None,
            failure: None,
            wait_for_stop: true,
        }
    }

    pub fn with_offset_store(mut self, store: Arc<dyn OffsetStore>) -> Self {
        self.offset_store = Some(store);
        self
    }

    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self.wait_for_stop = false;
        self
    }

    pub fn stopping_on_its_own(mut self) -> Self {
        self.wait_for_stop = false;
        self
    }
}

#[async_trait]
impl ChangeEngine for ScriptedEngine {
    async fn run(&mut self, sink: EventSink, mut stop: StopSignal) -> Result<()> {
        for value in self.events.drain(..) {
            let lsn = value["source"]["lsn"].as_u64().unwrap_or(0);
            sink.deliver(Some(json!({"id": lsn})), Some(value)).await?;
            if let Some(store) = &self.offset_store {
                store.persist(&lsn_offset(lsn)).await?;
            }
        }
        if let Some(message) = self.failure.take() {
            return Err(cdc_bridge::Error::EngineFatal(message));
        }
        if self.wait_for_stop {
            stop.requested().await;
        }
        Ok(())
    }
}

/// In-memory offset store backing the scripted engine.
#[derive(Default)]
pub struct MemoryOffsetStore {
    offset: Mutex<Offset>,
}

#[async_trait]
impl OffsetStore for MemoryOffsetStore {
    async fn read(&self) -> Result<Offset> {
        Ok(self.offset.lock().expect("offset lock").clone())
    }

    async fn persist(&self, offset: &Offset) -> Result<()> {
        *self.offset.lock().expect("offset lock") = offset.clone();
        Ok(())
    }
}

/// Target-position policy ordering events and offsets by LSN.
pub struct LsnTarget {
    pub target_lsn: Option<u64>,
}

impl LsnTarget {
    pub fn never_reached() -> Self {
        Self { target_lsn: None }
    }

    pub fn at(lsn: u64) -> Self {
        Self {
            target_lsn: Some(lsn),
        }
    }
}

impl TargetPosition for LsnTarget {
    fn reached(&self, event: &ChangeEvent) -> bool {
        match self.target_lsn {
            Some(target) => event_lsn(event) >= target,
            None => false,
        }
    }

    fn is_record_behind_offset(&self, offset: &Offset, event: &ChangeEvent) -> bool {
        let staged: u64 = offset
            .get("lsn")
            .and_then(|lsn| lsn.parse().ok())
            .unwrap_or(0);
        event_lsn(event) <= staged
    }
}
