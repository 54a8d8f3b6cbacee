//! Meal record store
//!
//! Append-only, capacity-bounded log of meal observations. The store is the
//! single source of truth for history; every mutation goes through
//! [`MealStore::append`] or [`MealStore::record_feeling`] and is announced to
//! the registered [`StoreObserver`]s together with a fresh snapshot.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::types::{ClassifierResult, Feeling, MealId, MealRecord};

/// Mutation announced to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// A new meal entered the window
    Appended(MealId),
    /// A meal received its feeling report
    FeelingRecorded(MealId),
    /// The oldest meal left the window to make room
    Evicted(MealId),
}

/// Receives store mutations synchronously, after they are applied
pub trait StoreObserver: Send + Sync {
    /// `snapshot` is the post-mutation history, most recent first, and
    /// `revision` the mutation counter after this change
    fn on_store_event(&self, event: StoreEvent, snapshot: &[MealRecord], revision: u64);
}

/// Rolling window of meal records
pub struct MealStore {
    /// Oldest at the front
    records: VecDeque<MealRecord>,
    capacity: usize,
    adverse_threshold: u8,
    next_id: u64,
    revision: u64,
    observers: Vec<Arc<dyn StoreObserver>>,
}

impl MealStore {
    pub fn new(config: &EngineConfig) -> Self {
        let capacity = config.window_capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            adverse_threshold: config.adverse_feeling_threshold,
            next_id: 1,
            revision: 0,
            observers: Vec::new(),
        }
    }

    /// Rebuild a store from saved records (any order). Keeps the newest
    /// `window_capacity` records and never hands out an id at or below one
    /// already used.
    pub fn restore(config: &EngineConfig, mut records: Vec<MealRecord>, next_id: u64, revision: u64) -> Self {
        let mut store = Self::new(config);
        records.sort_by_key(|r| r.id);
        let max_id = records.last().map(|r| r.id.0).unwrap_or(0);
        let skip = records.len().saturating_sub(store.capacity);
        store.records = records.into_iter().skip(skip).collect();
        store.next_id = next_id.max(max_id + 1);
        store.revision = revision;
        store
    }

    /// Register an observer for all future mutations
    pub fn subscribe(&mut self, observer: Arc<dyn StoreObserver>) {
        self.observers.push(observer);
    }

    /// Append a classified meal. Evicts the oldest record when full.
    pub fn append(&mut self, result: ClassifierResult, timestamp: DateTime<Utc>) -> MealId {
        let id = MealId(self.next_id);
        self.next_id += 1;

        let mut evicted = Vec::new();
        while self.records.len() >= self.capacity {
            if let Some(old) = self.records.pop_front() {
                debug!("Evicting meal {} from window", old.id);
                evicted.push(old.id);
            }
        }

        self.records.push_back(MealRecord {
            id,
            timestamp,
            foods: result.foods,
            nutrition: result.nutrition,
            feeling: None,
            symptoms: BTreeSet::new(),
            feeling_timestamp: None,
        });
        self.revision += 1;

        info!("Logged meal {} ({} in window)", id, self.records.len());

        for old in evicted {
            self.notify(StoreEvent::Evicted(old));
        }
        self.notify(StoreEvent::Appended(id));
        id
    }

    /// Attach a feeling report to a meal. Symptoms are only kept when the
    /// feeling is adverse.
    pub fn record_feeling(
        &mut self,
        id: MealId,
        feeling: Feeling,
        symptoms: BTreeSet<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let threshold = self.adverse_threshold;
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(EngineError::UnknownMealId(id))?;

        if record.is_answered() {
            return Err(EngineError::AlreadyAnswered(id));
        }

        record.feeling = Some(feeling);
        record.symptoms = if feeling.is_adverse(threshold) {
            symptoms
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else {
            BTreeSet::new()
        };
        record.feeling_timestamp = Some(at);
        self.revision += 1;

        info!("Recorded feeling {} for meal {}", feeling.value(), id);
        self.notify(StoreEvent::FeelingRecorded(id));
        Ok(())
    }

    /// Point-in-time copy of the window, most recent first
    pub fn snapshot(&self) -> Vec<MealRecord> {
        self.records.iter().rev().cloned().collect()
    }

    /// Up to `limit` most recent records
    pub fn history(&self, limit: usize) -> Vec<MealRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }

    pub fn get(&self, id: MealId) -> Option<&MealRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: MealId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Next id that will be assigned
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Number of mutations applied so far
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn notify(&self, event: StoreEvent) {
        if self.observers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for observer in &self.observers {
            observer.on_store_event(event, &snapshot, self.revision);
        }
    }
}
