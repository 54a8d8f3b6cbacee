//! Deferred feeling-prompt scheduler
//!
//! Each logged meal gets one cancellable timer. When it fires, a
//! [`FeelingRequest`] is broadcast to whoever is listening at the boundary;
//! the answer itself comes back through the store. Entries move
//! `Armed -> {Answered | Skipped | Cancelled}` and never leave a terminal
//! state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, Result};
use crate::store::{StoreEvent, StoreObserver};
use crate::types::{MealId, MealRecord};

const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Feedback lifecycle of one meal. A meal with no entry is unscheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FeedbackState {
    /// Waiting for an answer; `prompted` once the timer has fired
    Armed { due_at: DateTime<Utc>, prompted: bool },
    Answered { at: DateTime<Utc> },
    Skipped { at: DateTime<Utc> },
    /// Meal left the window before it was answered
    Cancelled { at: DateTime<Utc> },
}

impl FeedbackState {
    pub fn name(&self) -> &'static str {
        match self {
            FeedbackState::Armed { .. } => "armed",
            FeedbackState::Answered { .. } => "answered",
            FeedbackState::Skipped { .. } => "skipped",
            FeedbackState::Cancelled { .. } => "cancelled",
        }
    }
}

impl std::fmt::Display for FeedbackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Emitted when a meal's prompt delay elapses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeelingRequest {
    pub meal_id: MealId,
    pub due_at: DateTime<Utc>,
}

/// Serializable scheduler entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntry {
    pub meal_id: MealId,
    #[serde(flatten)]
    pub state: FeedbackState,
}

struct Slot {
    state: FeedbackState,
    timer: Option<JoinHandle<()>>,
}

impl Slot {
    fn disarm(&mut self, next: FeedbackState) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.state = next;
    }
}

type Slots = Arc<Mutex<HashMap<MealId, Slot>>>;

/// Per-meal feeling prompt timers. Must be used inside a tokio runtime.
pub struct FeelingScheduler {
    slots: Slots,
    delay: Duration,
    requests: broadcast::Sender<FeelingRequest>,
}

impl FeelingScheduler {
    pub fn new(delay: Duration) -> Self {
        let (requests, _) = broadcast::channel(REQUEST_CHANNEL_CAPACITY);
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            delay,
            requests,
        }
    }

    /// Listen for fired prompts
    pub fn subscribe(&self) -> broadcast::Receiver<FeelingRequest> {
        self.requests.subscribe()
    }

    /// Arm the prompt timer for a newly logged meal
    pub fn arm(&self, meal_id: MealId) -> Result<()> {
        let mut slots = lock(&self.slots);
        if let Some(existing) = slots.get(&meal_id) {
            return Err(EngineError::InvalidState {
                meal_id,
                state: existing.state.name().to_string(),
            });
        }

        let due_at = Utc::now() + chrono::Duration::from_std(self.delay).unwrap_or_else(|_| chrono::Duration::zero());
        let timer = self.spawn_timer(meal_id, self.delay);
        slots.insert(
            meal_id,
            Slot {
                state: FeedbackState::Armed { due_at, prompted: false },
                timer: Some(timer),
            },
        );

        debug!("Armed feeling prompt for meal {} (due {})", meal_id, due_at);
        Ok(())
    }

    /// Record that the meal was answered, before or after the prompt fired
    pub fn mark_answered(&self, meal_id: MealId) -> Result<()> {
        let mut slots = lock(&self.slots);
        let now = Utc::now();
        match slots.get_mut(&meal_id) {
            Some(slot) => match slot.state {
                FeedbackState::Armed { .. } => {
                    slot.disarm(FeedbackState::Answered { at: now });
                    debug!("Meal {} answered", meal_id);
                    Ok(())
                }
                FeedbackState::Answered { .. } | FeedbackState::Skipped { .. } => {
                    Err(EngineError::AlreadyAnswered(meal_id))
                }
                FeedbackState::Cancelled { .. } => Err(EngineError::UnknownMealId(meal_id)),
            },
            None => {
                slots.insert(
                    meal_id,
                    Slot {
                        state: FeedbackState::Answered { at: now },
                        timer: None,
                    },
                );
                Ok(())
            }
        }
    }

    /// The user declined to report a feeling for this meal
    pub fn skip(&self, meal_id: MealId) -> Result<()> {
        let mut slots = lock(&self.slots);
        let now = Utc::now();
        match slots.get_mut(&meal_id) {
            Some(slot) => match slot.state {
                FeedbackState::Armed { .. } => {
                    slot.disarm(FeedbackState::Skipped { at: now });
                    info!("Feeling prompt skipped for meal {}", meal_id);
                    Ok(())
                }
                FeedbackState::Answered { .. } | FeedbackState::Skipped { .. } => {
                    Err(EngineError::AlreadyAnswered(meal_id))
                }
                FeedbackState::Cancelled { .. } => Err(EngineError::UnknownMealId(meal_id)),
            },
            None => {
                slots.insert(
                    meal_id,
                    Slot {
                        state: FeedbackState::Skipped { at: now },
                        timer: None,
                    },
                );
                Ok(())
            }
        }
    }

    /// The meal was evicted from the window. An armed entry becomes a
    /// `Cancelled` tombstone; finished entries are dropped. Tombstones of
    /// earlier evictions are pruned so the map stays window-sized.
    pub fn cancel(&self, meal_id: MealId) {
        let mut slots = lock(&self.slots);
        match slots.get(&meal_id).map(|s| s.state) {
            Some(FeedbackState::Armed { .. }) => {
                if let Some(slot) = slots.get_mut(&meal_id) {
                    slot.disarm(FeedbackState::Cancelled { at: Utc::now() });
                }
                debug!("Cancelled feeling prompt for evicted meal {}", meal_id);
            }
            Some(FeedbackState::Cancelled { .. }) => {
                error!("Meal {} evicted twice", meal_id);
                debug_assert!(false, "meal {} evicted twice", meal_id);
            }
            Some(FeedbackState::Answered { .. }) | Some(FeedbackState::Skipped { .. }) => {
                slots.remove(&meal_id);
            }
            None => warn!("Eviction of unscheduled meal {}", meal_id),
        }
        slots.retain(|id, slot| {
            *id >= meal_id || !matches!(slot.state, FeedbackState::Cancelled { .. })
        });
    }

    pub fn state(&self, meal_id: MealId) -> Option<FeedbackState> {
        lock(&self.slots).get(&meal_id).map(|s| s.state)
    }

    /// Meals awaiting an answer whose prompt has fired or is overdue
    pub fn pending_prompts(&self, now: DateTime<Utc>) -> Vec<FeelingRequest> {
        let slots = lock(&self.slots);
        let mut pending: Vec<FeelingRequest> = slots
            .iter()
            .filter_map(|(id, slot)| match slot.state {
                FeedbackState::Armed { due_at, prompted } if prompted || due_at <= now => {
                    Some(FeelingRequest { meal_id: *id, due_at })
                }
                _ => None,
            })
            .collect();
        pending.sort_by_key(|r| r.meal_id);
        pending
    }

    /// Number of timers still running
    pub fn armed_timers(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|s| s.timer.as_ref().map_or(false, |t| !t.is_finished()))
            .count()
    }

    /// Snapshot of every entry, ordered by meal id
    pub fn export(&self) -> Vec<FeedbackEntry> {
        let slots = lock(&self.slots);
        let mut entries: Vec<FeedbackEntry> = slots
            .iter()
            .map(|(id, slot)| FeedbackEntry { meal_id: *id, state: slot.state })
            .collect();
        entries.sort_by_key(|e| e.meal_id);
        entries
    }

    /// Load saved entries. Only armed, not-yet-prompted entries get a timer,
    /// with whatever delay remains; terminal entries never fire again.
    pub fn restore(&self, entries: Vec<FeedbackEntry>) {
        let now = Utc::now();
        let mut slots = lock(&self.slots);
        for entry in entries {
            let timer = match entry.state {
                FeedbackState::Armed { due_at, prompted: false } => {
                    let remaining = (due_at - now).to_std().unwrap_or(Duration::ZERO);
                    Some(self.spawn_timer(entry.meal_id, remaining))
                }
                _ => None,
            };
            if let Some(old) = slots.insert(entry.meal_id, Slot { state: entry.state, timer }) {
                if let Some(t) = old.timer {
                    t.abort();
                }
            }
        }
        debug!("Restored {} feedback entries", slots.len());
    }

    fn spawn_timer(&self, meal_id: MealId, delay: Duration) -> JoinHandle<()> {
        let slots = Arc::clone(&self.slots);
        let requests = self.requests.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(&slots, &requests, meal_id);
        })
    }
}

impl Drop for FeelingScheduler {
    fn drop(&mut self) {
        for slot in lock(&self.slots).values_mut() {
            if let Some(t) = slot.timer.take() {
                t.abort();
            }
        }
    }
}

impl StoreObserver for FeelingScheduler {
    fn on_store_event(&self, event: StoreEvent, _snapshot: &[MealRecord], _revision: u64) {
        match event {
            StoreEvent::Appended(id) => {
                if let Err(e) = self.arm(id) {
                    error!("Failed to arm feeling prompt: {}", e);
                    debug_assert!(false, "re-armed meal {}", id);
                }
            }
            StoreEvent::FeelingRecorded(id) => {
                if let Err(e) = self.mark_answered(id) {
                    warn!("Feeling recorded for meal {} in unexpected state: {}", id, e);
                }
            }
            StoreEvent::Evicted(id) => self.cancel(id),
        }
    }
}

/// Timer body. Re-checks state under the lock so an answered or cancelled
/// meal never produces a late request.
fn fire(slots: &Mutex<HashMap<MealId, Slot>>, requests: &broadcast::Sender<FeelingRequest>, meal_id: MealId) {
    let request = {
        let mut slots = lock(slots);
        match slots.get_mut(&meal_id) {
            Some(slot) => match slot.state {
                FeedbackState::Armed { due_at, prompted: false } => {
                    slot.state = FeedbackState::Armed { due_at, prompted: true };
                    slot.timer = None;
                    Some(FeelingRequest { meal_id, due_at })
                }
                _ => None,
            },
            None => None,
        }
    };

    if let Some(request) = request {
        info!("Prompting for feeling after meal {}", meal_id);
        if requests.send(request).is_err() {
            debug!("No listeners for feeling prompt of meal {}", meal_id);
        }
    }
}

fn lock(slots: &Mutex<HashMap<MealId, Slot>>) -> MutexGuard<'_, HashMap<MealId, Slot>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
