//! Insight aggregation
//!
//! Runs every analyzer over the current window and publishes one consistent
//! [`InsightsState`]. Readers get an `Arc` to the latest state and never see a
//! half-updated result; each store mutation swaps in a fresh one.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::analysis::{
    IntoleranceAnalyzer, IntoleranceHypothesis, NutrientGap, NutrientGapAnalyzer, Predictions, TrendAnalyzer,
    WeeklyTrends,
};
use crate::config::Config;
use crate::store::{StoreEvent, StoreObserver};
use crate::types::MealRecord;

/// All analytics for one store revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightsSnapshot {
    /// Store mutation counter this snapshot was computed from
    pub revision: u64,
    pub record_count: usize,
    pub answered_count: usize,
    pub intolerances: Vec<IntoleranceHypothesis>,
    pub nutritional_gaps: Vec<NutrientGap>,
    pub predictions: Predictions,
    pub weekly_trends: WeeklyTrends,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InsightsState {
    Ready(InsightsSnapshot),
    /// Not enough meals logged yet
    InsufficientData { records: usize, required: usize },
}

impl InsightsState {
    pub fn is_ready(&self) -> bool {
        matches!(self, InsightsState::Ready(_))
    }

    pub fn snapshot(&self) -> Option<&InsightsSnapshot> {
        match self {
            InsightsState::Ready(s) => Some(s),
            InsightsState::InsufficientData { .. } => None,
        }
    }
}

/// Owns the analyzers and the latest published state
pub struct InsightAggregator {
    intolerance: IntoleranceAnalyzer,
    nutrients: NutrientGapAnalyzer,
    trends: TrendAnalyzer,
    min_history: usize,
    current: RwLock<Arc<InsightsState>>,
}

impl InsightAggregator {
    pub fn new(config: &Config) -> Self {
        let min_history = config.engine.min_history_for_insights;
        Self {
            intolerance: IntoleranceAnalyzer::new(&config.intolerance, config.engine.adverse_feeling_threshold),
            nutrients: NutrientGapAnalyzer::new(&config.nutrients),
            trends: TrendAnalyzer::new(&config.trends),
            min_history,
            current: RwLock::new(Arc::new(InsightsState::InsufficientData {
                records: 0,
                required: min_history,
            })),
        }
    }

    /// Compute insights for a snapshot without publishing them
    pub fn recompute(&self, snapshot: &[MealRecord], revision: u64) -> InsightsState {
        if snapshot.len() < self.min_history {
            return InsightsState::InsufficientData {
                records: snapshot.len(),
                required: self.min_history,
            };
        }

        InsightsState::Ready(InsightsSnapshot {
            revision,
            record_count: snapshot.len(),
            answered_count: snapshot.iter().filter(|r| r.is_answered()).count(),
            intolerances: self.intolerance.analyze(snapshot),
            nutritional_gaps: self.nutrients.analyze(snapshot),
            predictions: self.trends.predict(snapshot),
            weekly_trends: self.trends.weekly(snapshot),
        })
    }

    /// Recompute and publish
    pub fn refresh(&self, snapshot: &[MealRecord], revision: u64) {
        let state = Arc::new(self.recompute(snapshot, revision));
        if let InsightsState::Ready(s) = state.as_ref() {
            info!(
                "Insights updated: {} intolerance(s), {} gap(s)",
                s.intolerances.len(),
                s.nutritional_gaps.len()
            );
        }
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = state;
    }

    /// Latest published state
    pub fn current(&self) -> Arc<InsightsState> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }
}

impl StoreObserver for InsightAggregator {
    fn on_store_event(&self, event: StoreEvent, snapshot: &[MealRecord], revision: u64) {
        // An eviction is always followed by the append that caused it
        if let StoreEvent::Evicted(_) = event {
            return;
        }
        debug!("Recomputing insights after {:?}", event);
        self.refresh(snapshot, revision);
    }
}
