//! Engine facade
//!
//! [`NutriEngine`] wires the store, the feeling scheduler and the insight
//! aggregator together and is the only API the CLI and server use. All
//! mutations are serialized through the store lock; insight reads never
//! take it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::feedback::{FeedbackState, FeelingRequest, FeelingScheduler};
use crate::insights::{InsightAggregator, InsightsState};
use crate::persistence::{EngineState, STATE_VERSION};
use crate::store::MealStore;
use crate::types::{ClassifierResult, Feeling, MealId, MealRecord};

/// Counters for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub records: usize,
    pub capacity: usize,
    pub answered: usize,
    pub next_id: u64,
    pub revision: u64,
    pub pending_prompts: usize,
    pub armed_timers: usize,
}

/// Meal insight engine. Must be created and used inside a tokio runtime.
pub struct NutriEngine {
    config: Config,
    store: Mutex<MealStore>,
    scheduler: Arc<FeelingScheduler>,
    insights: Arc<InsightAggregator>,
}

impl NutriEngine {
    pub fn new(config: Config) -> Self {
        let store = MealStore::new(&config.engine);
        let scheduler = Arc::new(FeelingScheduler::new(config.engine.feeling_prompt_delay()));
        Self::assemble(config, store, scheduler)
    }

    /// Rebuild an engine from saved state. Prompts that already fired or
    /// finished are not scheduled again.
    pub fn restore(config: Config, state: EngineState) -> Result<Self> {
        if state.version != STATE_VERSION {
            return Err(EngineError::Persistence(format!(
                "unsupported state version {} (expected {})",
                state.version, STATE_VERSION
            )));
        }

        let store = MealStore::restore(&config.engine, state.records, state.next_id, state.revision);
        let snapshot = store.snapshot();
        let in_window: HashSet<MealId> = snapshot.iter().map(|r| r.id).collect();

        let entries: Vec<_> = state
            .feedback
            .into_iter()
            .filter(|e| in_window.contains(&e.meal_id))
            .collect();
        let scheduled: HashSet<MealId> = entries.iter().map(|e| e.meal_id).collect();

        let scheduler = Arc::new(FeelingScheduler::new(config.engine.feeling_prompt_delay()));
        scheduler.restore(entries);
        for record in snapshot.iter().filter(|r| !r.is_answered() && !scheduled.contains(&r.id)) {
            if let Err(e) = scheduler.arm(record.id) {
                warn!("Could not arm restored meal {}: {}", record.id, e);
            }
        }

        info!("Restored engine with {} meal(s)", snapshot.len());
        Ok(Self::assemble(config, store, scheduler))
    }

    fn assemble(config: Config, mut store: MealStore, scheduler: Arc<FeelingScheduler>) -> Self {
        let insights = Arc::new(InsightAggregator::new(&config));
        // Scheduler first: it must see an eviction before anything recomputes
        store.subscribe(scheduler.clone());
        store.subscribe(insights.clone());
        insights.refresh(&store.snapshot(), store.revision());

        Self {
            config,
            store: Mutex::new(store),
            scheduler,
            insights,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Log an already-classified meal
    pub async fn submit_meal(&self, mut result: ClassifierResult, timestamp: DateTime<Utc>) -> Result<MealId> {
        result.validate(self.config.engine.min_food_confidence)?;
        for food in &mut result.foods {
            food.category = Some(food.effective_category());
        }

        let mut store = self.store.lock().await;
        Ok(store.append(result, timestamp))
    }

    /// Classify a photo and log the meal. Nothing is recorded on failure.
    pub async fn analyze_meal(
        &self,
        classifier: &dyn Classifier,
        image: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<MealId> {
        let result = classifier.classify(image).await.map_err(|e| {
            warn!("Classification failed: {}", e);
            EngineError::from(e)
        })?;
        self.submit_meal(result, timestamp).await
    }

    /// Report how the user felt after a meal. Accepted once per meal.
    pub async fn submit_feeling(&self, meal_id: MealId, feeling: u8, symptoms: Vec<String>) -> Result<()> {
        let feeling = Feeling::new(feeling)?;

        let mut store = self.store.lock().await;
        if !store.contains(meal_id) {
            return Err(EngineError::UnknownMealId(meal_id));
        }
        if let Some(FeedbackState::Skipped { .. }) = self.scheduler.state(meal_id) {
            return Err(EngineError::AlreadyAnswered(meal_id));
        }
        store.record_feeling(meal_id, feeling, symptoms.into_iter().collect(), Utc::now())
    }

    /// Decline the feeling prompt for a meal
    pub async fn skip_feeling(&self, meal_id: MealId) -> Result<()> {
        let store = self.store.lock().await;
        match store.get(meal_id) {
            None => Err(EngineError::UnknownMealId(meal_id)),
            Some(record) if record.is_answered() => Err(EngineError::AlreadyAnswered(meal_id)),
            Some(_) => self.scheduler.skip(meal_id),
        }
    }

    /// Latest published insights
    pub fn get_insights(&self) -> Arc<InsightsState> {
        self.insights.current()
    }

    /// Up to `limit` most recent meals
    pub async fn get_history(&self, limit: usize) -> Vec<MealRecord> {
        self.store.lock().await.history(limit)
    }

    pub fn subscribe_feeling_requests(&self) -> broadcast::Receiver<FeelingRequest> {
        self.scheduler.subscribe()
    }

    /// Unanswered meals whose prompt is due
    pub fn pending_prompts(&self) -> Vec<FeelingRequest> {
        self.scheduler.pending_prompts(Utc::now())
    }

    pub fn feedback_state(&self, meal_id: MealId) -> Option<FeedbackState> {
        self.scheduler.state(meal_id)
    }

    pub async fn status(&self) -> EngineStatus {
        let store = self.store.lock().await;
        let snapshot = store.snapshot();
        EngineStatus {
            records: snapshot.len(),
            capacity: store.capacity(),
            answered: snapshot.iter().filter(|r| r.is_answered()).count(),
            next_id: store.next_id(),
            revision: store.revision(),
            pending_prompts: self.scheduler.pending_prompts(Utc::now()).len(),
            armed_timers: self.scheduler.armed_timers(),
        }
    }

    /// Serializable copy of the engine
    pub async fn export_state(&self) -> EngineState {
        let store = self.store.lock().await;
        let mut records = store.snapshot();
        records.reverse();
        debug!("Exporting {} meal(s)", records.len());
        EngineState {
            version: STATE_VERSION,
            next_id: store.next_id(),
            revision: store.revision(),
            records,
            feedback: self.scheduler.export(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClassificationError;
    use crate::types::{FoodItem, Nutrition};
    use chrono::TimeZone;

    fn meal(name: &str) -> ClassifierResult {
        ClassifierResult {
            foods: vec![FoodItem {
                name: name.to_string(),
                category: None,
                confidence: 85.0,
            }],
            nutrition: Nutrition::new().with("calories", 300.0),
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 1, hour, 0, 0).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_fills_missing_categories() {
        let engine = NutriEngine::new(Config::default());
        engine.submit_meal(meal("Cheddar Cheese"), at(9)).await.unwrap();
        let history = engine.get_history(10).await;
        assert_eq!(history[0].foods[0].category, Some(crate::types::FoodCategory::Dairy));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_result_not_recorded() {
        let engine = NutriEngine::new(Config::default());
        let empty = ClassifierResult {
            foods: vec![],
            nutrition: Nutrition::new(),
        };
        let err = engine.submit_meal(empty, at(9)).await.unwrap_err();
        assert_eq!(err, EngineError::Classification(ClassificationError::Unrecognized));
        assert_eq!(engine.status().await.records, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feeling_validation_order() {
        let engine = NutriEngine::new(Config::default());
        let id = engine.submit_meal(meal("Toast"), at(8)).await.unwrap();

        assert_eq!(
            engine.submit_feeling(id, 0, vec![]).await,
            Err(EngineError::InvalidFeelingValue(0))
        );
        assert_eq!(
            engine.submit_feeling(MealId(42), 3, vec![]).await,
            Err(EngineError::UnknownMealId(MealId(42)))
        );
        engine.submit_feeling(id, 3, vec!["Gas".to_string()]).await.unwrap();
        assert_eq!(
            engine.skip_feeling(id).await,
            Err(EngineError::AlreadyAnswered(id))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_blocks_later_feeling() {
        let engine = NutriEngine::new(Config::default());
        let id = engine.submit_meal(meal("Pasta"), at(12)).await.unwrap();
        engine.skip_feeling(id).await.unwrap();

        assert_eq!(
            engine.submit_feeling(id, 4, vec![]).await,
            Err(EngineError::AlreadyAnswered(id))
        );
        assert!(!engine.get_history(1).await[0].is_answered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_rejects_unknown_version() {
        let state = EngineState {
            version: STATE_VERSION + 1,
            ..Default::default()
        };
        assert!(matches!(
            NutriEngine::restore(Config::default(), state),
            Err(EngineError::Persistence(_))
        ));
    }
}
