//! End-to-end engine behavior:
//! - Rolling window and feeling lifecycle
//! - Prompt timers (paused tokio clock)
//! - Insight properties over realistic meal sequences
//! - Classifier failures and state restore

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use mockall::mock;
use nutrisnap::analysis::Severity;
use nutrisnap::insights::InsightAggregator;
use nutrisnap::persistence::{open_engine, StateFile};
use nutrisnap::{
    ClassificationError, Classifier, ClassifierResult, Config, EngineError, FeedbackState, FoodCategory, FoodItem,
    InsightsState, MealId, NutriEngine, Nutrition,
};
use std::time::Duration as StdDuration;
use tempfile::TempDir;
use tokio::time::timeout;

mock! {
    pub Vision {}

    #[async_trait]
    impl Classifier for Vision {
        async fn classify(&self, image: &[u8]) -> Result<ClassifierResult, ClassificationError>;
    }
}

fn day(d: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, d, hour, 0, 0).unwrap()
}

fn meal(foods: &[(&str, FoodCategory)], nutrition: Nutrition) -> ClassifierResult {
    ClassifierResult {
        foods: foods.iter().map(|(n, c)| FoodItem::new(n, *c, 90.0)).collect(),
        nutrition,
    }
}

fn plain(name: &str) -> ClassifierResult {
    meal(&[(name, FoodCategory::Other)], Nutrition::new().with("calories", 400.0))
}

fn ready(state: &InsightsState) -> &nutrisnap::InsightsSnapshot {
    state.snapshot().expect("insights should be ready")
}

// =====================================================================
// WINDOW AND FEELING LIFECYCLE
// =====================================================================

#[tokio::test(start_paused = true)]
async fn test_insufficient_data_below_three_meals() {
    let engine = NutriEngine::new(Config::default());
    engine.submit_meal(plain("Toast"), day(1, 8)).await.unwrap();
    engine.submit_meal(plain("Soup"), day(1, 13)).await.unwrap();

    assert_eq!(
        *engine.get_insights(),
        InsightsState::InsufficientData { records: 2, required: 3 }
    );

    engine.submit_meal(plain("Stew"), day(1, 19)).await.unwrap();
    assert!(engine.get_insights().is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_double_feeling_rejected_and_record_unchanged() {
    let engine = NutriEngine::new(Config::default());
    let id = engine.submit_meal(plain("Curry"), day(2, 19)).await.unwrap();

    engine
        .submit_feeling(id, 2, vec!["Bloating".to_string()])
        .await
        .unwrap();
    let before = engine.get_history(1).await;

    assert_eq!(
        engine.submit_feeling(id, 5, vec![]).await,
        Err(EngineError::AlreadyAnswered(id))
    );
    assert_eq!(engine.get_history(1).await, before);
    assert_eq!(before[0].feeling.map(|f| f.value()), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_eleventh_meal_evicts_oldest_and_cancels_prompt() {
    let engine = NutriEngine::new(Config::default());
    let mut ids = Vec::new();
    for i in 0..11 {
        ids.push(engine.submit_meal(plain("Snack"), day(3, 0) + Duration::hours(i)).await.unwrap());
    }

    let history = engine.get_history(100).await;
    assert_eq!(history.len(), 10);
    assert_eq!(history.last().map(|r| r.id), Some(ids[1]));
    assert!(matches!(
        engine.feedback_state(ids[0]),
        Some(FeedbackState::Cancelled { .. })
    ));
    assert_eq!(engine.status().await.armed_timers, 10);

    assert_eq!(
        engine.submit_feeling(ids[0], 3, vec![]).await,
        Err(EngineError::UnknownMealId(ids[0]))
    );
}

#[tokio::test(start_paused = true)]
async fn test_ids_never_reused() {
    let config = Config {
        engine: nutrisnap::config::EngineConfig {
            window_capacity: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    let engine = NutriEngine::new(config);
    let mut seen = std::collections::HashSet::new();
    for i in 0..6 {
        let id = engine.submit_meal(plain("Rice"), day(4, i)).await.unwrap();
        assert!(seen.insert(id));
    }
}

// =====================================================================
// PROMPT TIMERS
// =====================================================================

#[tokio::test(start_paused = true)]
async fn test_prompt_fires_after_delay() {
    let engine = NutriEngine::new(Config::default());
    let mut requests = engine.subscribe_feeling_requests();
    let id = engine.submit_meal(plain("Burrito"), Utc::now()).await.unwrap();

    assert!(engine.pending_prompts().is_empty());
    let request = timeout(StdDuration::from_secs(7300), requests.recv())
        .await
        .expect("prompt should fire")
        .unwrap();
    assert_eq!(request.meal_id, id);
    assert_eq!(engine.pending_prompts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_answer_before_prompt_prevents_it() {
    let engine = NutriEngine::new(Config::default());
    let mut requests = engine.subscribe_feeling_requests();
    let id = engine.submit_meal(plain("Ramen"), Utc::now()).await.unwrap();

    engine.submit_feeling(id, 4, vec![]).await.unwrap();
    assert!(timeout(StdDuration::from_secs(3 * 7200), requests.recv()).await.is_err());
    assert!(matches!(engine.feedback_state(id), Some(FeedbackState::Answered { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_skip_is_terminal() {
    let engine = NutriEngine::new(Config::default());
    let mut requests = engine.subscribe_feeling_requests();
    let id = engine.submit_meal(plain("Tacos"), Utc::now()).await.unwrap();

    engine.skip_feeling(id).await.unwrap();
    assert_eq!(engine.skip_feeling(id).await, Err(EngineError::AlreadyAnswered(id)));
    assert!(timeout(StdDuration::from_secs(3 * 7200), requests.recv()).await.is_err());
    assert_eq!(engine.status().await.armed_timers, 0);
}

// =====================================================================
// INSIGHT PROPERTIES
// =====================================================================

#[tokio::test(start_paused = true)]
async fn test_dairy_four_of_five_adverse() {
    let engine = NutriEngine::new(Config::default());
    let feelings = [2u8, 3, 5, 1, 2];
    for (i, feeling) in feelings.iter().enumerate() {
        let id = engine
            .submit_meal(
                meal(&[("Dairy", FoodCategory::Dairy)], Nutrition::new().with("calcium", 300.0)),
                day(5, 7) + Duration::hours(3 * i as i64),
            )
            .await
            .unwrap();
        engine
            .submit_feeling(id, *feeling, vec!["Bloating".to_string()])
            .await
            .unwrap();
    }

    let insights = engine.get_insights();
    let h = &ready(&insights).intolerances[0];
    assert_eq!(h.food, "Dairy");
    assert_eq!(h.confidence, 80);
    assert_eq!(h.supporting_occurrences, 5);
    assert_eq!(h.recommendation, "Try lactose-free alternatives");
    assert_eq!(h.common_symptoms, vec!["Bloating".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_five_meal_scenario_filters_and_sorts() {
    let engine = NutriEngine::new(Config::default());
    let script: [(&[(&str, FoodCategory)], u8); 5] = [
        (&[("Milk", FoodCategory::Dairy), ("Bread", FoodCategory::Grains)], 2),
        (&[("Milk", FoodCategory::Dairy)], 1),
        (&[("Bread", FoodCategory::Grains)], 5),
        (&[("Milk", FoodCategory::Dairy)], 4),
        (&[("Salmon", FoodCategory::Protein)], 2),
    ];
    for (i, (foods, feeling)) in script.iter().enumerate() {
        let id = engine
            .submit_meal(meal(foods, Nutrition::new()), day(6, 6) + Duration::hours(3 * i as i64))
            .await
            .unwrap();
        engine.submit_feeling(id, *feeling, vec![]).await.unwrap();
    }

    let insights = engine.get_insights();
    let found: Vec<(String, u8)> = ready(&insights)
        .intolerances
        .iter()
        .map(|h| (h.food.clone(), h.confidence))
        .collect();
    // Salmon has a single occurrence and is never surfaced
    assert_eq!(found, vec![("Milk".to_string(), 67), ("Bread".to_string(), 50)]);
}

#[tokio::test(start_paused = true)]
async fn test_fiber_gap_spans_missing_day() {
    let engine = NutriEngine::new(Config::default());
    // Days 1, 2, 4, 5 logged; nothing on day 3
    for (d, hour) in [(1, 12), (2, 9), (2, 19), (4, 12), (5, 12)] {
        engine
            .submit_meal(
                meal(&[("Fries", FoodCategory::Other)], Nutrition::new().with("fiber", 3.0)),
                day(d, hour),
            )
            .await
            .unwrap();
    }

    let insights = engine.get_insights();
    let fiber = ready(&insights)
        .nutritional_gaps
        .iter()
        .find(|g| g.nutrient == "fiber")
        .cloned()
        .expect("fiber gap");
    assert_eq!(fiber.severity, Severity::High);
    assert_eq!(fiber.days_deficient, 4);
    assert_eq!(fiber.display_name, "Fiber");
    assert_eq!(fiber.target_foods, vec!["Oats", "Lentils", "Broccoli"]);
}

#[tokio::test(start_paused = true)]
async fn test_recompute_is_bit_identical() {
    let config = Config::default();
    let engine = NutriEngine::new(config.clone());
    for i in 0..4 {
        let id = engine
            .submit_meal(
                meal(&[("Yogurt", FoodCategory::Dairy)], Nutrition::new().with("protein", 10.0 * i as f64)),
                day(7, 8) + Duration::hours(4 * i),
            )
            .await
            .unwrap();
        engine.submit_feeling(id, 2, vec!["Gas".to_string()]).await.unwrap();
    }

    let status = engine.status().await;
    let history = engine.get_history(100).await;
    let aggregator = InsightAggregator::new(&config);
    let first = serde_json::to_string(&aggregator.recompute(&history, status.revision)).unwrap();
    let second = serde_json::to_string(&aggregator.recompute(&history, status.revision)).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, serde_json::to_string(engine.get_insights().as_ref()).unwrap());
}

// =====================================================================
// CLASSIFIER
// =====================================================================

#[tokio::test(start_paused = true)]
async fn test_analyze_meal_records_classifier_result() {
    let engine = NutriEngine::new(Config::default());
    let mut vision = MockVision::new();
    vision
        .expect_classify()
        .withf(|image: &[u8]| image == b"photo")
        .times(1)
        .returning(|_| Ok(meal(&[("Banana", FoodCategory::Fruits)], Nutrition::new().with("sugar", 14.0))));

    let id = engine.analyze_meal(&vision, b"photo", day(8, 10)).await.unwrap();
    let history = engine.get_history(1).await;
    assert_eq!(history[0].id, id);
    assert!(history[0].contains_food("Banana"));
}

#[tokio::test(start_paused = true)]
async fn test_classifier_failure_appends_nothing() {
    let engine = NutriEngine::new(Config::default());
    let mut vision = MockVision::new();
    vision
        .expect_classify()
        .times(1)
        .returning(|_| Err(ClassificationError::Upstream("timeout".to_string())));

    let err = engine.analyze_meal(&vision, b"blurry", day(8, 11)).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::Classification(ClassificationError::Upstream("timeout".to_string()))
    );
    assert_eq!(engine.status().await.records, 0);
    assert_eq!(engine.status().await.next_id, 1);
}

#[tokio::test(start_paused = true)]
async fn test_low_confidence_rejected() {
    let mut config = Config::default();
    config.engine.min_food_confidence = 50.0;
    let engine = NutriEngine::new(config);
    let result = ClassifierResult {
        foods: vec![FoodItem::new("Mystery", FoodCategory::Other, 20.0)],
        nutrition: Nutrition::new(),
    };
    let err = engine.submit_meal(result, day(8, 12)).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Classification(ClassificationError::LowConfidence { .. })
    ));
}

// =====================================================================
// RESTORE
// =====================================================================

#[tokio::test(start_paused = true)]
async fn test_restore_keeps_terminal_states_and_rearms_open_meals() {
    let dir = TempDir::new().unwrap();
    let file = StateFile::new(dir.path().join("state.json"));

    {
        let engine = open_engine(Config::default(), &file).await.unwrap();
        let answered = engine.submit_meal(plain("Eggs"), Utc::now()).await.unwrap();
        let skipped = engine.submit_meal(plain("Bagel"), Utc::now()).await.unwrap();
        engine.submit_meal(plain("Soup"), Utc::now()).await.unwrap();
        engine.submit_feeling(answered, 5, vec![]).await.unwrap();
        engine.skip_feeling(skipped).await.unwrap();
        file.save(&engine.export_state().await).await.unwrap();
    }

    let engine = open_engine(Config::default(), &file).await.unwrap();
    let mut requests = engine.subscribe_feeling_requests();

    assert!(matches!(engine.feedback_state(MealId(1)), Some(FeedbackState::Answered { .. })));
    assert!(matches!(engine.feedback_state(MealId(2)), Some(FeedbackState::Skipped { .. })));
    assert_eq!(
        engine.submit_feeling(MealId(2), 3, vec![]).await,
        Err(EngineError::AlreadyAnswered(MealId(2)))
    );

    let request = timeout(StdDuration::from_secs(7300), requests.recv())
        .await
        .expect("open meal re-armed")
        .unwrap();
    assert_eq!(request.meal_id, MealId(3));
    assert!(timeout(StdDuration::from_secs(3 * 7200), requests.recv()).await.is_err());

    let next = engine.submit_meal(plain("Pie"), Utc::now()).await.unwrap();
    assert_eq!(next, MealId(4));
}
