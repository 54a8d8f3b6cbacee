//! NutriSnap - meal insight engine
//!
//! Logs classified meals into a rolling window and turns them into:
//! - Delayed "how do you feel?" prompts, one cancellable timer per meal
//! - Food intolerance hypotheses from feeling/food co-occurrence
//! - Nutrient gap detection against daily targets
//! - Energy, meal timing and weekly trend summaries
//!
//! # Example
//!
//! ```ignore
//! use nutrisnap::{Config, NutriEngine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = NutriEngine::new(Config::load()?);
//!     let id = engine.submit_meal(result, chrono::Utc::now()).await?;
//!     engine.submit_feeling(id, 2, vec!["Bloating".into()]).await?;
//!     println!("{:?}", engine.get_insights());
//!     Ok(())
//! }
//! ```

// Core modules
pub mod types;
pub mod error;
pub mod config;
pub mod store;
pub mod feedback;
pub mod analysis;
pub mod insights;
pub mod classifier;
pub mod engine;
pub mod persistence;

// Outer surfaces
pub mod server;
pub mod cli;

pub use classifier::{Classifier, HttpClassifier};
pub use config::Config;
pub use engine::{EngineStatus, NutriEngine};
pub use error::{ClassificationError, EngineError};
pub use feedback::{FeedbackState, FeelingRequest};
pub use insights::{InsightsSnapshot, InsightsState};
pub use persistence::{EngineState, StateFile};
pub use server::{start as start_server, ServerState};
pub use types::{ClassifierResult, Feeling, FoodCategory, FoodItem, MealId, MealRecord, Nutrition};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Meal Insight Engine", NAME, VERSION)
}

/// Truncate to at most `max` bytes without splitting a character
pub fn truncate_safe(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
