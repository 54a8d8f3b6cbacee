//! Analytics over the meal window
//!
//! Every analyzer is a pure function of a snapshot (most recent first):
//! - Intolerance inference from feeling/food co-occurrence
//! - Nutrient gaps against daily targets
//! - Predictions and weekly trends

pub mod intolerance;
pub mod nutrients;
pub mod trends;

pub use intolerance::{IntoleranceAnalyzer, IntoleranceHypothesis};
pub use nutrients::{NutrientGap, NutrientGapAnalyzer, Severity};
pub use trends::{DigestiveHealth, Predictions, ProteinTrend, TrendAnalyzer, WeeklyTrends};
