//! Error types for the insight engine
//!
//! Library operations return [`EngineError`]. Application layers (config,
//! CLI, server startup) wrap these in `anyhow` with context.

use thiserror::Error;

use crate::types::MealId;

/// Failure reported by (or about) the external meal classifier
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassificationError {
    /// Nothing food-like was recognized in the image
    #[error("No food recognized in image")]
    Unrecognized,

    /// A recognized food fell outside the accepted confidence range
    #[error("Low confidence for '{food}': {confidence}")]
    LowConfidence { food: String, confidence: f64 },

    /// Nutrient amounts must be finite and non-negative
    #[error("Invalid amount for nutrient '{nutrient}': {amount}")]
    InvalidNutrition { nutrient: String, amount: f64 },

    /// No classifier endpoint is configured
    #[error("Classifier not configured")]
    NotConfigured,

    /// Transport, status or decoding failure from the classifier service
    #[error("Classifier request failed: {0}")]
    Upstream(String),
}

impl ClassificationError {
    /// Whether the user should simply retake the photo
    pub fn is_retake(&self) -> bool {
        matches!(
            self,
            ClassificationError::Unrecognized | ClassificationError::LowConfidence { .. }
        )
    }
}

/// Main error type for engine operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Classifier failed; no record was created
    #[error("Classification failed: {0}")]
    Classification(#[from] ClassificationError),

    /// Feeling outside 1..=5
    #[error("Invalid feeling value {0}: expected 1-5")]
    InvalidFeelingValue(i64),

    /// Meal was never logged or has left the rolling window
    #[error("Unknown meal id: {0}")]
    UnknownMealId(MealId),

    /// Feeling already submitted or skipped for this meal
    #[error("Feeling already answered for meal {0}")]
    AlreadyAnswered(MealId),

    /// Scheduler state machine violation
    #[error("Invalid feedback state for meal {meal_id}: {state}")]
    InvalidState { meal_id: MealId, state: String },

    /// Saved state could not be restored
    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
