//! Shared types used across modules
//!
//! Meal records, foods, nutrition vectors and the classifier output they
//! are built from. Kept here so the store, the analyzers and the boundary
//! layers can all depend on them without depending on each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ClassificationError, EngineError};

/// Nutrient keys produced by the classifier contract
pub const NUTRIENT_KEYS: &[&str] = &[
    "calories", "protein", "carbs", "fat", "fiber", "sugar", "vitaminC", "iron", "calcium",
];

/// Unique identifier of a meal record. Monotonically increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MealId(pub u64);

impl std::fmt::Display for MealId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MealId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(MealId)
    }
}

/// Food category as reported by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FoodCategory {
    Protein,
    Grains,
    Vegetables,
    Fruits,
    Dairy,
    Fats,
    #[serde(other)]
    Other,
}

impl FoodCategory {
    /// Parse a category label, falling back to `Other`
    pub fn from_label(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "protein" => FoodCategory::Protein,
            "grains" | "grain" => FoodCategory::Grains,
            "vegetables" | "vegetable" => FoodCategory::Vegetables,
            "fruits" | "fruit" => FoodCategory::Fruits,
            "dairy" => FoodCategory::Dairy,
            "fats" | "fat" => FoodCategory::Fats,
            _ => FoodCategory::Other,
        }
    }
}

impl std::fmt::Display for FoodCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FoodCategory::Protein => write!(f, "protein"),
            FoodCategory::Grains => write!(f, "grains"),
            FoodCategory::Vegetables => write!(f, "vegetables"),
            FoodCategory::Fruits => write!(f, "fruits"),
            FoodCategory::Dairy => write!(f, "dairy"),
            FoodCategory::Fats => write!(f, "fats"),
            FoodCategory::Other => write!(f, "other"),
        }
    }
}

/// A single recognized food
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodItem {
    pub name: String,
    /// Missing or blank categories are inferred from the name
    #[serde(default, deserialize_with = "deserialize_category")]
    pub category: Option<FoodCategory>,
    /// Classifier confidence, 0-100
    pub confidence: f64,
}

impl FoodItem {
    pub fn new(name: &str, category: FoodCategory, confidence: f64) -> Self {
        Self {
            name: name.to_string(),
            category: Some(category),
            confidence,
        }
    }

    /// Category reported by the classifier, or the keyword guess
    pub fn effective_category(&self) -> FoodCategory {
        self.category
            .unwrap_or_else(|| crate::classifier::categorize_food(&self.name))
    }
}

fn deserialize_category<'de, D>(deserializer: D) -> Result<Option<FoodCategory>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let label: Option<String> = Option::deserialize(deserializer)?;
    Ok(label
        .filter(|l| !l.trim().is_empty())
        .map(|l| FoodCategory::from_label(&l)))
}

/// Nutrient name -> amount. Ordered so serialization is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nutrition(pub BTreeMap<String, f64>);

impl Nutrition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, nutrient: &str, amount: f64) -> Self {
        self.0.insert(nutrient.to_string(), amount);
        self
    }

    /// Amount of a nutrient, 0 when absent
    pub fn get(&self, nutrient: &str) -> f64 {
        self.0.get(nutrient).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }
}

/// Subjective feeling after a meal: 1 (worst) to 5 (best)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Feeling(u8);

impl Feeling {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: u8) -> Result<Self, EngineError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(EngineError::InvalidFeelingValue(value.into()))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Whether this feeling counts as an adverse reaction
    pub fn is_adverse(self, threshold: u8) -> bool {
        self.0 < threshold
    }
}

impl TryFrom<u8> for Feeling {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Feeling::new(value)
    }
}

impl From<Feeling> for u8 {
    fn from(f: Feeling) -> u8 {
        f.0
    }
}

/// Output of the external meal classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierResult {
    pub foods: Vec<FoodItem>,
    pub nutrition: Nutrition,
}

impl ClassifierResult {
    /// Reject results the engine must not turn into records
    pub fn validate(&self, min_food_confidence: f64) -> Result<(), ClassificationError> {
        if self.foods.is_empty() {
            return Err(ClassificationError::Unrecognized);
        }
        for food in &self.foods {
            if food.name.trim().is_empty() {
                return Err(ClassificationError::Unrecognized);
            }
            if !food.confidence.is_finite()
                || !(0.0..=100.0).contains(&food.confidence)
                || food.confidence < min_food_confidence
            {
                return Err(ClassificationError::LowConfidence {
                    food: food.name.clone(),
                    confidence: food.confidence,
                });
            }
        }
        for (nutrient, amount) in self.nutrition.iter() {
            if !amount.is_finite() || *amount < 0.0 {
                return Err(ClassificationError::InvalidNutrition {
                    nutrient: nutrient.clone(),
                    amount: *amount,
                });
            }
        }
        Ok(())
    }
}

/// One logged eating event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealRecord {
    pub id: MealId,
    pub timestamp: DateTime<Utc>,
    pub foods: Vec<FoodItem>,
    pub nutrition: Nutrition,
    #[serde(default)]
    pub feeling: Option<Feeling>,
    #[serde(default)]
    pub symptoms: BTreeSet<String>,
    #[serde(default)]
    pub feeling_timestamp: Option<DateTime<Utc>>,
}

impl MealRecord {
    pub fn is_answered(&self) -> bool {
        self.feeling.is_some()
    }

    pub fn contains_food(&self, name: &str) -> bool {
        self.foods.iter().any(|f| f.name == name)
    }

    /// Short food list for display
    pub fn food_summary(&self) -> String {
        self.foods
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
