//! Food intolerance inference
//!
//! Scores each food by how often an adverse feeling followed a meal that
//! contained it. This is an empirical conditional rate over the answered
//! meals in the window, not a trained model: the same snapshot always
//! yields the same hypotheses, and each one carries the counts behind it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::IntoleranceConfig;
use crate::types::{FoodCategory, MealRecord};

/// A suspected food intolerance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntoleranceHypothesis {
    pub food: String,
    pub category: FoodCategory,
    /// Adverse rate as a percentage, 0-100
    pub confidence: u8,
    /// Answered meals containing the food
    pub supporting_occurrences: usize,
    /// Of those, meals followed by an adverse feeling
    pub adverse_occurrences: usize,
    pub pattern: String,
    pub recommendation: String,
    /// Symptoms reported repeatedly after this food, most frequent first
    pub common_symptoms: Vec<String>,
}

#[derive(Default)]
struct FoodTally<'a> {
    occurrences: usize,
    adverse: usize,
    /// Category from the most recent occurrence
    category: Option<FoodCategory>,
    symptoms: BTreeMap<&'a str, usize>,
}

/// Per-food adverse-rate estimator
pub struct IntoleranceAnalyzer {
    config: IntoleranceConfig,
    adverse_threshold: u8,
}

impl IntoleranceAnalyzer {
    pub fn new(config: &IntoleranceConfig, adverse_threshold: u8) -> Self {
        Self {
            config: config.clone(),
            adverse_threshold,
        }
    }

    /// Hypotheses for a snapshot (most recent first), strongest first
    pub fn analyze(&self, snapshot: &[MealRecord]) -> Vec<IntoleranceHypothesis> {
        let mut tallies: BTreeMap<&str, FoodTally> = BTreeMap::new();

        for record in snapshot {
            let Some(feeling) = record.feeling else {
                continue;
            };
            let adverse = feeling.is_adverse(self.adverse_threshold);

            // A food listed twice in one meal still counts once
            let mut seen = BTreeSet::new();
            for food in &record.foods {
                if !seen.insert(food.name.as_str()) {
                    continue;
                }
                let tally = tallies.entry(food.name.as_str()).or_default();
                tally.occurrences += 1;
                if tally.category.is_none() {
                    tally.category = Some(food.effective_category());
                }
                if adverse {
                    tally.adverse += 1;
                }
                for symptom in &record.symptoms {
                    *tally.symptoms.entry(symptom.as_str()).or_default() += 1;
                }
            }
        }

        let mut hypotheses: Vec<IntoleranceHypothesis> = tallies
            .into_iter()
            .filter(|(_, t)| t.occurrences >= self.config.min_support)
            .filter_map(|(food, t)| {
                let confidence = confidence_percent(t.adverse, t.occurrences);
                if t.adverse == 0 || confidence < self.config.emission_threshold {
                    debug!("{}: {}% below emission threshold", food, confidence);
                    return None;
                }
                let category = t.category.unwrap_or(FoodCategory::Other);
                Some(IntoleranceHypothesis {
                    food: food.to_string(),
                    category,
                    confidence,
                    supporting_occurrences: t.occurrences,
                    adverse_occurrences: t.adverse,
                    pattern: format!(
                        "Adverse symptoms reported {}/{} times after consuming {}",
                        t.adverse, t.occurrences, food
                    ),
                    recommendation: recommendation_for(category, food),
                    common_symptoms: common_symptoms(&t.symptoms, self.config.common_symptom_min_reports),
                })
            })
            .collect();

        hypotheses.sort_by(|a, b| {
            b.confidence
                .cmp(&a.confidence)
                .then(b.supporting_occurrences.cmp(&a.supporting_occurrences))
                .then_with(|| a.food.cmp(&b.food))
        });
        hypotheses.truncate(self.config.max_hypotheses);
        hypotheses
    }
}

/// `round(100 * adverse / occurrences)` in integer arithmetic, halves up
fn confidence_percent(adverse: usize, occurrences: usize) -> u8 {
    if occurrences == 0 {
        return 0;
    }
    let pct = (200 * adverse + occurrences) / (2 * occurrences);
    pct.min(100) as u8
}

fn common_symptoms(counts: &BTreeMap<&str, usize>, min_reports: usize) -> Vec<String> {
    let mut common: Vec<(&str, usize)> = counts
        .iter()
        .filter(|(_, &n)| n >= min_reports.max(1))
        .map(|(s, &n)| (*s, n))
        .collect();
    common.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    common.into_iter().map(|(s, _)| s.to_string()).collect()
}

/// Advice keyed by food category
fn recommendation_for(category: FoodCategory, food: &str) -> String {
    match category {
        FoodCategory::Dairy => "Try lactose-free alternatives".to_string(),
        FoodCategory::Grains => "Try gluten-free options".to_string(),
        _ => format!("Consider eliminating {} for 2 weeks", food),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Feeling, FoodItem, MealId, Nutrition};
    use chrono::{Duration, TimeZone, Utc};

    fn record(id: u64, foods: &[(&str, FoodCategory)], feeling: Option<u8>, symptoms: &[&str]) -> MealRecord {
        MealRecord {
            id: MealId(id),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::hours(id as i64),
            foods: foods.iter().map(|(n, c)| FoodItem::new(n, *c, 90.0)).collect(),
            nutrition: Nutrition::new(),
            feeling: feeling.map(|f| Feeling::new(f).unwrap()),
            symptoms: symptoms.iter().map(|s| s.to_string()).collect(),
            feeling_timestamp: None,
        }
    }

    fn analyzer() -> IntoleranceAnalyzer {
        IntoleranceAnalyzer::new(&IntoleranceConfig::default(), 4)
    }

    #[test]
    fn test_confidence_rounding() {
        assert_eq!(confidence_percent(4, 5), 80);
        assert_eq!(confidence_percent(1, 3), 33);
        assert_eq!(confidence_percent(2, 3), 67);
        assert_eq!(confidence_percent(1, 8), 13);
        assert_eq!(confidence_percent(0, 4), 0);
        assert_eq!(confidence_percent(0, 0), 0);
    }

    #[test]
    fn test_dairy_four_of_five() {
        let dairy = ("Dairy", FoodCategory::Dairy);
        let snapshot = vec![
            record(5, &[dairy], Some(2), &["Bloating"]),
            record(4, &[dairy], Some(3), &["Bloating", "Gas"]),
            record(3, &[dairy], Some(5), &[]),
            record(2, &[dairy], Some(1), &["Gas"]),
            record(1, &[dairy], Some(2), &[]),
        ];
        let hypotheses = analyzer().analyze(&snapshot);
        assert_eq!(hypotheses.len(), 1);
        let h = &hypotheses[0];
        assert_eq!(h.confidence, 80);
        assert_eq!(h.supporting_occurrences, 5);
        assert_eq!(h.adverse_occurrences, 4);
        assert_eq!(h.pattern, "Adverse symptoms reported 4/5 times after consuming Dairy");
        assert_eq!(h.recommendation, "Try lactose-free alternatives");
        assert_eq!(h.common_symptoms, vec!["Bloating".to_string(), "Gas".to_string()]);
    }

    #[test]
    fn test_single_occurrence_never_emitted() {
        let snapshot = vec![
            record(2, &[("Shrimp", FoodCategory::Protein)], Some(1), &["Nausea"]),
            record(1, &[("Rice", FoodCategory::Grains)], Some(5), &[]),
        ];
        assert!(analyzer().analyze(&snapshot).is_empty());
    }

    #[test]
    fn test_unanswered_meals_ignored() {
        let bread = ("Bread", FoodCategory::Grains);
        let snapshot = vec![
            record(3, &[bread], None, &[]),
            record(2, &[bread], None, &[]),
            record(1, &[bread], Some(2), &[]),
        ];
        assert!(analyzer().analyze(&snapshot).is_empty());
    }

    #[test]
    fn test_below_emission_threshold_suppressed() {
        let eggs = ("Eggs", FoodCategory::Protein);
        let snapshot = vec![
            record(3, &[eggs], Some(2), &[]),
            record(2, &[eggs], Some(5), &[]),
            record(1, &[eggs], Some(4), &[]),
        ];
        // 1/3 = 33% < 40
        assert!(analyzer().analyze(&snapshot).is_empty());
    }

    #[test]
    fn test_ordering_is_deterministic() {
        let snapshot = vec![
            record(6, &[("Bread", FoodCategory::Grains), ("Milk", FoodCategory::Dairy)], Some(2), &[]),
            record(5, &[("Bread", FoodCategory::Grains), ("Milk", FoodCategory::Dairy)], Some(2), &[]),
            record(4, &[("Apple", FoodCategory::Fruits)], Some(2), &[]),
            record(3, &[("Apple", FoodCategory::Fruits)], Some(2), &[]),
            record(2, &[("Milk", FoodCategory::Dairy)], Some(1), &[]),
            record(1, &[("Bread", FoodCategory::Grains)], Some(5), &[]),
        ];
        let foods: Vec<String> = analyzer().analyze(&snapshot).into_iter().map(|h| h.food).collect();
        // Milk 3/3 (100, n=3), Apple 2/2 (100, n=2), Bread 2/3 (67)
        assert_eq!(foods, vec!["Milk", "Apple", "Bread"]);
    }

    #[test]
    fn test_duplicate_food_in_one_meal_counts_once() {
        let tofu = ("Tofu", FoodCategory::Protein);
        let snapshot = vec![
            record(2, &[tofu, tofu], Some(2), &[]),
            record(1, &[tofu], Some(5), &[]),
        ];
        let h = &analyzer().analyze(&snapshot)[0];
        assert_eq!(h.supporting_occurrences, 2);
        assert_eq!(h.confidence, 50);
        assert_eq!(h.recommendation, "Consider eliminating Tofu for 2 weeks");
    }

    #[test]
    fn test_truncates_to_max_hypotheses() {
        let config = IntoleranceConfig { max_hypotheses: 1, ..Default::default() };
        let analyzer = IntoleranceAnalyzer::new(&config, 4);
        let snapshot = vec![
            record(4, &[("A", FoodCategory::Other), ("B", FoodCategory::Other)], Some(1), &[]),
            record(3, &[("A", FoodCategory::Other), ("B", FoodCategory::Other)], Some(1), &[]),
        ];
        let hypotheses = analyzer.analyze(&snapshot);
        assert_eq!(hypotheses.len(), 1);
        assert_eq!(hypotheses[0].food, "A");
    }

    #[test]
    fn test_empty_snapshot() {
        assert!(analyzer().analyze(&[]).is_empty());
    }
}
