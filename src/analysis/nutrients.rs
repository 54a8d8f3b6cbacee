//! Nutrient gap detection
//!
//! Sums each target nutrient per calendar day and reports how many of the
//! most recent logged days in a row fell short of the daily target.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::{NutrientConfig, SeverityCutoffs};
use crate::types::MealRecord;

/// Gap severity, ordered low < medium < high
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Severity for a deficient streak, `None` when there is no gap
    pub fn from_streak(days: u32, cutoffs: &SeverityCutoffs) -> Option<Self> {
        if days >= cutoffs.high_days {
            Some(Severity::High)
        } else if days >= cutoffs.medium_days {
            Some(Severity::Medium)
        } else if days >= cutoffs.low_days.max(1) {
            Some(Severity::Low)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// A nutrient persistently below its daily target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutrientGap {
    pub nutrient: String,
    pub display_name: String,
    pub severity: Severity,
    pub days_deficient: u32,
    pub daily_target: f64,
    pub unit: String,
    /// Total on the most recent logged day
    pub latest_intake: f64,
    pub recommendation: String,
    pub target_foods: Vec<String>,
}

pub struct NutrientGapAnalyzer {
    config: NutrientConfig,
    offset: FixedOffset,
}

impl NutrientGapAnalyzer {
    pub fn new(config: &NutrientConfig) -> Self {
        let offset = FixedOffset::east_opt(config.day_offset_minutes.saturating_mul(60)).unwrap_or_else(|| {
            warn!(
                "day_offset_minutes {} out of range, using UTC",
                config.day_offset_minutes
            );
            Utc.fix()
        });
        Self {
            config: config.clone(),
            offset,
        }
    }

    /// Calendar day a timestamp belongs to
    pub fn day_of(&self, timestamp: DateTime<Utc>) -> NaiveDate {
        timestamp.with_timezone(&self.offset).date_naive()
    }

    /// Gaps for a snapshot, most severe first
    pub fn analyze(&self, snapshot: &[MealRecord]) -> Vec<NutrientGap> {
        let mut days: BTreeMap<NaiveDate, Vec<&MealRecord>> = BTreeMap::new();
        for record in snapshot {
            days.entry(self.day_of(record.timestamp)).or_default().push(record);
        }
        if days.is_empty() {
            return Vec::new();
        }

        let mut gaps = Vec::new();
        for (nutrient, target) in &self.config.targets {
            let threshold = target.daily_target * self.config.deficiency_ratio;
            let mut streak = 0u32;
            let mut latest_intake = None;

            for meals in days.values().rev() {
                let total: f64 = meals.iter().map(|m| m.nutrition.get(nutrient)).sum();
                latest_intake.get_or_insert(total);
                if total < threshold {
                    streak += 1;
                } else {
                    break;
                }
            }

            let Some(severity) = Severity::from_streak(streak, &self.config.severity) else {
                continue;
            };
            debug!("{} deficient for {} day(s): {}", nutrient, streak, severity);

            gaps.push(NutrientGap {
                nutrient: nutrient.clone(),
                display_name: display_name(nutrient),
                severity,
                days_deficient: streak,
                daily_target: target.daily_target,
                unit: target.unit.clone(),
                latest_intake: latest_intake.unwrap_or(0.0),
                recommendation: recommendation(nutrient).to_string(),
                target_foods: target_foods(nutrient).iter().map(|f| f.to_string()).collect(),
            });
        }

        gaps.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.days_deficient.cmp(&a.days_deficient))
                .then_with(|| a.nutrient.cmp(&b.nutrient))
        });
        gaps
    }
}

/// Human-readable nutrient name
pub fn display_name(nutrient: &str) -> String {
    match nutrient {
        "vitaminC" => "Vitamin C".to_string(),
        "vitaminD" => "Vitamin D".to_string(),
        "omega3" => "Omega-3".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}

fn recommendation(nutrient: &str) -> &'static str {
    match nutrient {
        "vitaminC" => "Add citrus fruits or bell peppers",
        "omega3" => "Include fatty fish or walnuts",
        "fiber" => "Increase whole grains and vegetables",
        _ => "Diversify your diet",
    }
}

fn target_foods(nutrient: &str) -> &'static [&'static str] {
    match nutrient {
        "vitaminC" => &["Oranges", "Strawberries", "Bell Peppers"],
        "omega3" => &["Salmon", "Walnuts", "Chia Seeds"],
        "fiber" => &["Oats", "Lentils", "Broccoli"],
        _ => &["Whole Foods", "Vegetables"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NutrientTarget;
    use crate::types::{FoodCategory, FoodItem, MealId, Nutrition};
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    fn meal(id: u64, day: u32, hour: u32, nutrition: Nutrition) -> MealRecord {
        MealRecord {
            id: MealId(id),
            timestamp: Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap(),
            foods: vec![FoodItem::new("Plate", FoodCategory::Other, 80.0)],
            nutrition,
            feeling: None,
            symptoms: BTreeSet::new(),
            feeling_timestamp: None,
        }
    }

    fn fiber_only() -> NutrientConfig {
        NutrientConfig {
            targets: [("fiber".to_string(), NutrientTarget::new(25.0, "g"))].into(),
            ..Default::default()
        }
    }

    fn fiber(amount: f64) -> Nutrition {
        Nutrition::new().with("fiber", amount)
    }

    #[test]
    fn test_severity_cutoffs() {
        let cutoffs = SeverityCutoffs::default();
        assert_eq!(Severity::from_streak(0, &cutoffs), None);
        assert_eq!(Severity::from_streak(1, &cutoffs), Some(Severity::Low));
        assert_eq!(Severity::from_streak(3, &cutoffs), Some(Severity::Medium));
        assert_eq!(Severity::from_streak(7, &cutoffs), Some(Severity::High));
        assert!(Severity::High > Severity::Low);
    }

    #[test]
    fn test_missing_days_do_not_break_streak() {
        // Days 1, 2, 4, 5 logged; day 3 has no meals
        let snapshot = vec![
            meal(5, 5, 12, fiber(5.0)),
            meal(4, 4, 12, fiber(8.0)),
            meal(3, 2, 18, fiber(6.0)),
            meal(2, 2, 8, fiber(6.0)),
            meal(1, 1, 12, fiber(3.0)),
        ];
        let gaps = NutrientGapAnalyzer::new(&fiber_only()).analyze(&snapshot);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].severity, Severity::High);
        assert_eq!(gaps[0].days_deficient, 4);
        assert_eq!(gaps[0].latest_intake, 5.0);
        assert_eq!(gaps[0].recommendation, "Increase whole grains and vegetables");
    }

    #[test]
    fn test_meals_in_one_day_are_summed() {
        let snapshot = vec![
            meal(3, 2, 19, fiber(10.0)),
            meal(2, 2, 8, fiber(16.0)),
            meal(1, 1, 12, fiber(2.0)),
        ];
        // Day 2 totals 26 >= 25, so the streak is 0
        assert!(NutrientGapAnalyzer::new(&fiber_only()).analyze(&snapshot).is_empty());
    }

    #[test]
    fn test_streak_stops_at_first_sufficient_day() {
        let snapshot = vec![
            meal(3, 3, 12, fiber(1.0)),
            meal(2, 2, 12, fiber(30.0)),
            meal(1, 1, 12, fiber(1.0)),
        ];
        let gaps = NutrientGapAnalyzer::new(&fiber_only()).analyze(&snapshot);
        assert_eq!(gaps[0].days_deficient, 1);
        assert_eq!(gaps[0].severity, Severity::Low);
    }

    #[test]
    fn test_day_offset_moves_late_meals() {
        let config = NutrientConfig {
            day_offset_minutes: -300,
            ..fiber_only()
        };
        let analyzer = NutrientGapAnalyzer::new(&config);
        // 02:00 UTC on the 2nd is still the 1st at UTC-5
        let ts = Utc.with_ymd_and_hms(2024, 6, 2, 2, 0, 0).unwrap();
        assert_eq!(analyzer.day_of(ts), NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
    }

    #[test]
    fn test_sort_and_fallback_tables() {
        let snapshot = vec![
            meal(2, 2, 12, Nutrition::new().with("protein", 60.0)),
            meal(1, 1, 12, Nutrition::new()),
        ];
        let gaps = NutrientGapAnalyzer::new(&NutrientConfig::default()).analyze(&snapshot);
        let names: Vec<&str> = gaps.iter().map(|g| g.nutrient.as_str()).collect();
        // protein met on day 2; the rest are short two days running
        assert_eq!(names, vec!["calcium", "fiber", "iron", "vitaminC"]);
        assert!(gaps.iter().all(|g| g.severity == Severity::Medium));

        let iron = gaps.iter().find(|g| g.nutrient == "iron").unwrap();
        assert_eq!(iron.recommendation, "Diversify your diet");
        assert_eq!(iron.target_foods, vec!["Whole Foods", "Vegetables"]);
        assert_eq!(iron.display_name, "Iron");
    }

    #[test]
    fn test_display_names() {
        assert_eq!(display_name("vitaminC"), "Vitamin C");
        assert_eq!(display_name("omega3"), "Omega-3");
        assert_eq!(display_name("calcium"), "Calcium");
    }

    #[test]
    fn test_empty_snapshot() {
        assert!(NutrientGapAnalyzer::new(&NutrientConfig::default()).analyze(&[]).is_empty());
    }
}
