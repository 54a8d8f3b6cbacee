//! Short-horizon predictions and window-wide trends

use serde::{Deserialize, Serialize};

use crate::config::TrendConfig;
use crate::types::MealRecord;

const SLOPE_EPSILON: f64 = 1e-9;

/// Near-term guidance derived from the latest meals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predictions {
    pub energy_level: u8,
    /// Mean gap between meals, one decimal
    pub next_meal_hours: f64,
    pub next_meal_timing: String,
    pub optimal_next_meal: String,
    pub sleep_quality: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProteinTrend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DigestiveHealth {
    Excellent,
    Improving,
    NeedsAttention,
}

impl std::fmt::Display for DigestiveHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestiveHealth::Excellent => write!(f, "excellent"),
            DigestiveHealth::Improving => write!(f, "improving"),
            DigestiveHealth::NeedsAttention => write!(f, "needs attention"),
        }
    }
}

/// Aggregates over the whole window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyTrends {
    pub avg_calories: u32,
    pub protein_trend: ProteinTrend,
    /// Mean reported feeling, `None` until one is reported
    pub mood_score: Option<f64>,
    pub digestive_health: DigestiveHealth,
    pub digestive_reports: usize,
}

pub struct TrendAnalyzer {
    config: TrendConfig,
}

impl TrendAnalyzer {
    pub fn new(config: &TrendConfig) -> Self {
        Self { config: config.clone() }
    }

    /// Predictions from a snapshot, most recent first
    pub fn predict(&self, snapshot: &[MealRecord]) -> Predictions {
        let c = &self.config;
        let recent = &snapshot[..snapshot.len().min(c.recent_meals.max(1))];
        let avg_protein = mean(recent.iter().map(|m| m.nutrition.get("protein")));
        let avg_carbs = mean(recent.iter().map(|m| m.nutrition.get("carbs")));

        let energy_level = if avg_protein > c.energy_protein_threshold && avg_carbs > c.energy_carbs_threshold {
            c.high_energy_level
        } else {
            c.low_energy_level
        };

        let gaps: Vec<f64> = snapshot
            .windows(2)
            .map(|pair| (pair[0].timestamp - pair[1].timestamp).num_seconds().abs() as f64 / 3600.0)
            .filter(|hours| *hours < c.max_meal_gap_hours)
            .collect();
        let next_meal_hours = if gaps.is_empty() {
            c.default_meal_gap_hours
        } else {
            round1(gaps.iter().sum::<f64>() / gaps.len() as f64)
        };

        let optimal_next_meal = if avg_protein < c.low_protein_threshold {
            "High protein, moderate carbs"
        } else if avg_carbs < c.low_carbs_threshold {
            "Balanced with complex carbs"
        } else {
            "Light meal with vegetables"
        };

        let sleep_quality = match snapshot.first() {
            Some(last) if last.nutrition.get("sugar") >= c.high_sugar_threshold => "May affect sleep - high sugar",
            _ => "Good - balanced macros",
        };

        Predictions {
            energy_level,
            next_meal_hours,
            next_meal_timing: format!("{:.1} hours", next_meal_hours),
            optimal_next_meal: optimal_next_meal.to_string(),
            sleep_quality: sleep_quality.to_string(),
        }
    }

    /// Window-wide trends from a snapshot, most recent first
    pub fn weekly(&self, snapshot: &[MealRecord]) -> WeeklyTrends {
        let avg_calories = mean(snapshot.iter().map(|m| m.nutrition.get("calories"))) as u32;

        let chronological: Vec<f64> = snapshot.iter().rev().map(|m| m.nutrition.get("protein")).collect();
        let protein_trend = match slope(&chronological) {
            s if s > SLOPE_EPSILON => ProteinTrend::Increasing,
            s if s < -SLOPE_EPSILON => ProteinTrend::Decreasing,
            _ => ProteinTrend::Stable,
        };

        let feelings: Vec<f64> = snapshot
            .iter()
            .filter_map(|m| m.feeling)
            .map(|f| f64::from(f.value()))
            .collect();
        let mood_score = (!feelings.is_empty()).then(|| round1(mean(feelings.iter().copied()).clamp(1.0, 5.0)));

        let digestive_reports = snapshot
            .iter()
            .flat_map(|m| m.symptoms.iter())
            .filter(|s| {
                self.config
                    .digestive_symptoms
                    .iter()
                    .any(|d| d.eq_ignore_ascii_case(s.as_str()))
            })
            .count();
        let digestive_health = if digestive_reports == 0 {
            DigestiveHealth::Excellent
        } else if digestive_reports < self.config.digestive_attention_reports {
            DigestiveHealth::Improving
        } else {
            DigestiveHealth::NeedsAttention
        };

        WeeklyTrends {
            avg_calories,
            protein_trend,
            mood_score,
            digestive_health,
            digestive_reports,
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Least-squares slope of `ys` against their index
fn slope(ys: &[f64]) -> f64 {
    if ys.len() < 2 {
        return 0.0;
    }
    let x_mean = (ys.len() - 1) as f64 / 2.0;
    let y_mean = mean(ys.iter().copied());
    let (num, den) = ys.iter().enumerate().fold((0.0, 0.0), |(num, den), (i, y)| {
        let dx = i as f64 - x_mean;
        (num + dx * (y - y_mean), den + dx * dx)
    });
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}
