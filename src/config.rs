//! Configuration management
//!
//! Every threshold the analyzers use lives here: window size, support and
//! emission cutoffs, severity cutoffs, nutrient targets and the trend
//! heuristics. Stored as TOML in the platform config directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Store and scheduler settings
    #[serde(default)]
    pub engine: EngineConfig,
    /// Intolerance inference settings
    #[serde(default)]
    pub intolerance: IntoleranceConfig,
    /// Nutrient targets and gap classification
    #[serde(default)]
    pub nutrients: NutrientConfig,
    /// Prediction and trend heuristics
    #[serde(default)]
    pub trends: TrendConfig,
    /// Remote classifier
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// HTTP server
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of meals kept in the rolling window
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    /// Meals required before insights are computed
    #[serde(default = "default_min_history")]
    pub min_history_for_insights: usize,
    /// Feelings strictly below this value are adverse
    #[serde(default = "default_adverse_threshold")]
    pub adverse_feeling_threshold: u8,
    /// Delay between logging a meal and asking how the user feels
    #[serde(default = "default_prompt_delay")]
    pub feeling_prompt_delay_secs: u64,
    /// Classifier foods below this confidence reject the whole result
    #[serde(default)]
    pub min_food_confidence: f64,
}

fn default_window_capacity() -> usize {
    10
}

fn default_min_history() -> usize {
    3
}

fn default_adverse_threshold() -> u8 {
    4
}

fn default_prompt_delay() -> u64 {
    2 * 60 * 60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_capacity: default_window_capacity(),
            min_history_for_insights: default_min_history(),
            adverse_feeling_threshold: default_adverse_threshold(),
            feeling_prompt_delay_secs: default_prompt_delay(),
            min_food_confidence: 0.0,
        }
    }
}

impl EngineConfig {
    pub fn feeling_prompt_delay(&self) -> Duration {
        Duration::from_secs(self.feeling_prompt_delay_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntoleranceConfig {
    /// Minimum answered meals containing a food before it is scored
    #[serde(default = "default_min_support")]
    pub min_support: usize,
    /// Hypotheses below this confidence (0-100) are not surfaced
    #[serde(default = "default_emission_threshold")]
    pub emission_threshold: u8,
    /// Maximum hypotheses reported
    #[serde(default = "default_max_hypotheses")]
    pub max_hypotheses: usize,
    /// A symptom is "common" for a food once reported this many times
    #[serde(default = "default_common_symptom_reports")]
    pub common_symptom_min_reports: usize,
}

fn default_min_support() -> usize {
    2
}

fn default_emission_threshold() -> u8 {
    40
}

fn default_max_hypotheses() -> usize {
    5
}

fn default_common_symptom_reports() -> usize {
    2
}

impl Default for IntoleranceConfig {
    fn default() -> Self {
        Self {
            min_support: default_min_support(),
            emission_threshold: default_emission_threshold(),
            max_hypotheses: default_max_hypotheses(),
            common_symptom_min_reports: default_common_symptom_reports(),
        }
    }
}

/// Daily reference amount for a nutrient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutrientTarget {
    pub daily_target: f64,
    pub unit: String,
}

impl NutrientTarget {
    pub fn new(daily_target: f64, unit: &str) -> Self {
        Self {
            daily_target,
            unit: unit.to_string(),
        }
    }
}

/// Minimum deficient-day streak for each severity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityCutoffs {
    #[serde(default = "default_high_days")]
    pub high_days: u32,
    #[serde(default = "default_medium_days")]
    pub medium_days: u32,
    #[serde(default = "default_low_days")]
    pub low_days: u32,
}

fn default_high_days() -> u32 {
    4
}

fn default_medium_days() -> u32 {
    2
}

fn default_low_days() -> u32 {
    1
}

impl Default for SeverityCutoffs {
    fn default() -> Self {
        Self {
            high_days: default_high_days(),
            medium_days: default_medium_days(),
            low_days: default_low_days(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutrientConfig {
    /// Nutrient key -> daily target
    #[serde(default = "default_targets")]
    pub targets: BTreeMap<String, NutrientTarget>,
    /// A day is deficient below `daily_target * deficiency_ratio`
    #[serde(default = "default_deficiency_ratio")]
    pub deficiency_ratio: f64,
    /// Offset from UTC used to assign meals to calendar days
    #[serde(default)]
    pub day_offset_minutes: i32,
    #[serde(default)]
    pub severity: SeverityCutoffs,
}

fn default_targets() -> BTreeMap<String, NutrientTarget> {
    let mut targets = BTreeMap::new();
    targets.insert("protein".to_string(), NutrientTarget::new(50.0, "g"));
    targets.insert("fiber".to_string(), NutrientTarget::new(25.0, "g"));
    targets.insert("vitaminC".to_string(), NutrientTarget::new(90.0, "mg"));
    targets.insert("iron".to_string(), NutrientTarget::new(18.0, "mg"));
    targets.insert("calcium".to_string(), NutrientTarget::new(1000.0, "mg"));
    targets
}

fn default_deficiency_ratio() -> f64 {
    1.0
}

impl Default for NutrientConfig {
    fn default() -> Self {
        Self {
            targets: default_targets(),
            deficiency_ratio: default_deficiency_ratio(),
            day_offset_minutes: 0,
            severity: SeverityCutoffs::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendConfig {
    /// Meals considered "recent" for energy and next-meal predictions
    #[serde(default = "default_recent_meals")]
    pub recent_meals: usize,
    #[serde(default = "default_energy_protein")]
    pub energy_protein_threshold: f64,
    #[serde(default = "default_energy_carbs")]
    pub energy_carbs_threshold: f64,
    #[serde(default = "default_high_energy")]
    pub high_energy_level: u8,
    #[serde(default = "default_low_energy")]
    pub low_energy_level: u8,
    /// Gaps at or above this many hours are overnight and ignored
    #[serde(default = "default_max_meal_gap")]
    pub max_meal_gap_hours: f64,
    #[serde(default = "default_meal_gap")]
    pub default_meal_gap_hours: f64,
    #[serde(default = "default_low_protein")]
    pub low_protein_threshold: f64,
    #[serde(default = "default_low_carbs")]
    pub low_carbs_threshold: f64,
    #[serde(default = "default_high_sugar")]
    pub high_sugar_threshold: f64,
    /// Symptoms counted towards digestive health
    #[serde(default = "default_digestive_symptoms")]
    pub digestive_symptoms: Vec<String>,
    /// Digestive symptom reports at which health "needs attention"
    #[serde(default = "default_digestive_attention")]
    pub digestive_attention_reports: usize,
}

fn default_recent_meals() -> usize {
    5
}

fn default_energy_protein() -> f64 {
    30.0
}

fn default_energy_carbs() -> f64 {
    40.0
}

fn default_high_energy() -> u8 {
    7
}

fn default_low_energy() -> u8 {
    5
}

fn default_max_meal_gap() -> f64 {
    12.0
}

fn default_meal_gap() -> f64 {
    4.0
}

fn default_low_protein() -> f64 {
    25.0
}

fn default_low_carbs() -> f64 {
    30.0
}

fn default_high_sugar() -> f64 {
    15.0
}

fn default_digestive_symptoms() -> Vec<String> {
    ["Bloating", "Gas", "Nausea", "Stomach Pain"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_digestive_attention() -> usize {
    3
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            recent_meals: default_recent_meals(),
            energy_protein_threshold: default_energy_protein(),
            energy_carbs_threshold: default_energy_carbs(),
            high_energy_level: default_high_energy(),
            low_energy_level: default_low_energy(),
            max_meal_gap_hours: default_max_meal_gap(),
            default_meal_gap_hours: default_meal_gap(),
            low_protein_threshold: default_low_protein(),
            low_carbs_threshold: default_low_carbs(),
            high_sugar_threshold: default_high_sugar(),
            digestive_symptoms: default_digestive_symptoms(),
            digestive_attention_reports: default_digestive_attention(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Endpoint accepting `{"image": <base64>}` and returning foods + nutrition
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Request timeout
    #[serde(default = "default_classifier_timeout")]
    pub timeout_secs: u64,
}

fn default_classifier_timeout() -> u64 {
    30
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_classifier_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Save engine state to the data directory after every mutation
    #[serde(default = "default_true")]
    pub persist_state: bool,
    /// Maximum request body (images are posted as base64)
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_body_limit() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            persist_state: true,
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Config::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = path.parent().context("Config path has no parent")?;
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "nutrisnap", "nutrisnap")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "nutrisnap", "nutrisnap")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Show current configuration
pub fn show_config() -> Result<()> {
    let config = Config::load()?;

    println!("Engine:");
    println!("  window capacity:        {}", config.engine.window_capacity);
    println!("  min history:            {}", config.engine.min_history_for_insights);
    println!("  adverse below feeling:  {}", config.engine.adverse_feeling_threshold);
    println!("  feeling prompt delay:   {}s", config.engine.feeling_prompt_delay_secs);
    println!("Intolerance:");
    println!("  min support:            {}", config.intolerance.min_support);
    println!("  emission threshold:     {}%", config.intolerance.emission_threshold);
    println!("  max hypotheses:         {}", config.intolerance.max_hypotheses);
    println!("Nutrient targets:");
    for (nutrient, target) in &config.nutrients.targets {
        println!("  {:<22}  {} {}", nutrient, target.daily_target, target.unit);
    }
    let cutoffs = &config.nutrients.severity;
    println!(
        "  severity (days):        high >= {}, medium >= {}, low >= {}",
        cutoffs.high_days, cutoffs.medium_days, cutoffs.low_days
    );
    println!("Classifier:");
    println!(
        "  endpoint:               {}",
        config.classifier.endpoint.as_deref().unwrap_or("not configured")
    );
    println!("Server:");
    println!("  bind:                   {}:{}", config.server.host, config.server.port);

    Ok(())
}

/// Reset configuration to defaults
pub fn reset_config() -> Result<()> {
    let config = Config::default();
    config.save()?;
    println!("Configuration reset to defaults.");
    Ok(())
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}
