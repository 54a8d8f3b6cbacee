//! CLI interface for nutrisnap

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::classifier::HttpClassifier;
use crate::config::{self, Config};
use crate::engine::NutriEngine;
use crate::insights::InsightsState;
use crate::persistence::{open_engine, StateFile};
use crate::types::{ClassifierResult, FoodCategory, FoodItem, MealId, MealRecord, Nutrition};

#[derive(Parser)]
#[command(name = "nutrisnap")]
#[command(about = "Meal logging with delayed feeling feedback and dietary insights", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log meals
    Meal {
        #[command(subcommand)]
        command: MealCommands,
    },
    /// Report how you felt after a meal
    Feel {
        /// Meal id
        id: MealId,
        /// Feeling from 1 (awful) to 5 (great)
        feeling: u8,
        /// Symptom experienced (repeatable)
        #[arg(short, long = "symptom")]
        symptoms: Vec<String>,
    },
    /// Decline the feeling prompt for a meal
    Skip {
        /// Meal id
        id: MealId,
    },
    /// Show recent meals
    History {
        /// Maximum meals to show
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show intolerance, nutrient and trend insights
    Insights {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// List meals waiting for a feeling report
    Prompts,
    /// Start the REST server
    Serve {
        /// Host to bind to (default from config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (default from config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Run a scripted in-memory scenario
    Demo,
}

#[derive(Subcommand)]
enum MealCommands {
    /// Log a meal from a classifier result JSON file
    Add {
        /// Path to `{"foods": [...], "nutrition": {...}}`
        file: PathBuf,
        /// Meal time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Classify a photo with the configured classifier and log it
    Analyze {
        /// Path to the image
        image: PathBuf,
        /// Meal time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Restore the default configuration file
    Reset,
    /// Print the configuration file path
    Path,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Meal { command } => {
            let config = Config::load()?;
            match command {
                MealCommands::Add { file, at } => {
                    let json = tokio::fs::read_to_string(&file)
                        .await
                        .with_context(|| format!("Failed to read {:?}", file))?;
                    let result: ClassifierResult =
                        serde_json::from_str(&json).with_context(|| format!("Invalid classifier result in {:?}", file))?;
                    with_engine(config, |engine| async move {
                        let id = engine.submit_meal(result, at.unwrap_or_else(Utc::now)).await?;
                        println!("✓ Logged meal {}", id);
                        Ok(())
                    })
                    .await?;
                }
                MealCommands::Analyze { image, at } => {
                    let Some(classifier) = HttpClassifier::from_config(&config.classifier)? else {
                        bail!("No classifier configured. Set classifier.endpoint in {:?}", config::config_path()?);
                    };
                    let bytes = tokio::fs::read(&image)
                        .await
                        .with_context(|| format!("Failed to read {:?}", image))?;
                    with_engine(config, |engine| async move {
                        let id = engine
                            .analyze_meal(&classifier, &bytes, at.unwrap_or_else(Utc::now))
                            .await?;
                        if let Some(record) = engine.get_history(1).await.first() {
                            println!("✓ Logged meal {}: {}", id, record.food_summary());
                        }
                        Ok(())
                    })
                    .await?;
                }
            }
        }
        Commands::Feel { id, feeling, symptoms } => {
            with_engine(Config::load()?, |engine| async move {
                engine.submit_feeling(id, feeling, symptoms).await?;
                println!("✓ Recorded feeling {} for meal {}", feeling, id);
                Ok(())
            })
            .await?;
        }
        Commands::Skip { id } => {
            with_engine(Config::load()?, |engine| async move {
                engine.skip_feeling(id).await?;
                println!("✓ Skipped feeling prompt for meal {}", id);
                Ok(())
            })
            .await?;
        }
        Commands::History { limit } => {
            let config = Config::load()?;
            let limit = limit.unwrap_or(config.engine.window_capacity);
            let engine = open_engine(config, &StateFile::default_location()?).await?;
            let history = engine.get_history(limit).await;
            if history.is_empty() {
                println!("No meals logged yet.");
            }
            for record in &history {
                print_record(record);
            }
        }
        Commands::Insights { json } => {
            let engine = open_engine(Config::load()?, &StateFile::default_location()?).await?;
            let insights = engine.get_insights();
            if json {
                println!("{}", serde_json::to_string_pretty(insights.as_ref())?);
            } else {
                print_insights(&insights);
            }
        }
        Commands::Prompts => {
            let engine = open_engine(Config::load()?, &StateFile::default_location()?).await?;
            let prompts = engine.pending_prompts();
            if prompts.is_empty() {
                println!("No feeling prompts pending.");
            }
            for prompt in prompts {
                println!(
                    "  Meal {}: how do you feel? (due {})",
                    prompt.meal_id,
                    prompt.due_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Commands::Serve { host, port } => {
            crate::server::start(Config::load()?, host, port).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => config::show_config()?,
            ConfigCommands::Reset => config::reset_config()?,
            ConfigCommands::Path => println!("{}", config::config_path()?.display()),
        },
        Commands::Demo => run_demo().await?,
    }

    Ok(())
}

/// Load the saved engine, run `f`, then save it back
async fn with_engine<F, Fut>(config: Config, f: F) -> Result<()>
where
    F: FnOnce(std::sync::Arc<NutriEngine>) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let file = StateFile::default_location()?;
    let engine = std::sync::Arc::new(open_engine(config, &file).await?);
    f(engine.clone()).await?;
    file.save(&engine.export_state().await).await
}

fn print_record(record: &MealRecord) {
    let feeling = match record.feeling {
        Some(f) if record.symptoms.is_empty() => format!("feeling {}", f.value()),
        Some(f) => format!(
            "feeling {} ({})",
            f.value(),
            record.symptoms.iter().cloned().collect::<Vec<_>>().join(", ")
        ),
        None => "no feeling yet".to_string(),
    };
    println!(
        "  #{} {}  {}  [{}]",
        record.id,
        record.timestamp.format("%Y-%m-%d %H:%M"),
        record.food_summary(),
        feeling
    );
}

fn print_insights(state: &InsightsState) {
    let snapshot = match state {
        InsightsState::InsufficientData { records, required } => {
            println!("Not enough data yet: {} of {} meals logged.", records, required);
            return;
        }
        InsightsState::Ready(snapshot) => snapshot,
    };

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("  Insights ({} meals, {} with feedback)", snapshot.record_count, snapshot.answered_count);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!();
    println!("Possible intolerances:");
    if snapshot.intolerances.is_empty() {
        println!("  none detected");
    }
    for h in &snapshot.intolerances {
        println!("  {} ({}) - {}% confidence", h.food, h.category, h.confidence);
        println!("    {}", h.pattern);
        if !h.common_symptoms.is_empty() {
            println!("    Common symptoms: {}", h.common_symptoms.join(", "));
        }
        println!("    → {}", h.recommendation);
    }

    println!();
    println!("Nutritional gaps:");
    if snapshot.nutritional_gaps.is_empty() {
        println!("  none");
    }
    for gap in &snapshot.nutritional_gaps {
        println!(
            "  {} [{}] - below {}{} for {} day(s)",
            gap.display_name, gap.severity, gap.daily_target, gap.unit, gap.days_deficient
        );
        println!("    → {} ({})", gap.recommendation, gap.target_foods.join(", "));
    }

    let p = &snapshot.predictions;
    println!();
    println!("Predictions:");
    println!("  Energy level: {}/10", p.energy_level);
    println!("  Next meal in: {}", p.next_meal_timing);
    println!("  Next meal: {}", p.optimal_next_meal);
    println!("  Sleep: {}", p.sleep_quality);

    let w = &snapshot.weekly_trends;
    println!();
    println!("Trends:");
    println!("  Average calories: {}", w.avg_calories);
    println!("  Protein: {:?}", w.protein_trend);
    match w.mood_score {
        Some(mood) => println!("  Mood: {:.1}/5", mood),
        None => println!("  Mood: no feedback yet"),
    }
    println!("  Digestive health: {}", w.digestive_health);
}

/// Scripted week of meals against an in-memory engine
async fn run_demo() -> Result<()> {
    let mut config = Config::default();
    config.engine.feeling_prompt_delay_secs = 1;
    let engine = NutriEngine::new(config);
    let mut prompts = engine.subscribe_feeling_requests();

    let start = Utc
        .with_ymd_and_hms(2024, 1, 1, 8, 0, 0)
        .single()
        .context("Invalid demo start time")?;
    let meals: [(&str, FoodCategory, f64, u8, &[&str]); 6] = [
        ("Greek Yogurt", FoodCategory::Dairy, 12.0, 2, &["Bloating"]),
        ("Chicken Salad", FoodCategory::Protein, 35.0, 5, &[]),
        ("Cheese Pizza", FoodCategory::Dairy, 18.0, 2, &["Bloating", "Gas"]),
        ("Brown Rice Bowl", FoodCategory::Grains, 10.0, 4, &[]),
        ("Milkshake", FoodCategory::Dairy, 9.0, 1, &["Nausea"]),
        ("Oatmeal", FoodCategory::Grains, 8.0, 5, &[]),
    ];

    println!("Logging {} meals...", meals.len());
    for (i, (name, category, protein, feeling, symptoms)) in meals.iter().enumerate() {
        let mut foods = vec![FoodItem::new(name, *category, 90.0)];
        if *category == FoodCategory::Dairy {
            foods.push(FoodItem::new("Dairy", FoodCategory::Dairy, 80.0));
        }
        let result = ClassifierResult {
            foods,
            nutrition: Nutrition::new()
                .with("calories", 450.0)
                .with("protein", *protein)
                .with("carbs", 45.0)
                .with("fiber", 4.0)
                .with("sugar", 12.0),
        };
        let at = start + Duration::hours(i as i64 * 10);
        let id = engine.submit_meal(result, at).await?;
        engine
            .submit_feeling(id, *feeling, symptoms.iter().map(|s| s.to_string()).collect())
            .await?;
        println!("  #{} {} → feeling {}", id, name, feeling);
    }

    let pending = engine
        .submit_meal(
            ClassifierResult {
                foods: vec![FoodItem::new("Apple", FoodCategory::Fruits, 95.0)],
                nutrition: Nutrition::new().with("calories", 95.0).with("fiber", 4.4),
            },
            start + Duration::hours(60),
        )
        .await?;
    println!("  #{} Apple → waiting for feedback", pending);
    println!();

    match tokio::time::timeout(std::time::Duration::from_secs(3), prompts.recv()).await {
        Ok(Ok(request)) => println!("🔔 Feeling prompt fired for meal {}", request.meal_id),
        _ => println!("No feeling prompt received"),
    }
    println!();

    print_insights(&engine.get_insights());
    Ok(())
}
