//! Meal image classification
//!
//! The engine never looks at images itself. A [`Classifier`] turns photo
//! bytes into recognized foods plus a nutrient vector; [`HttpClassifier`] is
//! the production implementation that calls a remote recognition service.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ClassifierConfig;
use crate::error::ClassificationError;
use crate::types::{ClassifierResult, FoodCategory};

/// Turns a meal photo into foods and nutrition
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image: &[u8]) -> Result<ClassifierResult, ClassificationError>;
}

#[derive(Serialize)]
struct ClassifyRequest {
    image: String,
}

/// Classifier backed by a remote HTTP endpoint
pub struct HttpClassifier {
    client: Client,
    endpoint: String,
}

impl HttpClassifier {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build classifier client: {}", e))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    /// `None` when no endpoint is configured
    pub fn from_config(config: &ClassifierConfig) -> anyhow::Result<Option<Self>> {
        match config.endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => {
                Ok(Some(Self::new(endpoint, Duration::from_secs(config.timeout_secs))?))
            }
            _ => Ok(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, image: &[u8]) -> Result<ClassifierResult, ClassificationError> {
        debug!("Classifying {} byte image via {}", image.len(), self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&ClassifyRequest { image: BASE64.encode(image) })
            .send()
            .await
            .map_err(|e| ClassificationError::Upstream(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClassificationError::Upstream(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            warn!("Classifier returned {}", status);
            return Err(ClassificationError::Upstream(format!(
                "status {}: {}",
                status,
                crate::truncate_safe(&body, 200)
            )));
        }

        let result = parse_response(&body)?;
        info!("Classifier recognized {} food(s)", result.foods.len());
        Ok(result)
    }
}

/// Accepts either a bare result or one wrapped as `{"success": .., "data": ..}`
fn parse_response(body: &str) -> Result<ClassifierResult, ClassificationError> {
    let raw: Value = serde_json::from_str(body).map_err(|e| {
        ClassificationError::Upstream(format!(
            "invalid JSON ({}): {}",
            e,
            crate::truncate_safe(body, 200)
        ))
    })?;

    if raw.get("success").and_then(Value::as_bool) == Some(false) {
        let message = raw.get("error").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(ClassificationError::Upstream(message.to_string()));
    }

    let payload = match raw.get("data") {
        Some(data) => data.clone(),
        None => raw,
    };
    serde_json::from_value(payload)
        .map_err(|e| ClassificationError::Upstream(format!("unexpected response shape: {}", e)))
}

/// Decode a base64 image, with or without a `data:...;base64,` prefix
pub fn decode_image(data: &str) -> Result<Vec<u8>, ClassificationError> {
    let encoded = match data.split_once(',') {
        Some((_, rest)) => rest,
        None => data,
    };
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|_| ClassificationError::Unrecognized)?;
    if bytes.is_empty() {
        return Err(ClassificationError::Unrecognized);
    }
    Ok(bytes)
}

/// Keyword guess for foods the classifier left uncategorized
pub fn categorize_food(name: &str) -> FoodCategory {
    const TABLE: &[(&[&str], FoodCategory)] = &[
        (&["chicken", "beef", "fish", "egg"], FoodCategory::Protein),
        (&["rice", "pasta", "bread"], FoodCategory::Grains),
        (&["vegetable", "broccoli", "salad"], FoodCategory::Vegetables),
        (&["fruit", "apple", "banana"], FoodCategory::Fruits),
        (&["milk", "cheese", "yogurt"], FoodCategory::Dairy),
    ];

    let lower = name.to_lowercase();
    TABLE
        .iter()
        .find(|(words, _)| words.iter().any(|w| lower.contains(*w)))
        .map(|(_, category)| *category)
        .unwrap_or(FoodCategory::Other)
}
