//! HTTP handlers
//!
//! Every response uses the `{"success": bool, "data" | "error"}` envelope.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::classifier::decode_image;
use crate::error::{ClassificationError, EngineError};
use crate::server::ServerState;
use crate::types::{ClassifierResult, FoodItem, MealId, Nutrition};

/// Error rendered as an HTTP response
#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    /// Body, path or query the extractors could not accept
    Rejected { status: StatusCode, message: String },
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<ClassificationError> for ApiError {
    fn from(e: ClassificationError) -> Self {
        ApiError::Engine(EngineError::Classification(e))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(e) => match e {
                EngineError::InvalidFeelingValue(_) => StatusCode::UNPROCESSABLE_ENTITY,
                EngineError::UnknownMealId(_) => StatusCode::NOT_FOUND,
                EngineError::AlreadyAnswered(_) => StatusCode::CONFLICT,
                EngineError::Classification(ClassificationError::NotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::Classification(ClassificationError::Upstream(_)) => StatusCode::BAD_GATEWAY,
                EngineError::Classification(_) => StatusCode::UNPROCESSABLE_ENTITY,
                EngineError::InvalidState { .. } | EngineError::Persistence(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Rejected { status, .. } => *status,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Engine(e) => e.to_string(),
            ApiError::Rejected { message, .. } => message.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            warn!("Request failed: {}", message);
        }
        (
            status,
            Json(json!({
                "success": false,
                "error": message,
            })),
        )
            .into_response()
    }
}

/// JSON body whose rejections use the error envelope
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Path parameters whose rejections use the error envelope
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// Query string whose rejections use the error envelope
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

fn success<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(json!({ "success": true, "data": data }))).into_response()
}

/// Classified meal submitted by a client
#[derive(Debug, Deserialize)]
pub struct MealRequest {
    pub foods: Vec<FoodItem>,
    #[serde(default)]
    pub nutrition: Nutrition,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Photo to classify, base64 with optional data-URL prefix
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub image: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct FeelingRequestBody {
    /// Checked against 1..=5 by the handler
    pub feeling: i64,
    #[serde(default)]
    pub symptoms: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MealCreated {
    pub meal_id: MealId,
}

/// POST /api/meals
pub async fn submit_meal_handler(
    State(state): State<ServerState>,
    ApiJson(req): ApiJson<MealRequest>,
) -> Result<Response, ApiError> {
    let result = ClassifierResult {
        foods: req.foods,
        nutrition: req.nutrition,
    };
    let meal_id = state
        .engine
        .submit_meal(result, req.timestamp.unwrap_or_else(Utc::now))
        .await?;
    state.persist().await;
    Ok(success(StatusCode::CREATED, MealCreated { meal_id }))
}

/// POST /api/meals/analyze
pub async fn analyze_meal_handler(
    State(state): State<ServerState>,
    ApiJson(req): ApiJson<AnalyzeRequest>,
) -> Result<Response, ApiError> {
    let classifier = state.classifier.clone().ok_or(ClassificationError::NotConfigured)?;
    let image = decode_image(&req.image)?;
    let meal_id = state
        .engine
        .analyze_meal(classifier.as_ref(), &image, req.timestamp.unwrap_or_else(Utc::now))
        .await?;
    state.persist().await;

    let record = state
        .engine
        .get_history(state.engine.config().engine.window_capacity)
        .await
        .into_iter()
        .find(|r| r.id == meal_id);
    Ok(success(
        StatusCode::CREATED,
        json!({ "mealId": meal_id, "meal": record }),
    ))
}

/// POST /api/meals/{id}/feeling
pub async fn submit_feeling_handler(
    State(state): State<ServerState>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(req): ApiJson<FeelingRequestBody>,
) -> Result<Response, ApiError> {
    let feeling = u8::try_from(req.feeling).map_err(|_| EngineError::InvalidFeelingValue(req.feeling))?;
    state
        .engine
        .submit_feeling(MealId(id), feeling, req.symptoms)
        .await?;
    state.persist().await;
    Ok(success(StatusCode::OK, json!({ "mealId": id, "state": "answered" })))
}

/// POST /api/meals/{id}/skip
pub async fn skip_feeling_handler(
    State(state): State<ServerState>,
    ApiPath(id): ApiPath<u64>,
) -> Result<Response, ApiError> {
    state.engine.skip_feeling(MealId(id)).await?;
    state.persist().await;
    Ok(success(StatusCode::OK, json!({ "mealId": id, "state": "skipped" })))
}

/// GET /api/insights
pub async fn insights_handler(State(state): State<ServerState>) -> Response {
    let insights = state.engine.get_insights();
    success(StatusCode::OK, insights.as_ref())
}

/// GET /api/history
pub async fn history_handler(
    State(state): State<ServerState>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Result<Response, ApiError> {
    let limit = query
        .limit
        .unwrap_or(state.engine.config().engine.window_capacity);
    Ok(success(StatusCode::OK, state.engine.get_history(limit).await))
}

/// GET /api/prompts
pub async fn prompts_handler(State(state): State<ServerState>) -> Response {
    success(StatusCode::OK, state.engine.pending_prompts())
}

/// GET /api/status
pub async fn status_handler(State(state): State<ServerState>) -> Response {
    success(
        StatusCode::OK,
        json!({
            "status": "ok",
            "version": crate::VERSION,
            "classifier": state.classifier.is_some(),
            "engine": state.engine.status().await,
        }),
    )
}
