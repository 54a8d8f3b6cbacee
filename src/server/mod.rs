//! REST server over the insight engine

pub mod http;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::classifier::{Classifier, HttpClassifier};
use crate::config::Config;
use crate::engine::NutriEngine;
use crate::persistence::{open_engine, StateFile};

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<NutriEngine>,
    pub classifier: Option<Arc<dyn Classifier>>,
    /// Saved after every mutation when set
    pub state_file: Option<Arc<StateFile>>,
    /// Held across export and save so saves land in mutation order
    save_lock: Arc<Mutex<()>>,
}

impl ServerState {
    pub fn new(engine: Arc<NutriEngine>) -> Self {
        Self {
            engine,
            classifier: None,
            state_file: None,
            save_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_state_file(mut self, file: StateFile) -> Self {
        self.state_file = Some(Arc::new(file));
        self
    }

    /// Write the engine state; failures are logged, not returned
    pub async fn persist(&self) {
        if let Some(file) = &self.state_file {
            let _guard = self.save_lock.lock().await;
            let state = self.engine.export_state().await;
            if let Err(e) = file.save(&state).await {
                warn!("Failed to save state: {:#}", e);
            }
        }
    }
}

/// All API routes with CORS and tracing layers
pub fn router(state: ServerState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/meals", post(http::submit_meal_handler))
        .route("/api/meals/analyze", post(http::analyze_meal_handler))
        .route("/api/meals/{id}/feeling", post(http::submit_feeling_handler))
        .route("/api/meals/{id}/skip", post(http::skip_feeling_handler))
        .route("/api/insights", get(http::insights_handler))
        .route("/api/history", get(http::history_handler))
        .route("/api/prompts", get(http::prompts_handler))
        .route("/api/status", get(http::status_handler))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the web server
pub async fn start(config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

    let state_file = if config.server.persist_state {
        Some(StateFile::default_location()?)
    } else {
        None
    };
    let engine = match &state_file {
        Some(file) => open_engine(config.clone(), file).await?,
        None => NutriEngine::new(config.clone()),
    };
    let mut state = ServerState::new(Arc::new(engine));
    if let Some(file) = state_file {
        state = state.with_state_file(file);
    }
    let classifier = HttpClassifier::from_config(&config.classifier)?;
    let classifier_endpoint = classifier.as_ref().map(|c| c.endpoint().to_string());
    if let Some(classifier) = classifier {
        state = state.with_classifier(Arc::new(classifier));
    }

    tokio::spawn(watch_feeling_prompts(state.clone()));

    let app = router(state.clone(), config.server.body_limit_bytes);

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("     NutriSnap Server Starting");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    match &classifier_endpoint {
        Some(endpoint) => println!("✓ Classifier: {}", endpoint),
        None => println!("⚠ No classifier configured; /api/meals/analyze disabled"),
    }
    match &state.state_file {
        Some(file) => println!("✓ State file: {}", file.path().display()),
        None => println!("⚠ State persistence disabled"),
    }
    println!();
    println!("🚀 Listening on http://{}", addr);
    println!();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.persist().await;
    info!("Server stopped");
    Ok(())
}

/// Log prompts as their timers fire and save the `prompted` mark so a
/// restart does not fire them again
pub async fn watch_feeling_prompts(state: ServerState) {
    let mut requests = state.engine.subscribe_feeling_requests();
    loop {
        match requests.recv().await {
            Ok(request) => {
                info!("Feeling prompt due for meal {}", request.meal_id);
                state.persist().await;
            }
            Err(RecvError::Lagged(n)) => {
                warn!("Missed {} feeling prompt(s)", n);
                state.persist().await;
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
