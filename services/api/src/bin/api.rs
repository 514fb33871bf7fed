//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        blob_store::MEDIA_ROUTE, image_source::ImageSource, tts::parse_voice,
        CatalogueRewardCards, DbAdapter, FsBlobStore, GeminiVisionAdapter, MemUAdapter,
        OpenAiChatAdapter, OpenAiSstAdapter, OpenAiTtsAdapter, ThreadRandom,
    },
    config::Config,
    error::ApiError,
    web::{
        auth::{login_handler, logout_handler, signup_handler},
        get_profile_handler, get_quota_handler, list_history_handler,
        middleware::require_auth,
        rest::ApiDoc,
        state::AppState,
        update_profile_handler, ws_handler,
    },
};
use async_openai::{config::OpenAIConfig, types::audio::SpeechModel, Client};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// Homework photos arrive as base64 data URIs inside JSON.
const MAX_BODY_BYTES: usize = 15 * 1024 * 1024;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    // Missing AI keys fail here rather than in the middle of a child's lesson.
    let openai_config = OpenAIConfig::new().with_api_key(config.require_openai_key()?);
    let openai_client = Client::with_config(openai_config);
    let http = reqwest::Client::new();

    let sst_adapter = Arc::new(OpenAiSstAdapter::new(
        openai_client.clone(),
        config.stt_model.clone(),
    ));
    let chat_adapter = Arc::new(OpenAiChatAdapter::new(
        openai_client.clone(),
        config.chat_model.clone(),
    ));

    let tts_voice = parse_voice(&config.tts_voice).ok_or_else(|| {
        ApiError::Internal(format!(
            "Invalid TTS voice specified in config: '{}'",
            config.tts_voice
        ))
    })?;
    let tts_adapter = Arc::new(OpenAiTtsAdapter::new(
        openai_client,
        SpeechModel::Tts1Hd,
        tts_voice,
    ));

    // Client images are inline data or URLs on trusted hosts, never server paths.
    let image_source = ImageSource::new(&config.trusted_image_urls, config.max_image_bytes)?;
    let vision_adapter = Arc::new(GeminiVisionAdapter::new(
        http.clone(),
        image_source,
        config.require_gemini_key()?.to_string(),
        config.vision_model.clone(),
    ));

    let memory_adapter = MemUAdapter::new(
        http,
        config.memu_api_key.clone(),
        config.memu_agent_id.clone(),
    );
    if !memory_adapter.is_enabled() {
        info!("MEMU_API_KEY is not set; learning memory is disabled.");
    }

    tokio::fs::create_dir_all(&config.media_root).await?;
    let blob_store = Arc::new(FsBlobStore::new(
        config.media_root.clone(),
        config.public_base_url.clone(),
        config.max_image_bytes,
    ));

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        config: config.clone(),
        accounts: db_adapter.clone(),
        history: db_adapter.clone(),
        quota: db_adapter,
        analysis: vision_adapter.clone(),
        review: vision_adapter,
        transcription: sst_adapter,
        conversation: chat_adapter,
        synthesizer: tts_adapter,
        blobs: blob_store,
        reward_cards: Arc::new(CatalogueRewardCards::new(
            config.reward_card_base_url.clone(),
        )),
        memory: Arc::new(memory_adapter),
        random: Arc::new(ThreadRandom),
    });

    // --- 5. Create the Web Router ---
    let cors_origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS origin '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/history", get(list_history_handler))
        .route("/quota", get(get_quota_handler))
        .route(
            "/profile",
            get(get_profile_handler).put(update_profile_handler),
        )
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest_service(MEDIA_ROUTE, ServeDir::new(&config.media_root))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("Server stopped.");
    Ok(())
}

/// Cancels `token` on Ctrl+C or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
    token.cancel();
}
