//! Onboard manages the lifecycle of user accounts: registration, email
//! activation, login sessions and password recovery.

#![forbid(unsafe_code)]
pub mod auth;
pub mod clock;
pub mod config;
pub mod crypto;
mod database;
pub mod error;
pub mod mail;
mod router;
pub mod telemetry;
pub mod token;
pub mod user;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use auth::{CredentialVerifier, PasswordVerifier, SessionIssuer};
use clock::SystemClock;
use crypto::{Argon2Hasher, CredentialHasher};
use mail::{LogNotifier, Notifier, SmtpNotifier};
use user::{AccountService, Links, PgAccountStore, PgTokenStore};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    session: Option<&str>,
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(session) = session {
        request = request.header(
            header::COOKIE,
            format!("{}={session}", router::login::SESSION_COOKIE),
        );
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub accounts: Arc<AccountService>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub sessions: Arc<dyn SessionIssuer>,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(
                    |chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                        tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                    },
                )
                .make_span_with(
                    DefaultMakeSpan::new()
                        .include_headers(true)
                        .level(tracing::Level::INFO),
                )
                .on_request(DefaultOnRequest::new())
                .on_response(
                    DefaultOnResponse::new()
                        .include_headers(true)
                        .latency_unit(LatencyUnit::Micros),
                ),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(10),
        ))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
        ]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    let protected_router = Router::new()
        // `GET /dashboard` requires a session.
        .route("/dashboard", get(router::login::dashboard))
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            router::login::require_session,
        ));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        .route("/metrics", get(telemetry::metrics))
        // `POST /register` creates a pending account.
        .route("/register", post(router::register::handler))
        .route(
            "/set-password",
            get(router::password::form).post(router::password::handler),
        )
        .route(
            "/login",
            get(router::login::page).post(router::login::handler),
        )
        .route("/logout", post(router::login::logout))
        .route("/forgot-password", post(router::recovery::forgot))
        .route(
            "/reset-password",
            get(router::recovery::form).post(router::recovery::reset),
        )
        .merge(protected_router)
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let config = config::Configuration::default().read()?;
    if let Err(err) = config.validate() {
        tracing::error!(error = %err, "invalid `config.yaml` file");
        return Err(err.into());
    }

    let Some(postgres) = &config.postgres else {
        tracing::error!("missing `postgres` entry on `config.yaml` file");
        return Err("missing `postgres` configuration".into());
    };
    let db = database::Database::new(postgres).await?;

    // execute migrations scripts on start.
    db.migrate().await?;

    let hasher: Arc<dyn CredentialHasher> =
        Arc::new(Argon2Hasher::new(config.argon2.clone())?);

    // handle mail sender.
    let notifier: Arc<dyn Notifier> = match &config.mail {
        Some(cfg) => Arc::new(SmtpNotifier::new(cfg)?),
        None => {
            tracing::warn!(
                "missing `mail` entry on `config.yaml` file, emails will only be logged"
            );
            Arc::new(LogNotifier)
        },
    };

    let accounts = AccountService::new(
        Arc::new(PgAccountStore::new(db.postgres.clone())),
        Arc::new(PgTokenStore::new(db.postgres.clone())),
        Arc::clone(&hasher),
        notifier,
        Arc::new(SystemClock),
        Links::new(&config.base_url()?)?,
    )
    .with_token_ttl(config.token.ttl()?);
    let accounts = Arc::new(accounts);

    // handle sessions.
    let Some(secret) = &config.session.secret else {
        tracing::error!("missing `SESSION_SECRET` environnement variable");
        return Err("missing session secret".into());
    };
    let mut sessions = token::JwtSessions::new(
        &config.url,
        secret,
        config.session.ttl_minutes,
    );
    if let Some(audience) = &config.session.audience {
        sessions.audience(audience);
    }

    let metrics = match telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(error = %err, "prometheus recorder not installed");
            None
        },
    };

    let verifier = PasswordVerifier::new(Arc::clone(&accounts), hasher)?;

    Ok(AppState {
        config,
        verifier: Arc::new(verifier),
        accounts,
        sessions: Arc::new(sessions),
        metrics,
    })
}
