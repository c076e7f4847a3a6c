use anyhow::Result;
use axum::{
    extract::{ConnectInfo, FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{AdminSeed, Config};
use crate::error::AccessError;
use crate::resources::places::{PlaceDraft, PlaceStore};
use crate::security::audit::AuditLogger;
use crate::security::bridge::SessionTokenBridge;
use crate::security::directory::UserDirectory;
use crate::security::gate::{GateRequest, RequestGate};
use crate::security::identity::{IdentityResolver, Role};
use crate::security::rate_limit::{spawn_window_sweeper, RateLimiter};
use crate::security::session::SessionStore;
use crate::security::token::TokenCodec;

type SharedState = Arc<AppState>;

/// Client identifier for rate limiting: the first hop of the forwarded
/// chain when present, the socket address otherwise, and the loopback
/// sentinel when neither is available (tests, unix sockets).
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(forwarded) = parts.headers.get("x-forwarded-for") {
            if let Ok(s) = forwarded.to_str() {
                // Take the first IP if multiple
                let ip = s.split(',').next().unwrap_or(s).trim();
                if !ip.is_empty() {
                    return Ok(ClientIp(ip.to_string()));
                }
            }
        }
        if let Some(real_ip) = parts.headers.get("x-real-ip") {
            if let Ok(s) = real_ip.to_str() {
                let ip = s.trim();
                if !ip.is_empty() {
                    return Ok(ClientIp(ip.to_string()));
                }
            }
        }
        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            return Ok(ClientIp(addr.ip().to_string()));
        }
        Ok(ClientIp("127.0.0.1".to_string()))
    }
}

/// Raw credential carriers peeled off the request: the Authorization
/// header value and the transport-level session reference (`sid` cookie
/// or `X-Session-Id` header). Which one counts is the resolver's call.
#[derive(Debug, Clone, Default)]
pub struct CredentialCarriers {
    pub authorization: Option<String>,
    pub session_ref: Option<String>,
}

impl<S> FromRequestParts<S> for CredentialCarriers
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let authorization = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        Ok(Self {
            authorization,
            session_ref: session_ref_from_headers(&parts.headers),
        })
    }
}

fn session_ref_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(sid) = headers.get("x-session-id").and_then(|v| v.to_str().ok()) {
        let sid = sid.trim();
        if !sid.is_empty() {
            return Some(sid.to_string());
        }
    }
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "sid").then(|| value.to_string())
    })
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub directory: UserDirectory,
    pub sessions: SessionStore,
    pub codec: TokenCodec,
    pub gate: RequestGate,
    pub bridge: SessionTokenBridge,
    pub limiter: RateLimiter,
    pub places: PlaceStore,
    pub audit: AuditLogger,
}

impl AppState {
    pub fn new(config: Arc<Config>, signing_key: Vec<u8>) -> Self {
        let audit = AuditLogger::new();
        let codec = TokenCodec::new(signing_key, config.token_ttl_secs);
        let sessions = SessionStore::new();
        let limiter = RateLimiter::new(config.rate_policies.clone());
        let gate = RequestGate::new(
            IdentityResolver::new(codec.clone(), sessions.clone()),
            limiter.clone(),
            audit,
        );
        let bridge = SessionTokenBridge::new(codec.clone(), audit);

        Self {
            config,
            directory: UserDirectory::new(),
            sessions,
            codec,
            gate,
            bridge,
            limiter,
            places: PlaceStore::new(),
            audit,
        }
    }

    pub async fn seed_admin(&self, seed: &AdminSeed) -> Result<()> {
        self.directory
            .register(&seed.username, &seed.password, Role::Admin)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct CredentialsForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: u64,
    pub username: String,
}

// Health check
async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn register(
    State(state): State<SharedState>,
    ClientIp(client_ip): ClientIp,
    carriers: CredentialCarriers,
    Json(form): Json<CredentialsForm>,
) -> Result<impl IntoResponse, AccessError> {
    state
        .gate
        .admit(GateRequest {
            authorization: carriers.authorization.as_deref(),
            session_ref: carriers.session_ref.as_deref(),
            client_ip: &client_ip,
            policy: "auth",
            requires_auth: false,
        })
        .await?;

    let principal = state
        .directory
        .register(form.username.trim(), &form.password, Role::User)
        .await?;
    state.audit.user_registered(principal.id);
    debug!(user = %principal.display_name, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: principal.id,
            username: principal.display_name,
        }),
    ))
}

// Token issuance: valid login credentials buy a compact signed token.
async fn login(
    State(state): State<SharedState>,
    ClientIp(client_ip): ClientIp,
    carriers: CredentialCarriers,
    Json(form): Json<CredentialsForm>,
) -> Result<impl IntoResponse, AccessError> {
    // Rate-limited before credentials are checked; every attempt in the
    // window counts, successful or not.
    state
        .gate
        .admit(GateRequest {
            authorization: carriers.authorization.as_deref(),
            session_ref: carriers.session_ref.as_deref(),
            client_ip: &client_ip,
            policy: "auth",
            requires_auth: false,
        })
        .await?;

    let Some(principal) = state
        .directory
        .verify_credentials(&form.username, &form.password)
        .await
    else {
        state.audit.auth_failure(&client_ip, "bad_credentials");
        return Err(AccessError::InvalidCredentials);
    };

    state.audit.auth_success(principal.id, "password");
    let token = state.codec.issue(&principal)?;
    state.audit.token_issued(principal.id);
    Ok(Json(TokenResponse { token }))
}

// Browser flow: valid login credentials open a server-side session.
async fn session_login(
    State(state): State<SharedState>,
    ClientIp(client_ip): ClientIp,
    carriers: CredentialCarriers,
    Json(form): Json<CredentialsForm>,
) -> Result<impl IntoResponse, AccessError> {
    state
        .gate
        .admit(GateRequest {
            authorization: carriers.authorization.as_deref(),
            session_ref: carriers.session_ref.as_deref(),
            client_ip: &client_ip,
            policy: "auth",
            requires_auth: false,
        })
        .await?;

    let Some(principal) = state
        .directory
        .verify_credentials(&form.username, &form.password)
        .await
    else {
        state.audit.auth_failure(&client_ip, "bad_credentials");
        return Err(AccessError::InvalidCredentials);
    };

    state.audit.auth_success(principal.id, "password");
    state.audit.session_opened(principal.id);
    let sid = state.sessions.create(principal).await;

    let mut headers = HeaderMap::new();
    let cookie = format!("sid={sid}; HttpOnly; SameSite=Lax; Path=/");
    headers.insert(
        header::SET_COOKIE,
        cookie.parse().map_err(|_| AccessError::Internal)?,
    );
    Ok((headers, Json(json!({"session_id": sid}))))
}

async fn logout(
    State(state): State<SharedState>,
    ClientIp(client_ip): ClientIp,
    carriers: CredentialCarriers,
) -> Result<impl IntoResponse, AccessError> {
    let principal = state
        .gate
        .admit_authenticated(GateRequest {
            authorization: carriers.authorization.as_deref(),
            session_ref: carriers.session_ref.as_deref(),
            client_ip: &client_ip,
            policy: "api",
            requires_auth: true,
        })
        .await?;

    if let Some(sid) = carriers.session_ref.as_deref() {
        state.sessions.delete(sid).await;
    }
    state.audit.session_closed(principal.id);
    Ok(Json(json!({"status": "logged out"})))
}

// Session-to-token bridge: a session-authenticated caller with no token
// yet mints one here instead of re-entering credentials.
async fn bridge_token(
    State(state): State<SharedState>,
    ClientIp(client_ip): ClientIp,
    carriers: CredentialCarriers,
) -> Result<impl IntoResponse, AccessError> {
    let admitted = state
        .gate
        .admit(GateRequest {
            authorization: carriers.authorization.as_deref(),
            session_ref: carriers.session_ref.as_deref(),
            client_ip: &client_ip,
            policy: "api",
            requires_auth: true,
        })
        .await?;

    let token = state.bridge.bridge(admitted.as_ref())?;
    Ok(Json(TokenResponse { token }))
}

async fn create_place(
    State(state): State<SharedState>,
    ClientIp(client_ip): ClientIp,
    carriers: CredentialCarriers,
    Json(draft): Json<PlaceDraft>,
) -> Result<impl IntoResponse, AccessError> {
    let principal = state
        .gate
        .admit_authenticated(GateRequest {
            authorization: carriers.authorization.as_deref(),
            session_ref: carriers.session_ref.as_deref(),
            client_ip: &client_ip,
            policy: "create",
            requires_auth: true,
        })
        .await?;

    let place = state.places.create(principal.id, draft).await;
    debug!(place_id = place.id, owner_id = place.owner_id, "place created");
    Ok((StatusCode::CREATED, Json(place)))
}

async fn list_places(
    State(state): State<SharedState>,
    ClientIp(client_ip): ClientIp,
    carriers: CredentialCarriers,
) -> Result<impl IntoResponse, AccessError> {
    let principal = state
        .gate
        .admit_authenticated(GateRequest {
            authorization: carriers.authorization.as_deref(),
            session_ref: carriers.session_ref.as_deref(),
            client_ip: &client_ip,
            policy: "api",
            requires_auth: true,
        })
        .await?;

    let places = state.places.list_for(&principal).await;
    Ok(Json(places))
}

async fn get_place(
    State(state): State<SharedState>,
    ClientIp(client_ip): ClientIp,
    carriers: CredentialCarriers,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AccessError> {
    let principal = state
        .gate
        .admit_authenticated(GateRequest {
            authorization: carriers.authorization.as_deref(),
            session_ref: carriers.session_ref.as_deref(),
            client_ip: &client_ip,
            policy: "api",
            requires_auth: true,
        })
        .await?;

    let place = state.places.get(id).await.ok_or(AccessError::NotFound)?;
    state.gate.require_owner(&principal, place.owner_id)?;
    Ok(Json(place))
}

async fn update_place(
    State(state): State<SharedState>,
    ClientIp(client_ip): ClientIp,
    carriers: CredentialCarriers,
    Path(id): Path<u64>,
    Json(draft): Json<PlaceDraft>,
) -> Result<impl IntoResponse, AccessError> {
    let principal = state
        .gate
        .admit_authenticated(GateRequest {
            authorization: carriers.authorization.as_deref(),
            session_ref: carriers.session_ref.as_deref(),
            client_ip: &client_ip,
            policy: "api",
            requires_auth: true,
        })
        .await?;

    let place = state.places.get(id).await.ok_or(AccessError::NotFound)?;
    state.gate.require_owner(&principal, place.owner_id)?;

    let updated = state
        .places
        .update(id, draft)
        .await
        .ok_or(AccessError::NotFound)?;
    Ok(Json(updated))
}

async fn delete_place(
    State(state): State<SharedState>,
    ClientIp(client_ip): ClientIp,
    carriers: CredentialCarriers,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AccessError> {
    let principal = state
        .gate
        .admit_authenticated(GateRequest {
            authorization: carriers.authorization.as_deref(),
            session_ref: carriers.session_ref.as_deref(),
            client_ip: &client_ip,
            policy: "api",
            requires_auth: true,
        })
        .await?;

    let place = state.places.get(id).await.ok_or(AccessError::NotFound)?;
    state.gate.require_owner(&principal, place.owner_id)?;

    state.places.delete(id).await;
    debug!(place_id = id, "place deleted");
    Ok(Json(json!({"status": "deleted", "id": id})))
}

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/session", post(session_login))
        .route("/auth/logout", post(logout))
        .route("/auth/token", post(bridge_token))
        .route("/api/v1/places", get(list_places).post(create_place))
        .route(
            "/api/v1/places/{id}",
            get(get_place).put(update_place).delete(delete_place),
        )
        .with_state(state)
}

pub async fn serve(config: Config, signing_key: Vec<u8>, port: u16) -> Result<()> {
    let cfg = Arc::new(config);
    let state = Arc::new(AppState::new(cfg.clone(), signing_key));
    state.seed_admin(&AdminSeed::from_env()).await?;

    spawn_window_sweeper(
        state.limiter.clone(),
        Duration::from_secs(cfg.sweep_interval_secs),
    );
    info!(
        interval_secs = cfg.sweep_interval_secs,
        "rate-limit window sweeper started"
    );

    let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).into_future().await?;
    Ok(())
}
