use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use parley_core::config::ProviderFamily;
use parley_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    providers: Vec<ProviderFamily>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub providers: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, providers: Vec<ProviderFamily>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, providers })
}

/// Readiness follows the database only. Missing model credentials are reported but do not fail
/// the check, since each agent's reply names the missing key on its own.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        providers: providers_check(&state.providers),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

fn providers_check(providers: &[ProviderFamily]) -> HealthCheck {
    if providers.is_empty() {
        return HealthCheck {
            status: "unconfigured",
            detail: "no model provider credentials are set".to_string(),
        };
    }
    let names: Vec<&str> = providers.iter().map(ProviderFamily::as_str).collect();
    HealthCheck { status: "ready", detail: format!("families: {}", names.join(", ")) }
}
