use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::models::{HeroEdit, HeroRecord, NewHero, PageRequest, RankAudit};
use crate::registry::HeroRegistry;
use crate::state::AppState;

/// GET /api/heroes - One page of heroes, sorted and optionally searched
pub async fn list_heroes(
    State(state): State<AppState>,
    Query(req): Query<PageRequest>,
) -> Result<Json<Vec<HeroRecord>>, (StatusCode, String)> {
    let heroes = run_registry(&state, move |registry| registry.page(req)).await?;
    Ok(Json(heroes))
}

/// POST /api/heroes - Add an unranked hero
pub async fn add_hero(
    State(state): State<AppState>,
    Json(req): Json<NewHero>,
) -> Result<(StatusCode, Json<HeroRecord>), (StatusCode, String)> {
    let hero = run_registry(&state, move |registry| {
        registry.add(&req.name, &req.alias, &req.quirk)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(hero)))
}

/// GET /api/heroes/:reference
pub async fn get_hero(
    State(state): State<AppState>,
    Path(reference): Path<Uuid>,
) -> Result<Json<HeroRecord>, (StatusCode, String)> {
    let hero = run_registry(&state, move |registry| registry.get(reference)).await?;
    Ok(Json(hero))
}

/// PATCH /api/heroes/:reference - Edit fields and/or move the hero in the ranking
pub async fn edit_hero(
    State(state): State<AppState>,
    Path(reference): Path<Uuid>,
    Json(edit): Json<HeroEdit>,
) -> Result<Json<HeroRecord>, (StatusCode, String)> {
    let hero = run_registry(&state, move |registry| registry.edit(reference, edit)).await?;
    Ok(Json(hero))
}

/// DELETE /api/heroes/:reference
pub async fn delete_hero(
    State(state): State<AppState>,
    Path(reference): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    run_registry(&state, move |registry| registry.remove(reference)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/ranking/audit - Report duplicate or missing ranks
pub async fn audit_ranking(
    State(state): State<AppState>,
) -> Result<Json<RankAudit>, (StatusCode, String)> {
    let audit = run_registry(&state, |registry| registry.audit()).await?;
    Ok(Json(audit))
}

/// GET /api/health
pub async fn health() -> &'static str {
    "OK"
}

/// Run a registry call on the blocking pool, bounded by the configured timeout.
async fn run_registry<T, F>(state: &AppState, op: F) -> Result<T, (StatusCode, String)>
where
    F: FnOnce(&HeroRegistry) -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let registry = state.registry.clone();
    let timeout = state.config.write_timeout();

    let result =
        tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || op(&registry))).await;

    match result {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) => Err(error_response(e)),
        Ok(Err(e)) => {
            tracing::error!("Registry task failed: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registry task failed".to_string(),
            ))
        }
        Err(_) => {
            tracing::error!("Registry call timed out after {}s", timeout.as_secs());
            Err((
                StatusCode::GATEWAY_TIMEOUT,
                format!(
                    "Registry call timed out after {}s; the write may still complete, check before retrying",
                    timeout.as_secs()
                ),
            ))
        }
    }
}

fn error_response(err: RegistryError) -> (StatusCode, String) {
    let status = match &err {
        RegistryError::DuplicateAlias { .. } => StatusCode::CONFLICT,
        RegistryError::NotFound { .. } => StatusCode::NOT_FOUND,
        RegistryError::InvalidRank { .. } => StatusCode::BAD_REQUEST,
        RegistryError::PartialShift { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        RegistryError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    if status.is_server_error() {
        tracing::error!("{err}");
    }
    (status, err.to_string())
}
