use crate::api::AppState;
use crate::error::AppError;
use axum::extract::State;
use axum::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Ready once the store answers; reports how far indexing has got.
pub async fn ready(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state
        .repo
        .ping()
        .await
        .map_err(|e| AppError::Unavailable(format!("Store unreachable: {}", e)))?;
    let tip = state.repo.latest_indexed_block().await?;
    Ok(Json(serde_json::json!({
        "status": "ready",
        "indexedBlock": tip.map(|b| b.number.as_u64()),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_returns_ok() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }
}
