pub mod health;
pub mod rounds;
pub mod vaults;

use crate::db::Repository;
use crate::domain::Address;
use crate::error::AppError;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
}

impl AppState {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/vaults/:address", get(vaults::get_vault))
        .route(
            "/v1/vaults/:address/providers/:provider",
            get(vaults::get_provider),
        )
        .route("/v1/rounds/:address", get(rounds::get_round))
        .route("/v1/rounds/:address/bids", get(rounds::get_bids))
        .route("/v1/rounds/:address/buyers/:buyer", get(rounds::get_buyer))
        .layer(cors)
        .with_state(state)
}

pub(crate) fn parse_address(raw: &str, what: &str) -> Result<Address, AppError> {
    Address::parse(raw).map_err(|_| AppError::BadRequest(format!("Invalid {} address", what)))
}
