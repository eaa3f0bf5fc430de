use crate::api::{parse_address, AppState};
use crate::domain::{LiquidityProvider, QueuedWithdrawal, Vault};
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultResponse {
    pub address: String,
    pub current_round_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_round_address: Option<String>,
    pub unlocked_balance: String,
    pub locked_balance: String,
    pub stashed_balance: String,
    pub latest_block: u64,
}

impl From<Vault> for VaultResponse {
    fn from(v: Vault) -> Self {
        Self {
            address: v.address.to_string(),
            current_round_id: v.current_round_id,
            current_round_address: v.current_round_address.map(|a| a.to_string()),
            unlocked_balance: v.unlocked_balance.to_string(),
            locked_balance: v.locked_balance.to_string(),
            stashed_balance: v.stashed_balance.to_string(),
            latest_block: v.latest_block.as_u64(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    pub vault_address: String,
    pub address: String,
    pub unlocked_balance: String,
    pub locked_balance: String,
    pub stashed_balance: String,
    pub latest_block: u64,
    /// Withdrawal queued against the vault's current round, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_withdrawal: Option<QueuedWithdrawalDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedWithdrawalDto {
    pub round_address: String,
    pub bps: u64,
    pub queued_amount: String,
}

impl ProviderResponse {
    fn new(lp: LiquidityProvider, queued: Option<QueuedWithdrawal>) -> Self {
        Self {
            vault_address: lp.vault_address.to_string(),
            address: lp.address.to_string(),
            unlocked_balance: lp.unlocked_balance.to_string(),
            locked_balance: lp.locked_balance.to_string(),
            stashed_balance: lp.stashed_balance.to_string(),
            latest_block: lp.latest_block.as_u64(),
            queued_withdrawal: queued.map(|q| QueuedWithdrawalDto {
                round_address: q.round_address.to_string(),
                bps: q.bps,
                queued_amount: q.queued_amount.to_string(),
            }),
        }
    }
}

pub async fn get_vault(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<VaultResponse>, AppError> {
    let address = parse_address(&address, "vault")?;
    let vault = state
        .repo
        .get_vault(&address)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Vault {}", address)))?;
    Ok(Json(vault.into()))
}

pub async fn get_provider(
    Path((address, provider)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<ProviderResponse>, AppError> {
    let address = parse_address(&address, "vault")?;
    let provider = parse_address(&provider, "provider")?;

    let (vault, lp) = futures::try_join!(
        state.repo.get_vault(&address),
        state.repo.get_provider(&address, &provider),
    )?;
    let vault = vault.ok_or_else(|| AppError::NotFound(format!("Vault {}", address)))?;
    let lp = lp.ok_or_else(|| {
        AppError::NotFound(format!("Provider {} in vault {}", provider, address))
    })?;

    let queued = match &vault.current_round_address {
        Some(round) => state.repo.get_queued(&provider, round).await?,
        None => None,
    };
    Ok(Json(ProviderResponse::new(lp, queued)))
}
