use crate::api::{parse_address, AppState};
use crate::domain::{Bid, OptionBuyer, OptionRound};
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResponse {
    pub address: String,
    pub vault_address: String,
    pub round_id: u64,
    pub state: String,
    pub deployed_block: u64,
    pub auction_start_date: u64,
    pub auction_end_date: u64,
    pub settlement_date: u64,
    pub strike_price: String,
    pub cap_level: String,
    pub reserve_price: String,
    pub available_options: String,
    pub starting_liquidity: String,
    pub queued_liquidity: String,
    pub clearing_price: String,
    pub clearing_nonce: u64,
    pub options_sold: String,
    pub unsold_liquidity: String,
    pub premiums: String,
    pub settlement_price: String,
    pub payout_per_option: String,
    pub total_payout: String,
    pub remaining_liquidity: String,
}

impl From<OptionRound> for RoundResponse {
    fn from(r: OptionRound) -> Self {
        Self {
            address: r.address.to_string(),
            vault_address: r.vault_address.to_string(),
            round_id: r.round_id,
            state: r.state.as_str().to_string(),
            deployed_block: r.deployed_block.as_u64(),
            auction_start_date: r.auction_start_date,
            auction_end_date: r.auction_end_date,
            settlement_date: r.settlement_date,
            strike_price: r.strike_price.to_string(),
            cap_level: r.cap_level.to_string(),
            reserve_price: r.reserve_price.to_string(),
            available_options: r.available_options.to_string(),
            starting_liquidity: r.starting_liquidity.to_string(),
            queued_liquidity: r.queued_liquidity.to_string(),
            clearing_price: r.clearing_price.to_string(),
            clearing_nonce: r.clearing_nonce,
            options_sold: r.options_sold.to_string(),
            unsold_liquidity: r.unsold_liquidity.to_string(),
            premiums: r.premiums.to_string(),
            settlement_price: r.settlement_price.to_string(),
            payout_per_option: r.payout_per_option.to_string(),
            total_payout: r.total_payout.to_string(),
            remaining_liquidity: r.remaining_liquidity.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidDto {
    pub bid_id: String,
    pub buyer: String,
    pub amount: String,
    pub price: String,
    pub nonce: u64,
    pub placed_block: u64,
}

impl From<Bid> for BidDto {
    fn from(b: Bid) -> Self {
        Self {
            bid_id: b.bid_id,
            buyer: b.buyer.to_string(),
            amount: b.amount.to_string(),
            price: b.price.to_string(),
            nonce: b.nonce,
            placed_block: b.placed_block.as_u64(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidsResponse {
    pub round_address: String,
    /// Highest price first, earliest nonce first within a price.
    pub bids: Vec<BidDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyerResponse {
    pub round_address: String,
    pub address: String,
    pub mintable_options: String,
    pub refundable_amount: String,
    pub has_minted: bool,
    pub has_refunded: bool,
    pub has_exercised: bool,
}

impl From<OptionBuyer> for BuyerResponse {
    fn from(b: OptionBuyer) -> Self {
        Self {
            round_address: b.round_address.to_string(),
            address: b.address.to_string(),
            mintable_options: b.mintable_options.to_string(),
            refundable_amount: b.refundable_amount.to_string(),
            has_minted: b.has_minted,
            has_refunded: b.has_refunded,
            has_exercised: b.has_exercised,
        }
    }
}

pub async fn get_round(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RoundResponse>, AppError> {
    let address = parse_address(&address, "round")?;
    let round = state
        .repo
        .get_round(&address)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Round {}", address)))?;
    Ok(Json(round.into()))
}

pub async fn get_bids(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<BidsResponse>, AppError> {
    let address = parse_address(&address, "round")?;
    let (round, bids) = futures::try_join!(
        state.repo.get_round(&address),
        state.repo.list_bids(&address),
    )?;
    if round.is_none() {
        return Err(AppError::NotFound(format!("Round {}", address)));
    }
    Ok(Json(BidsResponse {
        round_address: address.to_string(),
        bids: bids.into_iter().map(BidDto::from).collect(),
    }))
}

pub async fn get_buyer(
    Path((address, buyer)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<BuyerResponse>, AppError> {
    let address = parse_address(&address, "round")?;
    let buyer = parse_address(&buyer, "buyer")?;
    let position = state
        .repo
        .get_buyer(&address, &buyer)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Buyer {} in round {}", buyer, address)))?;
    Ok(Json(position.into()))
}
