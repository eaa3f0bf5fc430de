//! Option rounds, bids and buyer positions.
//!
//! None of these keep history: their reverts are explicit inverse writes
//! driven by the event payload.

use crate::domain::{Address, Bid, OptionBuyer, OptionRound, RoundState};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

use super::{amount_col, block_col, u64_bind, u64_col, StoreTx};

const ROUND_COLUMNS: &str = r#"
    address, vault_address, round_id, state, deployed_block,
    auction_start_date, auction_end_date, settlement_date,
    strike_price, cap_level, reserve_price,
    available_options, starting_liquidity, queued_liquidity,
    clearing_price, clearing_nonce, options_sold, unsold_liquidity, premiums,
    settlement_price, payout_per_option, total_payout, remaining_liquidity
"#;

const BID_COLUMNS: &str = "round_address, bid_id, buyer, amount, price, nonce, placed_block";

const BUYER_COLUMNS: &str = r#"
    round_address, address, mintable_options, refundable_amount,
    has_minted, has_refunded, has_exercised
"#;

fn round_from_row(row: &SqliteRow) -> Result<OptionRound, sqlx::Error> {
    let state: String = row.try_get("state")?;
    let state = RoundState::from_str(&state).map_err(|e| sqlx::Error::ColumnDecode {
        index: "state".to_string(),
        source: e.into(),
    })?;
    Ok(OptionRound {
        address: Address::new(row.try_get("address")?),
        vault_address: Address::new(row.try_get("vault_address")?),
        round_id: u64_col(row, "round_id")?,
        state,
        deployed_block: block_col(row, "deployed_block")?,
        auction_start_date: u64_col(row, "auction_start_date")?,
        auction_end_date: u64_col(row, "auction_end_date")?,
        settlement_date: u64_col(row, "settlement_date")?,
        strike_price: amount_col(row, "strike_price")?,
        cap_level: amount_col(row, "cap_level")?,
        reserve_price: amount_col(row, "reserve_price")?,
        available_options: amount_col(row, "available_options")?,
        starting_liquidity: amount_col(row, "starting_liquidity")?,
        queued_liquidity: amount_col(row, "queued_liquidity")?,
        clearing_price: amount_col(row, "clearing_price")?,
        clearing_nonce: u64_col(row, "clearing_nonce")?,
        options_sold: amount_col(row, "options_sold")?,
        unsold_liquidity: amount_col(row, "unsold_liquidity")?,
        premiums: amount_col(row, "premiums")?,
        settlement_price: amount_col(row, "settlement_price")?,
        payout_per_option: amount_col(row, "payout_per_option")?,
        total_payout: amount_col(row, "total_payout")?,
        remaining_liquidity: amount_col(row, "remaining_liquidity")?,
    })
}

fn bid_from_row(row: &SqliteRow) -> Result<Bid, sqlx::Error> {
    Ok(Bid {
        round_address: Address::new(row.try_get("round_address")?),
        bid_id: row.try_get("bid_id")?,
        buyer: Address::new(row.try_get("buyer")?),
        amount: amount_col(row, "amount")?,
        price: amount_col(row, "price")?,
        nonce: u64_col(row, "nonce")?,
        placed_block: block_col(row, "placed_block")?,
    })
}

fn buyer_from_row(row: &SqliteRow) -> Result<OptionBuyer, sqlx::Error> {
    Ok(OptionBuyer {
        round_address: Address::new(row.try_get("round_address")?),
        address: Address::new(row.try_get("address")?),
        mintable_options: amount_col(row, "mintable_options")?,
        refundable_amount: amount_col(row, "refundable_amount")?,
        has_minted: row.try_get::<i32, _>("has_minted")? != 0,
        has_refunded: row.try_get::<i32, _>("has_refunded")? != 0,
        has_exercised: row.try_get::<i32, _>("has_exercised")? != 0,
    })
}

pub(super) async fn fetch_round(
    conn: &mut SqliteConnection,
    address: &Address,
) -> Result<Option<OptionRound>, sqlx::Error> {
    let sql = format!("SELECT {} FROM option_rounds WHERE address = ?", ROUND_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(address.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(round_from_row).transpose()
}

/// Bids for `round` in clearing order: price desc, nonce asc, bid id.
pub(super) async fn fetch_bids(
    conn: &mut SqliteConnection,
    round: &Address,
) -> Result<Vec<Bid>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM bids WHERE round_address = ? ORDER BY price_key DESC, nonce ASC, bid_id ASC",
        BID_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(round.as_str())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(bid_from_row).collect()
}

pub(super) async fn fetch_buyer(
    conn: &mut SqliteConnection,
    round: &Address,
    buyer: &Address,
) -> Result<Option<OptionBuyer>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM option_buyers WHERE round_address = ? AND address = ?",
        BUYER_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(round.as_str())
        .bind(buyer.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(buyer_from_row).transpose()
}

impl StoreTx {
    // =========================================================================
    // Rounds
    // =========================================================================

    pub async fn get_round(&mut self, address: &Address) -> Result<Option<OptionRound>, sqlx::Error> {
        fetch_round(&mut self.tx, address).await
    }

    /// Look a round up by its vault-local id.
    pub async fn get_round_by_id(
        &mut self,
        vault: &Address,
        round_id: u64,
    ) -> Result<Option<OptionRound>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM option_rounds WHERE vault_address = ? AND round_id = ?",
            ROUND_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(vault.as_str())
            .bind(u64_bind(round_id, "round id")?)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(round_from_row).transpose()
    }

    pub async fn put_round(&mut self, round: &OptionRound) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO option_rounds (
                address, vault_address, round_id, state, deployed_block,
                auction_start_date, auction_end_date, settlement_date,
                strike_price, cap_level, reserve_price,
                available_options, starting_liquidity, queued_liquidity,
                clearing_price, clearing_nonce, options_sold, unsold_liquidity, premiums,
                settlement_price, payout_per_option, total_payout, remaining_liquidity
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(round.address.as_str())
        .bind(round.vault_address.as_str())
        .bind(u64_bind(round.round_id, "round id")?)
        .bind(round.state.as_str())
        .bind(round.deployed_block.as_i64())
        .bind(u64_bind(round.auction_start_date, "auction start")?)
        .bind(u64_bind(round.auction_end_date, "auction end")?)
        .bind(u64_bind(round.settlement_date, "settlement date")?)
        .bind(round.strike_price.to_canonical_string())
        .bind(round.cap_level.to_canonical_string())
        .bind(round.reserve_price.to_canonical_string())
        .bind(round.available_options.to_canonical_string())
        .bind(round.starting_liquidity.to_canonical_string())
        .bind(round.queued_liquidity.to_canonical_string())
        .bind(round.clearing_price.to_canonical_string())
        .bind(u64_bind(round.clearing_nonce, "clearing nonce")?)
        .bind(round.options_sold.to_canonical_string())
        .bind(round.unsold_liquidity.to_canonical_string())
        .bind(round.premiums.to_canonical_string())
        .bind(round.settlement_price.to_canonical_string())
        .bind(round.payout_per_option.to_canonical_string())
        .bind(round.total_payout.to_canonical_string())
        .bind(round.remaining_liquidity.to_canonical_string())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn delete_round(&mut self, address: &Address) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM option_rounds WHERE address = ?")
            .bind(address.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Bids
    // =========================================================================

    pub async fn get_bid(
        &mut self,
        round: &Address,
        bid_id: &str,
    ) -> Result<Option<Bid>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM bids WHERE round_address = ? AND bid_id = ?",
            BID_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(round.as_str())
            .bind(bid_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(bid_from_row).transpose()
    }

    pub async fn bids_for_round(&mut self, round: &Address) -> Result<Vec<Bid>, sqlx::Error> {
        fetch_bids(&mut self.tx, round).await
    }

    /// Insert or overwrite a bid.
    pub async fn put_bid(&mut self, bid: &Bid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO bids (round_address, bid_id, buyer, amount, price, price_key, nonce, placed_block)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(round_address, bid_id) DO UPDATE SET
                buyer = excluded.buyer,
                amount = excluded.amount,
                price = excluded.price,
                price_key = excluded.price_key,
                nonce = excluded.nonce,
                placed_block = excluded.placed_block
            "#,
        )
        .bind(bid.round_address.as_str())
        .bind(&bid.bid_id)
        .bind(bid.buyer.as_str())
        .bind(bid.amount.to_canonical_string())
        .bind(bid.price.to_canonical_string())
        .bind(bid.price.sort_key())
        .bind(u64_bind(bid.nonce, "nonce")?)
        .bind(bid.placed_block.as_i64())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn delete_bid(&mut self, round: &Address, bid_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM bids WHERE round_address = ? AND bid_id = ?")
            .bind(round.as_str())
            .bind(bid_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_buyer_bids(
        &mut self,
        round: &Address,
        buyer: &Address,
    ) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM bids WHERE round_address = ? AND buyer = ?")
            .bind(round.as_str())
            .bind(buyer.as_str())
            .fetch_one(&mut *self.tx)
            .await?;
        row.try_get("n")
    }

    // =========================================================================
    // Buyer positions
    // =========================================================================

    pub async fn get_buyer(
        &mut self,
        round: &Address,
        buyer: &Address,
    ) -> Result<Option<OptionBuyer>, sqlx::Error> {
        fetch_buyer(&mut self.tx, round, buyer).await
    }

    pub async fn buyers_for_round(&mut self, round: &Address) -> Result<Vec<OptionBuyer>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM option_buyers WHERE round_address = ? ORDER BY address ASC",
            BUYER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(round.as_str())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(buyer_from_row).collect()
    }

    pub async fn put_buyer(&mut self, buyer: &OptionBuyer) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO option_buyers (round_address, address, mintable_options, refundable_amount,
                                       has_minted, has_refunded, has_exercised)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(round_address, address) DO UPDATE SET
                mintable_options = excluded.mintable_options,
                refundable_amount = excluded.refundable_amount,
                has_minted = excluded.has_minted,
                has_refunded = excluded.has_refunded,
                has_exercised = excluded.has_exercised
            "#,
        )
        .bind(buyer.round_address.as_str())
        .bind(buyer.address.as_str())
        .bind(buyer.mintable_options.to_canonical_string())
        .bind(buyer.refundable_amount.to_canonical_string())
        .bind(buyer.has_minted as i32)
        .bind(buyer.has_refunded as i32)
        .bind(buyer.has_exercised as i32)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn delete_buyer(&mut self, round: &Address, buyer: &Address) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM option_buyers WHERE round_address = ? AND address = ?")
            .bind(round.as_str())
            .bind(buyer.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::setup_test_db;
    use super::*;
    use crate::domain::{Amount, BlockNumber};

    fn bid(id: &str, price: u64, nonce: u64) -> Bid {
        Bid {
            round_address: Address::new("0xr".to_string()),
            bid_id: id.to_string(),
            buyer: Address::new("0xb".to_string()),
            amount: Amount::from(1u64),
            price: Amount::from(price),
            nonce,
            placed_block: BlockNumber::new(2),
        }
    }

    #[tokio::test]
    async fn test_bids_come_back_in_clearing_order() {
        let (repo, _temp) = setup_test_db().await;
        let mut tx = repo.begin().await.unwrap();
        // 9 vs 10 vs 100 would misorder as plain text
        for b in [bid("a", 9, 0), bid("b", 100, 3), bid("c", 10, 2), bid("d", 10, 1)] {
            tx.put_bid(&b).await.unwrap();
        }
        let ids: Vec<String> = tx
            .bids_for_round(&Address::new("0xr".to_string()))
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.bid_id)
            .collect();
        assert_eq!(ids, vec!["b", "d", "c", "a"]);
    }

    #[tokio::test]
    async fn test_buyer_flags_persist() {
        let (repo, _temp) = setup_test_db().await;
        let mut tx = repo.begin().await.unwrap();
        let mut buyer = OptionBuyer::new(Address::new("0xr".to_string()), Address::new("0xb".to_string()));
        buyer.has_exercised = true;
        buyer.refundable_amount = Amount::from(20u64);
        tx.put_buyer(&buyer).await.unwrap();
        tx.commit().await.unwrap();

        let stored = repo
            .get_buyer(&buyer.round_address, &buyer.address)
            .await
            .unwrap();
        assert_eq!(stored, Some(buyer));
    }
}
