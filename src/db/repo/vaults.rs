//! Vault, liquidity-provider and queued-withdrawal storage with per-block
//! history.

use crate::domain::{Address, BlockNumber, LiquidityProvider, QueuedWithdrawal, Vault};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use super::{amount_col, block_col, u64_bind, u64_col, Restored, StoreTx};

fn vault_from_row(row: &SqliteRow) -> Result<Vault, sqlx::Error> {
    Ok(Vault {
        address: Address::new(row.try_get("address")?),
        current_round_id: u64_col(row, "current_round_id")?,
        current_round_address: row
            .try_get::<Option<String>, _>("current_round_address")?
            .map(Address::new),
        unlocked_balance: amount_col(row, "unlocked_balance")?,
        locked_balance: amount_col(row, "locked_balance")?,
        stashed_balance: amount_col(row, "stashed_balance")?,
        latest_block: block_col(row, "latest_block")?,
    })
}

fn provider_from_row(row: &SqliteRow) -> Result<LiquidityProvider, sqlx::Error> {
    Ok(LiquidityProvider {
        vault_address: Address::new(row.try_get("vault_address")?),
        address: Address::new(row.try_get("address")?),
        unlocked_balance: amount_col(row, "unlocked_balance")?,
        locked_balance: amount_col(row, "locked_balance")?,
        stashed_balance: amount_col(row, "stashed_balance")?,
        latest_block: block_col(row, "latest_block")?,
    })
}

fn queued_from_row(row: &SqliteRow) -> Result<QueuedWithdrawal, sqlx::Error> {
    Ok(QueuedWithdrawal {
        provider: Address::new(row.try_get("provider")?),
        round_address: Address::new(row.try_get("round_address")?),
        bps: u64_col(row, "bps")?,
        queued_amount: amount_col(row, "queued_amount")?,
        latest_block: block_col(row, "latest_block")?,
    })
}

pub(super) async fn fetch_vault(
    conn: &mut SqliteConnection,
    address: &Address,
) -> Result<Option<Vault>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT address, current_round_id, current_round_address,
               unlocked_balance, locked_balance, stashed_balance, latest_block
        FROM vaults
        WHERE address = ?
        "#,
    )
    .bind(address.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(vault_from_row).transpose()
}

pub(super) async fn fetch_provider(
    conn: &mut SqliteConnection,
    vault: &Address,
    provider: &Address,
) -> Result<Option<LiquidityProvider>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT vault_address, address, unlocked_balance, locked_balance,
               stashed_balance, latest_block
        FROM liquidity_providers
        WHERE vault_address = ? AND address = ?
        "#,
    )
    .bind(vault.as_str())
    .bind(provider.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(provider_from_row).transpose()
}

pub(super) async fn fetch_queued(
    conn: &mut SqliteConnection,
    provider: &Address,
    round: &Address,
) -> Result<Option<QueuedWithdrawal>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT provider, round_address, bps, queued_amount, latest_block
        FROM queued_withdrawals
        WHERE provider = ? AND round_address = ?
        "#,
    )
    .bind(provider.as_str())
    .bind(round.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(queued_from_row).transpose()
}

impl StoreTx {
    // =========================================================================
    // Vaults
    // =========================================================================

    pub async fn get_vault(&mut self, address: &Address) -> Result<Option<Vault>, sqlx::Error> {
        fetch_vault(&mut self.tx, address).await
    }

    /// Upsert the vault and record its value as of `vault.latest_block`.
    pub async fn put_vault(&mut self, vault: &Vault) -> Result<(), sqlx::Error> {
        let round_id = u64_bind(vault.current_round_id, "round id")?;
        let round_address = vault.current_round_address.as_ref().map(|a| a.as_str());
        sqlx::query(
            r#"
            INSERT INTO vaults (address, current_round_id, current_round_address,
                                unlocked_balance, locked_balance, stashed_balance, latest_block)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                current_round_id = excluded.current_round_id,
                current_round_address = excluded.current_round_address,
                unlocked_balance = excluded.unlocked_balance,
                locked_balance = excluded.locked_balance,
                stashed_balance = excluded.stashed_balance,
                latest_block = excluded.latest_block
            "#,
        )
        .bind(vault.address.as_str())
        .bind(round_id)
        .bind(round_address)
        .bind(vault.unlocked_balance.to_canonical_string())
        .bind(vault.locked_balance.to_canonical_string())
        .bind(vault.stashed_balance.to_canonical_string())
        .bind(vault.latest_block.as_i64())
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO vault_history (address, block_number, current_round_id, current_round_address,
                                       unlocked_balance, locked_balance, stashed_balance)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(address, block_number) DO UPDATE SET
                current_round_id = excluded.current_round_id,
                current_round_address = excluded.current_round_address,
                unlocked_balance = excluded.unlocked_balance,
                locked_balance = excluded.locked_balance,
                stashed_balance = excluded.stashed_balance
            "#,
        )
        .bind(vault.address.as_str())
        .bind(vault.latest_block.as_i64())
        .bind(round_id)
        .bind(round_address)
        .bind(vault.unlocked_balance.to_canonical_string())
        .bind(vault.locked_balance.to_canonical_string())
        .bind(vault.stashed_balance.to_canonical_string())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Undo the vault's mutations at `block` from history.
    pub async fn revert_vault(
        &mut self,
        address: &Address,
        block: BlockNumber,
    ) -> Result<Restored, sqlx::Error> {
        match self.get_vault(address).await? {
            Some(vault) if vault.latest_block == block => {}
            _ => return Ok(Restored::Untouched),
        }

        sqlx::query("DELETE FROM vault_history WHERE address = ? AND block_number >= ?")
            .bind(address.as_str())
            .bind(block.as_i64())
            .execute(&mut *self.tx)
            .await?;

        let prior = sqlx::query(
            r#"
            SELECT address, current_round_id, current_round_address,
                   unlocked_balance, locked_balance, stashed_balance,
                   block_number AS latest_block
            FROM vault_history
            WHERE address = ? AND block_number < ?
            ORDER BY block_number DESC
            LIMIT 1
            "#,
        )
        .bind(address.as_str())
        .bind(block.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        match prior.as_ref().map(vault_from_row).transpose()? {
            Some(vault) => {
                self.write_vault_row(&vault).await?;
                Ok(Restored::Rewound(vault.latest_block))
            }
            None => {
                sqlx::query("DELETE FROM vaults WHERE address = ?")
                    .bind(address.as_str())
                    .execute(&mut *self.tx)
                    .await?;
                Ok(Restored::Removed)
            }
        }
    }

    async fn write_vault_row(&mut self, vault: &Vault) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE vaults SET
                current_round_id = ?, current_round_address = ?,
                unlocked_balance = ?, locked_balance = ?, stashed_balance = ?,
                latest_block = ?
            WHERE address = ?
            "#,
        )
        .bind(u64_bind(vault.current_round_id, "round id")?)
        .bind(vault.current_round_address.as_ref().map(|a| a.as_str()))
        .bind(vault.unlocked_balance.to_canonical_string())
        .bind(vault.locked_balance.to_canonical_string())
        .bind(vault.stashed_balance.to_canonical_string())
        .bind(vault.latest_block.as_i64())
        .bind(vault.address.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Liquidity providers
    // =========================================================================

    pub async fn get_provider(
        &mut self,
        vault: &Address,
        provider: &Address,
    ) -> Result<Option<LiquidityProvider>, sqlx::Error> {
        fetch_provider(&mut self.tx, vault, provider).await
    }

    /// Every provider of `vault`, ordered by address.
    pub async fn providers_for_vault(
        &mut self,
        vault: &Address,
    ) -> Result<Vec<LiquidityProvider>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT vault_address, address, unlocked_balance, locked_balance,
                   stashed_balance, latest_block
            FROM liquidity_providers
            WHERE vault_address = ?
            ORDER BY address ASC
            "#,
        )
        .bind(vault.as_str())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(provider_from_row).collect()
    }

    pub async fn put_provider(&mut self, lp: &LiquidityProvider) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO liquidity_providers (vault_address, address, unlocked_balance,
                                             locked_balance, stashed_balance, latest_block)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(vault_address, address) DO UPDATE SET
                unlocked_balance = excluded.unlocked_balance,
                locked_balance = excluded.locked_balance,
                stashed_balance = excluded.stashed_balance,
                latest_block = excluded.latest_block
            "#,
        )
        .bind(lp.vault_address.as_str())
        .bind(lp.address.as_str())
        .bind(lp.unlocked_balance.to_canonical_string())
        .bind(lp.locked_balance.to_canonical_string())
        .bind(lp.stashed_balance.to_canonical_string())
        .bind(lp.latest_block.as_i64())
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO liquidity_provider_history (vault_address, address, block_number,
                                                    unlocked_balance, locked_balance, stashed_balance)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(vault_address, address, block_number) DO UPDATE SET
                unlocked_balance = excluded.unlocked_balance,
                locked_balance = excluded.locked_balance,
                stashed_balance = excluded.stashed_balance
            "#,
        )
        .bind(lp.vault_address.as_str())
        .bind(lp.address.as_str())
        .bind(lp.latest_block.as_i64())
        .bind(lp.unlocked_balance.to_canonical_string())
        .bind(lp.locked_balance.to_canonical_string())
        .bind(lp.stashed_balance.to_canonical_string())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Undo one provider's mutations at `block` from history.
    pub async fn revert_provider(
        &mut self,
        vault: &Address,
        provider: &Address,
        block: BlockNumber,
    ) -> Result<Restored, sqlx::Error> {
        match self.get_provider(vault, provider).await? {
            Some(lp) if lp.latest_block == block => {}
            _ => return Ok(Restored::Untouched),
        }

        sqlx::query(
            r#"
            DELETE FROM liquidity_provider_history
            WHERE vault_address = ? AND address = ? AND block_number >= ?
            "#,
        )
        .bind(vault.as_str())
        .bind(provider.as_str())
        .bind(block.as_i64())
        .execute(&mut *self.tx)
        .await?;

        let prior = sqlx::query(
            r#"
            SELECT vault_address, address, unlocked_balance, locked_balance,
                   stashed_balance, block_number AS latest_block
            FROM liquidity_provider_history
            WHERE vault_address = ? AND address = ? AND block_number < ?
            ORDER BY block_number DESC
            LIMIT 1
            "#,
        )
        .bind(vault.as_str())
        .bind(provider.as_str())
        .bind(block.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        match prior.as_ref().map(provider_from_row).transpose()? {
            Some(lp) => {
                sqlx::query(
                    r#"
                    UPDATE liquidity_providers SET
                        unlocked_balance = ?, locked_balance = ?, stashed_balance = ?,
                        latest_block = ?
                    WHERE vault_address = ? AND address = ?
                    "#,
                )
                .bind(lp.unlocked_balance.to_canonical_string())
                .bind(lp.locked_balance.to_canonical_string())
                .bind(lp.stashed_balance.to_canonical_string())
                .bind(lp.latest_block.as_i64())
                .bind(vault.as_str())
                .bind(provider.as_str())
                .execute(&mut *self.tx)
                .await?;
                Ok(Restored::Rewound(lp.latest_block))
            }
            None => {
                sqlx::query("DELETE FROM liquidity_providers WHERE vault_address = ? AND address = ?")
                    .bind(vault.as_str())
                    .bind(provider.as_str())
                    .execute(&mut *self.tx)
                    .await?;
                Ok(Restored::Removed)
            }
        }
    }

    /// Undo every provider of `vault` last written at `block`. Returns how
    /// many were rewound or removed.
    pub async fn revert_providers_at(
        &mut self,
        vault: &Address,
        block: BlockNumber,
    ) -> Result<usize, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT address FROM liquidity_providers WHERE vault_address = ? AND latest_block = ?",
        )
        .bind(vault.as_str())
        .bind(block.as_i64())
        .fetch_all(&mut *self.tx)
        .await?;
        let touched: Vec<Address> = rows
            .iter()
            .map(|r| r.try_get::<String, _>("address").map(Address::new))
            .collect::<Result<_, _>>()?;

        for provider in &touched {
            self.revert_provider(vault, provider, block).await?;
        }
        Ok(touched.len())
    }

    // =========================================================================
    // Queued withdrawals
    // =========================================================================

    pub async fn get_queued(
        &mut self,
        provider: &Address,
        round: &Address,
    ) -> Result<Option<QueuedWithdrawal>, sqlx::Error> {
        fetch_queued(&mut self.tx, provider, round).await
    }

    /// Every queued withdrawal against `round`.
    pub async fn queued_for_round(
        &mut self,
        round: &Address,
    ) -> Result<Vec<QueuedWithdrawal>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT provider, round_address, bps, queued_amount, latest_block
            FROM queued_withdrawals
            WHERE round_address = ?
            ORDER BY provider ASC
            "#,
        )
        .bind(round.as_str())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(queued_from_row).collect()
    }

    pub async fn put_queued(&mut self, queued: &QueuedWithdrawal) -> Result<(), sqlx::Error> {
        let bps = u64_bind(queued.bps, "bps")?;
        sqlx::query(
            r#"
            INSERT INTO queued_withdrawals (provider, round_address, bps, queued_amount, latest_block)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(provider, round_address) DO UPDATE SET
                bps = excluded.bps,
                queued_amount = excluded.queued_amount,
                latest_block = excluded.latest_block
            "#,
        )
        .bind(queued.provider.as_str())
        .bind(queued.round_address.as_str())
        .bind(bps)
        .bind(queued.queued_amount.to_canonical_string())
        .bind(queued.latest_block.as_i64())
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO queued_withdrawal_history (provider, round_address, block_number, bps, queued_amount)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(provider, round_address, block_number) DO UPDATE SET
                bps = excluded.bps,
                queued_amount = excluded.queued_amount
            "#,
        )
        .bind(queued.provider.as_str())
        .bind(queued.round_address.as_str())
        .bind(queued.latest_block.as_i64())
        .bind(bps)
        .bind(queued.queued_amount.to_canonical_string())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Undo a queued withdrawal's mutations at `block` from history.
    pub async fn revert_queued(
        &mut self,
        provider: &Address,
        round: &Address,
        block: BlockNumber,
    ) -> Result<Restored, sqlx::Error> {
        match self.get_queued(provider, round).await? {
            Some(q) if q.latest_block == block => {}
            _ => return Ok(Restored::Untouched),
        }

        sqlx::query(
            r#"
            DELETE FROM queued_withdrawal_history
            WHERE provider = ? AND round_address = ? AND block_number >= ?
            "#,
        )
        .bind(provider.as_str())
        .bind(round.as_str())
        .bind(block.as_i64())
        .execute(&mut *self.tx)
        .await?;

        let prior = sqlx::query(
            r#"
            SELECT provider, round_address, bps, queued_amount, block_number AS latest_block
            FROM queued_withdrawal_history
            WHERE provider = ? AND round_address = ? AND block_number < ?
            ORDER BY block_number DESC
            LIMIT 1
            "#,
        )
        .bind(provider.as_str())
        .bind(round.as_str())
        .bind(block.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        match prior.as_ref().map(queued_from_row).transpose()? {
            Some(q) => {
                self.put_queued(&q).await?;
                Ok(Restored::Rewound(q.latest_block))
            }
            None => {
                sqlx::query(
                    "DELETE FROM queued_withdrawals WHERE provider = ? AND round_address = ?",
                )
                .bind(provider.as_str())
                .bind(round.as_str())
                .execute(&mut *self.tx)
                .await?;
                Ok(Restored::Removed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::setup_test_db;
    use super::*;
    use crate::domain::Amount;

    fn addr(s: &str) -> Address {
        Address::new(s.to_string())
    }

    #[tokio::test]
    async fn test_vault_revert_walks_history() {
        let (repo, _temp) = setup_test_db().await;
        let mut tx = repo.begin().await.unwrap();

        let mut vault = Vault::new(addr("0xv"), BlockNumber::new(5));
        tx.put_vault(&vault).await.unwrap();
        vault.unlocked_balance = Amount::from(100u64);
        vault.latest_block = BlockNumber::new(10);
        tx.put_vault(&vault).await.unwrap();

        // not last written at 7
        assert_eq!(
            tx.revert_vault(&vault.address, BlockNumber::new(7)).await.unwrap(),
            Restored::Untouched
        );
        assert_eq!(
            tx.revert_vault(&vault.address, BlockNumber::new(10)).await.unwrap(),
            Restored::Rewound(BlockNumber::new(5))
        );
        let restored = tx.get_vault(&vault.address).await.unwrap().unwrap();
        assert_eq!(restored, Vault::new(addr("0xv"), BlockNumber::new(5)));

        assert_eq!(
            tx.revert_vault(&vault.address, BlockNumber::new(5)).await.unwrap(),
            Restored::Removed
        );
        assert!(tx.get_vault(&vault.address).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revert_providers_at_only_touches_block() {
        let (repo, _temp) = setup_test_db().await;
        let mut tx = repo.begin().await.unwrap();
        let vault = addr("0xv");

        let mut a = LiquidityProvider::new(vault.clone(), addr("0xa"), BlockNumber::new(3));
        a.unlocked_balance = Amount::from(50u64);
        tx.put_provider(&a).await.unwrap();
        let mut b = LiquidityProvider::new(vault.clone(), addr("0xb"), BlockNumber::new(4));
        b.unlocked_balance = Amount::from(70u64);
        tx.put_provider(&b).await.unwrap();

        let mut a2 = a.clone();
        a2.locked_balance = a2.unlocked_balance.clone();
        a2.unlocked_balance = Amount::zero();
        a2.latest_block = BlockNumber::new(8);
        tx.put_provider(&a2).await.unwrap();

        assert_eq!(tx.revert_providers_at(&vault, BlockNumber::new(8)).await.unwrap(), 1);
        let providers = tx.providers_for_vault(&vault).await.unwrap();
        assert_eq!(providers, vec![a, b]);
    }

    #[tokio::test]
    async fn test_queued_withdrawal_revert_removes_first_write() {
        let (repo, _temp) = setup_test_db().await;
        let mut tx = repo.begin().await.unwrap();
        let queued = QueuedWithdrawal {
            provider: addr("0xa"),
            round_address: addr("0xr"),
            bps: 2500,
            queued_amount: Amount::from(25u64),
            latest_block: BlockNumber::new(6),
        };
        tx.put_queued(&queued).await.unwrap();
        assert_eq!(tx.queued_for_round(&addr("0xr")).await.unwrap(), vec![queued.clone()]);

        assert_eq!(
            tx.revert_queued(&queued.provider, &queued.round_address, BlockNumber::new(6))
                .await
                .unwrap(),
            Restored::Removed
        );
        assert!(tx.queued_for_round(&addr("0xr")).await.unwrap().is_empty());
    }
}
