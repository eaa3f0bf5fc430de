//! Routes raw events to vault-scoped or round-scoped decoding by source
//! address, and keeps the set of known contracts current as vaults and rounds
//! are deployed.

use super::{decode_deployment, decode_round_event, decode_vault_event, DecodeError, Felt, RawEvent};
use crate::db::Repository;
use crate::domain::{Address, LedgerEvent};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

pub struct Dispatcher {
    udc_address: Option<Address>,
    vault_class_hash: Option<Felt>,
    vaults: HashSet<Address>,
    /// round -> owning vault
    rounds: HashMap<Address, Address>,
}

impl Dispatcher {
    pub fn new(udc_address: Option<Address>, vault_class_hash: Option<Felt>) -> Self {
        Self {
            udc_address,
            vault_class_hash,
            vaults: HashSet::new(),
            rounds: HashMap::new(),
        }
    }

    /// Seed known vaults and rounds from the store.
    pub async fn load(&mut self, repo: &Repository) -> Result<(), sqlx::Error> {
        for vault in repo.list_vault_addresses().await? {
            self.vaults.insert(vault);
        }
        for (round, vault) in repo.list_round_addresses().await? {
            self.rounds.insert(round, vault);
        }
        info!(
            vaults = self.vaults.len(),
            rounds = self.rounds.len(),
            "Dispatcher loaded known contracts"
        );
        Ok(())
    }

    pub fn track_vault(&mut self, vault: Address) {
        self.vaults.insert(vault);
    }

    pub fn is_known_vault(&self, address: &Address) -> bool {
        self.vaults.contains(address)
    }

    pub fn is_known_round(&self, address: &Address) -> bool {
        self.rounds.contains_key(address)
    }

    /// Decode one block's events in emission order. Undecodable events are
    /// logged and dropped; contracts deployed earlier in the block are routed
    /// for the rest of it.
    pub fn decode_block(&mut self, raw_events: &[RawEvent]) -> Vec<LedgerEvent> {
        let mut decoded = Vec::new();
        for (index, raw) in raw_events.iter().enumerate() {
            match self.route(raw) {
                Ok(Some(event)) => {
                    self.observe(&event);
                    decoded.push(event);
                }
                Ok(None) => {}
                Err(DecodeError::UnknownSelector(selector)) => {
                    debug!(index, from = %raw.from_address, selector = %selector, "Ignoring unrecognized event");
                }
                Err(e) => {
                    warn!(index, from = %raw.from_address, error = %e, "Skipping undecodable event");
                }
            }
        }
        decoded
    }

    /// Undo `observe` for events that were retracted or never committed.
    pub fn forget(&mut self, events: &[LedgerEvent]) {
        for event in events.iter().rev() {
            match event {
                LedgerEvent::VaultDeployed { vault } => {
                    self.vaults.remove(vault);
                }
                LedgerEvent::RoundDeployed { round, .. } => {
                    self.rounds.remove(round);
                }
                _ => {}
            }
        }
    }

    fn observe(&mut self, event: &LedgerEvent) {
        match event {
            LedgerEvent::VaultDeployed { vault } => {
                self.vaults.insert(vault.clone());
            }
            LedgerEvent::RoundDeployed { vault, round, .. } => {
                self.rounds.insert(round.clone(), vault.clone());
            }
            _ => {}
        }
    }

    fn route(&self, raw: &RawEvent) -> Result<Option<LedgerEvent>, DecodeError> {
        let from = raw.from_address.to_address();

        if self.udc_address.as_ref() == Some(&from) {
            return self.route_deployment(raw);
        }
        if self.vaults.contains(&from) {
            return decode_vault_event(&from, raw).map(Some);
        }
        if self.rounds.contains_key(&from) {
            return decode_round_event(&from, raw).map(Some);
        }
        Ok(None)
    }

    fn route_deployment(&self, raw: &RawEvent) -> Result<Option<LedgerEvent>, DecodeError> {
        let Some(class_hash) = self.vault_class_hash.as_ref() else {
            return Ok(None);
        };
        match decode_deployment(raw)? {
            Some((address, deployed_class)) if &deployed_class == class_hash => {
                if self.vaults.contains(&address) {
                    return Ok(None);
                }
                Ok(Some(LedgerEvent::VaultDeployed { vault: address }))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{felt, raw};
    use super::super::selector;
    use super::*;
    use crate::domain::Amount;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Some(Address::new("0xdec".to_string())),
            Some(Felt::from_hex("0xc1a55").unwrap()),
        )
    }

    #[test]
    fn test_udc_deployment_registers_vault_for_same_block() {
        let mut d = dispatcher();
        let block = vec![
            // other class hash: ignored
            raw("0xdec", "ContractDeployed", &[], &[0x111, 0, 0, 0xbad]),
            raw("0xdec", "ContractDeployed", &[], &[0x7a, 0, 0, 0xc1a55]),
            raw("0x7a", "Deposit", &[felt(0xa1)], &[10, 0, 10, 0, 10, 0]),
            raw("0x111", "Deposit", &[felt(0xa1)], &[10, 0, 10, 0, 10, 0]),
        ];
        let events = d.decode_block(&block);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            LedgerEvent::VaultDeployed {
                vault: Address::new("0x7a".to_string())
            }
        );
        assert_eq!(events[1].name(), "Deposit");
        assert!(d.is_known_vault(&Address::new("0x7a".to_string())));
        assert!(!d.is_known_vault(&Address::new("0x111".to_string())));
    }

    #[test]
    fn test_round_deployment_routes_round_events() {
        let mut d = dispatcher();
        d.track_vault(Address::new("0x7a".to_string()));
        let block = vec![
            raw("0x7a", "OptionRoundDeployed", &[], &[1, 0x55, 100, 200, 300, 1000, 0, 5000, 2, 0]),
            raw("0x55", "AuctionStarted", &[], &[1000, 0, 10, 0]),
            // ERC20 noise from the round token
            raw("0x55", "Transfer", &[], &[1, 2, 3]),
        ];
        let events = d.decode_block(&block);
        assert_eq!(events.len(), 2);
        match &events[0] {
            LedgerEvent::RoundDeployed {
                round,
                cap_level,
                reserve_price,
                ..
            } => {
                assert_eq!(round, &Address::new("0x55".to_string()));
                assert_eq!(cap_level, &Amount::from(5000u64));
                assert_eq!(reserve_price, &Amount::from(2u64));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(d.is_known_round(&Address::new("0x55".to_string())));

        d.forget(&events);
        assert!(!d.is_known_round(&Address::new("0x55".to_string())));
    }

    #[test]
    fn test_malformed_event_is_skipped_not_fatal() {
        let mut d = dispatcher();
        d.track_vault(Address::new("0x7a".to_string()));
        let mut truncated = raw("0x7a", "Withdraw", &[felt(0xa1)], &[1]);
        truncated.keys = vec![selector("Withdraw")];
        let block = vec![
            truncated,
            raw("0x7a", "Withdraw", &[felt(0xa1)], &[5, 0, 0, 0, 20, 0]),
        ];
        let events = d.decode_block(&block);
        assert_eq!(events.len(), 1);
    }
}
