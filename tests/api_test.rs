use axum::http::StatusCode;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;
use vault_ledger::api::{self, AppState};
use vault_ledger::db::init_db;
use vault_ledger::{Address, Amount, BlockNumber, LedgerEngine, LedgerEvent, Repository};

fn addr(s: &str) -> Address {
    Address::parse(s).unwrap()
}

fn amt(v: u64) -> Amount {
    Amount::from(v)
}

async fn setup_test_app() -> (axum::Router, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();

    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    seed(&LedgerEngine::new(repo.clone())).await;

    (api::create_router(AppState::new(repo)), temp_dir)
}

/// Vault 0x7a with one provider, round 0x55 auctioning with two bids and a
/// queued withdrawal.
async fn seed(engine: &LedgerEngine) {
    let blocks: Vec<Vec<LedgerEvent>> = vec![
        vec![LedgerEvent::VaultDeployed { vault: addr("0x7a") }],
        vec![LedgerEvent::Deposit {
            vault: addr("0x7a"),
            provider: addr("0xa1"),
            provider_unlocked: amt(500),
            vault_unlocked: amt(500),
        }],
        vec![LedgerEvent::RoundDeployed {
            vault: addr("0x7a"),
            round_id: 1,
            round: addr("0x55"),
            auction_start_date: 100,
            auction_end_date: 200,
            settlement_date: 300,
            strike_price: amt(1000),
            cap_level: amt(5000),
            reserve_price: amt(2),
        }],
        vec![LedgerEvent::AuctionStarted {
            round: addr("0x55"),
            available_options: amt(10),
            starting_liquidity: amt(500),
        }],
        vec![
            LedgerEvent::BidPlaced {
                round: addr("0x55"),
                bid_id: "0x1".to_string(),
                buyer: addr("0xc1"),
                amount: amt(4),
                price: amt(3),
                nonce: 0,
            },
            LedgerEvent::BidPlaced {
                round: addr("0x55"),
                bid_id: "0x2".to_string(),
                buyer: addr("0xc2"),
                amount: amt(6),
                price: amt(5),
                nonce: 1,
            },
            LedgerEvent::WithdrawalQueued {
                vault: addr("0x7a"),
                provider: addr("0xa1"),
                round_id: 1,
                bps: 2500,
                queued_before: amt(0),
                queued_now: amt(125),
                vault_queued_now: amt(125),
            },
        ],
    ];
    for (n, events) in blocks.iter().enumerate() {
        engine
            .apply_block(BlockNumber::new(n as u64 + 1), events)
            .await
            .unwrap();
    }
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = axum::http::Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap();
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _temp) = setup_test_app().await;
    let (status, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_ready_endpoint() {
    let (app, _temp) = setup_test_app().await;
    let (status, body) = get(app, "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    // No block headers are recorded by apply_block alone.
    assert!(body["indexedBlock"].is_null());
}

#[tokio::test]
async fn test_get_vault() {
    let (app, _temp) = setup_test_app().await;
    // Leading zeros and case are normalized.
    let (status, body) = get(app, "/v1/vaults/0x007A").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["address"], "0x7a");
    assert_eq!(body["currentRoundId"], 1);
    assert_eq!(body["currentRoundAddress"], "0x55");
    assert_eq!(body["lockedBalance"], "500");
    assert_eq!(body["unlockedBalance"], "0");
    assert_eq!(body["latestBlock"], 4);
}

#[tokio::test]
async fn test_get_vault_not_found() {
    let (app, _temp) = setup_test_app().await;
    let (status, body) = get(app, "/v1/vaults/0x123").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("0x123"));
}

#[tokio::test]
async fn test_invalid_address_is_bad_request() {
    let (app, _temp) = setup_test_app().await;
    let (status, _) = get(app, "/v1/rounds/not-an-address").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_provider_with_queued_withdrawal() {
    let (app, _temp) = setup_test_app().await;
    let (status, body) = get(app, "/v1/vaults/0x7a/providers/0xa1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lockedBalance"], "500");
    assert_eq!(body["queuedWithdrawal"]["bps"], 2500);
    assert_eq!(body["queuedWithdrawal"]["queuedAmount"], "125");
    assert_eq!(body["queuedWithdrawal"]["roundAddress"], "0x55");
}

#[tokio::test]
async fn test_get_unknown_provider() {
    let (app, _temp) = setup_test_app().await;
    let (status, _) = get(app, "/v1/vaults/0x7a/providers/0xdead").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_round() {
    let (app, _temp) = setup_test_app().await;
    let (status, body) = get(app, "/v1/rounds/0x55").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "Auctioning");
    assert_eq!(body["vaultAddress"], "0x7a");
    assert_eq!(body["startingLiquidity"], "500");
    assert_eq!(body["queuedLiquidity"], "125");
    assert_eq!(body["capLevel"], "5000");
}

#[tokio::test]
async fn test_get_bids_in_clearing_order() {
    let (app, _temp) = setup_test_app().await;
    let (status, body) = get(app, "/v1/rounds/0x55/bids").await;
    assert_eq!(status, StatusCode::OK);
    let bids = body["bids"].as_array().unwrap();
    assert_eq!(bids.len(), 2);
    assert_eq!(bids[0]["bidId"], "0x2");
    assert_eq!(bids[0]["price"], "5");
    assert_eq!(bids[1]["bidId"], "0x1");
}

#[tokio::test]
async fn test_get_bids_unknown_round() {
    let (app, _temp) = setup_test_app().await;
    let (status, _) = get(app, "/v1/rounds/0x56/bids").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_buyer() {
    let (app, _temp) = setup_test_app().await;
    let (status, body) = get(app, "/v1/rounds/0x55/buyers/0xc2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mintableOptions"], "0");
    assert_eq!(body["hasMinted"], false);
}
