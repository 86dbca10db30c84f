//! The assembled graph from configuration, as a host process uses it.

use escrow_ledger::Money;
use escrow_ledger::app::App;
use escrow_ledger::config::AppConfig;
use escrow_ledger::ledger::{AccountId, LedgerPort};

const BASE: &str = r#"
log_level: "info"
log_dir: "./logs"
log_file: "escrow.log"
use_json: false
rotation: "never"
storage: memory
"#;

#[tokio::test]
async fn test_escrow_reachable_and_events_relayed() {
    let yaml = format!(
        "{}{}",
        BASE,
        r#"
outbox:
  enabled: true
  topic_prefix: "dev"
  poll_interval_ms: 10
  batch_size: 10
  max_retries: 3
  publish_timeout_ms: 500
  lease_ms: 5000
  backoff_base_ms: 0
  backoff_max_ms: 0
publisher:
  kind: log
"#
    );
    let config = AppConfig::from_yaml(&yaml).unwrap();
    let app = App::build(&config).await.unwrap();

    let escrow = app.escrow_port();
    let amount = Money::from_nano(1_000_000_000);
    escrow.generate_deposit_address(1, amount).await.unwrap();
    escrow
        .confirm_deposit(1, "hash-1", amount, 1, "EQsender")
        .await
        .unwrap();
    assert_eq!(
        app.engine.get_balance(&AccountId::Escrow(1)).await.unwrap(),
        1_000_000_000
    );

    let poller = app.poller.as_ref().unwrap();
    let report = poller.poll_once().await.unwrap();
    assert_eq!(report.delivered, 1);

    let row = app.outbox.get(1).await.unwrap().unwrap();
    assert_eq!(row.topic, "dev.escrow.deposit_confirmed");
}

#[tokio::test]
async fn test_no_poller_without_publisher() {
    let config = AppConfig::from_yaml(BASE).unwrap();
    assert!(App::build(&config).await.unwrap().poller.is_none());

    let mut enabled = config.clone();
    enabled.outbox.enabled = true;
    assert!(App::build(&enabled).await.unwrap().poller.is_none());
}
