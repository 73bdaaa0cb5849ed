use std::time::Duration;

use bidhall::{
    BidHall,
    Config,
};

fn config() -> Config {
    Config {
        api_listen_addr: "127.0.0.1:0".parse().unwrap(),
        catalog_path: String::new(),
        log: "bidhall=debug".to_string(),
        force_stdout: false,
    }
}

#[tokio::test]
async fn shutdown_joins_both_subtasks_within_the_grace_period() {
    let mut service = BidHall::spawn(config()).unwrap();
    // let the gateway bind and the engine start before tearing down
    tokio::time::sleep(Duration::from_millis(100)).await;

    tokio::time::timeout(Duration::from_secs(10), service.shutdown())
        .await
        .expect("shutdown must complete within the grace period")
        .expect("a signal-driven shutdown must report success");
}
