use std::time::Duration;

use bidhall::{
    catalog::Catalog,
    engine::{
        Command,
        Engine,
        Handle,
    },
    message::{
        Inbound,
        Outbound,
    },
    state::StateSnapshot,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub(crate) struct TestAuction {
    pub(crate) handle: Handle,
    pub(crate) events: broadcast::Receiver<Outbound>,
    shutdown_token: CancellationToken,
}

impl Drop for TestAuction {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

/// Spawns an engine over `catalog_json` with the event fan-out subscribed
/// before any command can be submitted.
pub(crate) fn spawn_auction(catalog_json: &str) -> TestAuction {
    let catalog = Catalog::from_json(catalog_json).expect("test catalogs are valid JSON");
    let shutdown_token = CancellationToken::new();
    let (engine, handle) = Engine::new(catalog, shutdown_token.child_token());
    let events = handle.subscribe();
    tokio::spawn(engine.run());
    TestAuction {
        handle,
        events,
        shutdown_token,
    }
}

/// Parses a wire frame exactly like the gateway does and submits the
/// resulting command to the engine.
pub(crate) async fn submit_frame(auction: &TestAuction, frame: &str) {
    let message: Inbound = serde_json::from_str(frame).expect("test frames are valid commands");
    if let Some(command) = Command::from_wire(message) {
        auction.handle.submit(command).await;
    }
}

/// Awaits engine events until the state satisfies `predicate`, panicking
/// after a generous virtual-time deadline.
pub(crate) async fn wait_for(
    auction: &mut TestAuction,
    description: &str,
    predicate: impl Fn(&StateSnapshot) -> bool,
) -> StateSnapshot {
    let deadline = Duration::from_secs(600);
    let TestAuction {
        handle,
        events,
        ..
    } = auction;
    tokio::time::timeout(deadline, async {
        loop {
            let snapshot = handle.snapshot();
            if predicate(&snapshot) {
                break snapshot;
            }
            let _ = events.recv().await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for: {description}"))
}

/// A catalog of single-item groups so queue order is the group order.
pub(crate) fn catalog_json(items: &[(&str, f64)]) -> String {
    let groups: Vec<serde_json::Value> = items
        .iter()
        .map(|(id, base_price)| {
            serde_json::json!({
                "id": format!("G-{id}"),
                "name": format!("Group {id}"),
                "items": [{
                    "id": id,
                    "name": id.to_uppercase(),
                    "role": "batter",
                    "country": "IN",
                    "basePrice": base_price,
                }],
            })
        })
        .collect();
    serde_json::Value::Array(groups).to_string()
}
