use std::time::Duration;

use bidhall::message::Outbound;

use crate::helpers::{
    catalog_json,
    spawn_auction,
    submit_frame,
    wait_for,
};

#[tokio::test(start_paused = true)]
async fn manual_round_over_the_wire() {
    let mut auction = spawn_auction(&catalog_json(&[("a", 2.0), ("b", 3.0)]));

    submit_frame(&auction, r#"{"type":"next_item"}"#).await;
    let state = wait_for(&mut auction, "first item on the floor", |state| {
        state.current_item.is_some()
    })
    .await;
    assert_eq!(state.current_item.as_ref().unwrap().id, "a");
    assert_eq!(state.current_bid, 2.0);

    submit_frame(
        &auction,
        r#"{"type":"place_bid","team":"T1","amount":2.5}"#,
    ).await;
    let state = wait_for(&mut auction, "bid applied", |state| {
        state.current_leader.as_deref() == Some("T1")
    })
    .await;
    assert_eq!(state.current_bid, 2.5);

    submit_frame(&auction, r#"{"type":"mark_sold","team":"T1","price":2.5}"#).await;
    let state = wait_for(&mut auction, "first item sold", |state| !state.sold.is_empty()).await;
    assert_eq!(state.sold[0].item.id, "a");
    assert_eq!(state.sold[0].sold_to, "T1");
    assert_eq!(state.sold[0].sold_price, 2.5);
    assert!(state.current_item.is_none());

    submit_frame(&auction, r#"{"type":"next_item"}"#).await;
    let state = wait_for(&mut auction, "second item on the floor", |state| {
        state.current_item.is_some()
    })
    .await;
    assert_eq!(state.current_item.as_ref().unwrap().id, "b");

    submit_frame(&auction, r#"{"type":"mark_unsold"}"#).await;
    let state = wait_for(&mut auction, "second item unsold", |state| {
        !state.unsold.is_empty()
    })
    .await;
    assert_eq!(state.unsold[0].id, "b");

    submit_frame(&auction, r#"{"type":"requeue_item","id":"b"}"#).await;
    let state = wait_for(&mut auction, "unsold item back in the queue", |state| {
        state.unsold.is_empty()
    })
    .await;
    assert_eq!(state.queue.first().unwrap().id, "b");
}

#[tokio::test(start_paused = true)]
async fn reset_frame_rebroadcasts_init_with_a_fresh_queue() {
    let mut auction = spawn_auction(&catalog_json(&[("a", 2.0), ("b", 3.0)]));

    submit_frame(&auction, r#"{"type":"next_item"}"#).await;
    submit_frame(
        &auction,
        r#"{"type":"place_bid","team":"T1","amount":5.0}"#,
    ).await;
    wait_for(&mut auction, "bid applied", |state| {
        state.current_leader.is_some()
    })
    .await;

    submit_frame(&auction, r#"{"type":"reset"}"#).await;
    let state = tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            match auction.events.recv().await.unwrap() {
                Outbound::Init {
                    state,
                } => break state,
                Outbound::Update {
                    ..
                } => {}
            }
        }
    })
    .await
    .expect("reset must be broadcast as an init event");

    assert!(state.current_item.is_none());
    assert!(state.current_leader.is_none());
    assert_eq!(state.current_bid, 0.0);
    assert_eq!(state.queue.len(), 2);
    assert!(state.sold.is_empty());
    assert!(state.unsold.is_empty());
}

#[tokio::test(start_paused = true)]
async fn pause_frame_freezes_the_autopilot_countdown() {
    let mut auction = spawn_auction(&catalog_json(&[("a", 2.0)]));

    submit_frame(&auction, r#"{"type":"toggle_autopilot"}"#).await;
    wait_for(&mut auction, "autopilot pulled the first item", |state| {
        state.autopilot && state.current_item.is_some() && state.autopilot_countdown.is_some()
    })
    .await;

    submit_frame(&auction, r#"{"type":"toggle_pause"}"#).await;
    let state = wait_for(&mut auction, "auction paused", |state| state.paused).await;
    let frozen = state.autopilot_countdown.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    let state = auction.handle.snapshot();
    assert_eq!(state.autopilot_countdown, Some(frozen));

    submit_frame(&auction, r#"{"type":"toggle_pause"}"#).await;
    let state = wait_for(&mut auction, "countdown running again", |state| {
        !state.paused && state.autopilot_countdown != Some(frozen)
    })
    .await;
    assert!(state.autopilot_countdown.unwrap() < frozen);
}

#[tokio::test(start_paused = true)]
async fn closing_frame_resolves_for_the_leader() {
    let mut auction = spawn_auction(&catalog_json(&[("a", 2.0)]));

    submit_frame(&auction, r#"{"type":"next_item"}"#).await;
    submit_frame(
        &auction,
        r#"{"type":"place_bid","team":"T2","amount":4.0}"#,
    ).await;
    wait_for(&mut auction, "bid applied", |state| {
        state.current_leader.is_some()
    })
    .await;

    submit_frame(&auction, r#"{"type":"start_closing"}"#).await;
    let state = wait_for(&mut auction, "leader wins on expiry", |state| {
        !state.sold.is_empty()
    })
    .await;
    assert_eq!(state.sold[0].sold_to, "T2");
    assert_eq!(state.sold[0].sold_price, 4.0);
    assert!(state.closing_countdown.is_none());
}
