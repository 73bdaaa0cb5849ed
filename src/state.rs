//! The authoritative auction state and its wire projections.
//!
//! The engine task owns exactly one [`AuctionState`]. Observers never see
//! it directly; they receive [`StateSnapshot`]s (full state, sent on
//! connect and on reset) and [`StatePatch`]es (changed top-level fields
//! only, sent on every other mutation). A field absent from a patch means
//! "unchanged"; receivers merge patches but replace wholesale on snapshots.

use std::collections::VecDeque;

use serde::{
    Deserialize,
    Serialize,
};

use crate::catalog::Item;

/// The rolling event log keeps at most this many entries, newest first.
const MAX_LOG_ENTRIES: usize = 200;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogKind {
    Info,
    Sold,
    Unsold,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub kind: LogKind,
    pub message: String,
    pub at: jiff::Timestamp,
}

/// The record of a completed sale. Never mutated; only removed again if the
/// item is returned to the auction.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    #[serde(flatten)]
    pub item: Item,
    pub sold_price: f64,
    pub sold_to: String,
}

/// The single source of truth for everything broadcast to observers.
///
/// Invariants upheld by the engine:
/// - an item lives in exactly one of {queue, current_item, sold, unsold};
/// - `closing_countdown` and `autopilot_countdown` are never both live;
/// - `paused` freezes countdown decrements without cancelling them.
#[derive(Clone, Debug)]
pub struct AuctionState {
    pub queue: VecDeque<Item>,
    pub current_item: Option<Item>,
    pub current_bid: f64,
    pub current_leader: Option<String>,
    pub sold: Vec<LedgerEntry>,
    pub unsold: Vec<Item>,
    pub paused: bool,
    pub closing_countdown: Option<u8>,
    pub autopilot_countdown: Option<u32>,
    pub autopilot: bool,
    pub log: VecDeque<LogEntry>,
}

impl AuctionState {
    /// A fresh state holding `queue` and a single log line.
    pub fn new(queue: Vec<Item>, opening_log_message: &str) -> Self {
        let mut state = Self {
            queue: queue.into(),
            current_item: None,
            current_bid: 0.0,
            current_leader: None,
            sold: Vec::new(),
            unsold: Vec::new(),
            paused: false,
            closing_countdown: None,
            autopilot_countdown: None,
            autopilot: false,
            log: VecDeque::new(),
        };
        state.push_log(LogKind::Info, opening_log_message.to_string());
        state
    }

    /// Prepends an event record, truncating the log to its bound.
    pub fn push_log(&mut self, kind: LogKind, message: String) {
        self.log.push_front(LogEntry {
            kind,
            message,
            at: jiff::Timestamp::now(),
        });
        self.log.truncate(MAX_LOG_ENTRIES);
    }

    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            queue: self.queue.iter().cloned().collect(),
            current_item: self.current_item.clone(),
            current_bid: self.current_bid,
            current_leader: self.current_leader.clone(),
            sold: self.sold.clone(),
            unsold: self.unsold.clone(),
            paused: self.paused,
            closing_countdown: self.closing_countdown,
            autopilot_countdown: self.autopilot_countdown,
            autopilot: self.autopilot,
            log: self.log.iter().cloned().collect(),
        }
    }
}

/// The full wire shape of the auction state.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub queue: Vec<Item>,
    pub current_item: Option<Item>,
    pub current_bid: f64,
    pub current_leader: Option<String>,
    pub sold: Vec<LedgerEntry>,
    pub unsold: Vec<Item>,
    pub paused: bool,
    pub closing_countdown: Option<u8>,
    pub autopilot_countdown: Option<u32>,
    pub autopilot: bool,
    pub log: Vec<LogEntry>,
}

/// Changed top-level fields of the auction state.
///
/// Nullable fields are doubly optional: absent means unchanged, an explicit
/// `null` clears the field on the receiver.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<Vec<Item>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "explicit_null"
    )]
    pub current_item: Option<Option<Item>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_bid: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "explicit_null"
    )]
    pub current_leader: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sold: Option<Vec<LedgerEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsold: Option<Vec<Item>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "explicit_null"
    )]
    pub closing_countdown: Option<Option<u8>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "explicit_null"
    )]
    pub autopilot_countdown: Option<Option<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autopilot: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<Vec<LogEntry>>,
}

impl StatePatch {
    /// A patch carrying every field, used for all mutations that are not
    /// countdown ticks.
    #[must_use]
    pub fn full(snapshot: StateSnapshot) -> Self {
        Self {
            queue: Some(snapshot.queue),
            current_item: Some(snapshot.current_item),
            current_bid: Some(snapshot.current_bid),
            current_leader: Some(snapshot.current_leader),
            sold: Some(snapshot.sold),
            unsold: Some(snapshot.unsold),
            paused: Some(snapshot.paused),
            closing_countdown: Some(snapshot.closing_countdown),
            autopilot_countdown: Some(snapshot.autopilot_countdown),
            autopilot: Some(snapshot.autopilot),
            log: Some(snapshot.log),
        }
    }

    #[must_use]
    pub fn closing_countdown(value: Option<u8>) -> Self {
        Self {
            closing_countdown: Some(value),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn autopilot_countdown(value: Option<u32>) -> Self {
        Self {
            autopilot_countdown: Some(value),
            ..Self::default()
        }
    }
}

/// Keeps an explicit `null` distinguishable from an absent field when
/// deserializing a doubly optional patch field.
fn explicit_null<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
