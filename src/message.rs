//! The observer wire protocol.
//!
//! Each observer holds one WebSocket connection. Text frames inbound are
//! commands; text frames outbound are events. Both sides are JSON with an
//! internal tag (`type` inbound, `event` outbound).
//!
//! Outbound `init` events carry the full state and must replace whatever
//! the receiver holds (sent on connect, on `request_init`, and on reset).
//! Outbound `update` events carry a patch of changed fields and must be
//! merged. This split is what lets a reconnecting observer resynchronize
//! while steady-state updates stay small.

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    catalog::Role,
    state::{
        StatePatch,
        StateSnapshot,
    },
};

/// A command submitted by an observer.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Inbound {
    /// Ask for a fresh full snapshot on this connection only.
    RequestInit,
    ToggleAutopilot,
    NextItem,
    StartClosing,
    TogglePause,
    PlaceBid { team: String, amount: f64 },
    SetBasePrice { price: f64 },
    AddItem {
        name: String,
        role: Role,
        country: String,
        base_price: f64,
    },
    MarkSold { team: String, price: f64 },
    MarkUnsold,
    RequeueItem { id: String },
    ReorderQueue { ids: Vec<String> },
    Reset,
}

/// An event fanned out to every connected observer.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Outbound {
    Init { state: StateSnapshot },
    Update { patch: StatePatch },
}
