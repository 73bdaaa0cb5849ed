//! The auction coordination engine.
//!
//! One task owns the authoritative [`AuctionState`] and is the only writer.
//! Its inputs are strictly interleaved, never concurrent: commands arriving
//! on an mpsc channel (in arrival order, last bid wins), a one second tick
//! driving both countdowns, and an armed auto-advance deadline (the settle
//! delay between an autopilot resolution and the next item). Every input is
//! handled as one atomic step, so no observer ever sees a torn state.
//!
//! # Countdown model
//!
//! Two countdown kinds exist per round and are never both live:
//!
//! - the *closing* countdown (3 ticks, armed manually once a leader
//!   exists) locks bidding and resolves in favor of the leader;
//! - the *autopilot* countdown (60 ticks, armed on round start while
//!   autopilot is enabled) re-arms to its full value on every accepted
//!   bid, so active bidding keeps the round alive; on expiry it resolves
//!   with whatever leader is set, possibly none.
//!
//! Pausing freezes decrements without cancelling either countdown.
//!
//! # Stale timer protection
//!
//! Every round start and resolution bumps a monotonic round epoch. The
//! scheduled auto-advance captures the epoch at schedule time and is
//! discarded if the epoch moved on, making cancellation ordering
//! independent of which input fired first.

use std::{
    collections::{
        HashMap,
        HashSet,
    },
    time::Duration,
};

use eyre::Result;
use tokio::{
    select,
    sync::{
        broadcast,
        mpsc,
        watch,
    },
    time::{
        interval_at,
        Instant,
        MissedTickBehavior,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    info,
    instrument,
    warn,
};

use crate::{
    catalog::{
        Catalog,
        Item,
        Role,
    },
    message::{
        Inbound,
        Outbound,
    },
    state::{
        AuctionState,
        LedgerEntry,
        LogKind,
        StatePatch,
        StateSnapshot,
    },
};


/// Ticks on the manual closing countdown.
pub const CLOSING_COUNTDOWN_START: u8 = 3;
/// Ticks on the autopilot countdown; re-armed to this value on every bid.
pub const AUTOPILOT_COUNTDOWN_START: u32 = 60;
/// Delay between an autopilot resolution and pulling the next item, so
/// observers perceive the outcome before it is replaced.
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

const TICK: Duration = Duration::from_secs(1);
const COMMAND_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 64;

/// A state-mutating operation submitted by an observer.
#[derive(Clone, Debug)]
pub enum Command {
    Advance,
    PlaceBid { team: String, amount: f64 },
    StartClosing,
    TogglePause,
    ToggleAutopilot,
    SetBasePrice { price: f64 },
    AddItem {
        name: String,
        role: Role,
        country: String,
        base_price: f64,
    },
    MarkSold { team: String, price: f64 },
    MarkUnsold,
    Requeue { id: String },
    Reorder { ids: Vec<String> },
    Reset,
}

impl Command {
    /// Maps a wire message to an engine command. `request_init` is answered
    /// by the gateway from its snapshot channel and never reaches the
    /// engine, hence `None`.
    #[must_use]
    pub fn from_wire(message: Inbound) -> Option<Self> {
        match message {
            Inbound::RequestInit => None,
            Inbound::ToggleAutopilot => Some(Self::ToggleAutopilot),
            Inbound::NextItem => Some(Self::Advance),
            Inbound::StartClosing => Some(Self::StartClosing),
            Inbound::TogglePause => Some(Self::TogglePause),
            Inbound::PlaceBid {
                team,
                amount,
            } => Some(Self::PlaceBid {
                team,
                amount,
            }),
            Inbound::SetBasePrice {
                price,
            } => Some(Self::SetBasePrice {
                price,
            }),
            Inbound::AddItem {
                name,
                role,
                country,
                base_price,
            } => Some(Self::AddItem {
                name,
                role,
                country,
                base_price,
            }),
            Inbound::MarkSold {
                team,
                price,
            } => Some(Self::MarkSold {
                team,
                price,
            }),
            Inbound::MarkUnsold => Some(Self::MarkUnsold),
            Inbound::RequeueItem {
                id,
            } => Some(Self::Requeue {
                id,
            }),
            Inbound::ReorderQueue {
                ids,
            } => Some(Self::Reorder {
                ids,
            }),
            Inbound::Reset => Some(Self::Reset),
        }
    }
}

/// How the current round is being ended.
enum Outcome {
    /// A countdown expired; the winner is whoever leads, possibly nobody.
    TimerExpired,
    /// Explicit manual sale with an override team and price.
    Sold { team: String, price: f64 },
    /// Explicit manual unsold, regardless of any leader.
    Unsold,
}

/// A cheaply clonable handle used by the gateway (and tests) to drive the
/// engine and observe its output.
#[derive(Clone)]
pub struct Handle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<StateSnapshot>,
    events: broadcast::Sender<Outbound>,
}

impl Handle {
    /// Submits a command, waiting for channel capacity while the engine is
    /// busy so that commands are applied in arrival order even under load.
    /// A command is dropped (with a warning) only if the engine is gone.
    pub async fn submit(&self, command: Command) {
        if let Err(error) = self.commands.send(command).await {
            warn!(%error, "dropping command; the engine is gone");
        }
    }

    /// The latest full state snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        self.state.borrow().clone()
    }

    /// Subscribes to the outbound event fan-out.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.events.subscribe()
    }
}

struct ScheduledAdvance {
    at: Instant,
    epoch: u64,
}

/// The engine actor. Constructed once at startup, consumed by [`Engine::run`].
pub struct Engine {
    catalog: Catalog,
    state: AuctionState,
    round_epoch: u64,
    auto_advance: Option<ScheduledAdvance>,
    commands: mpsc::Receiver<Command>,
    state_tx: watch::Sender<StateSnapshot>,
    events: broadcast::Sender<Outbound>,
    shutdown_token: CancellationToken,
}

impl Engine {
    /// Builds the engine with a freshly shuffled queue from `catalog`.
    #[must_use]
    pub fn new(catalog: Catalog, shutdown_token: CancellationToken) -> (Self, Handle) {
        let queue = catalog.build_queue(&mut rand::thread_rng());
        let state = AuctionState::new(queue, "server started");
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(state.snapshot());
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let handle = Handle {
            commands: command_tx,
            state: state_rx,
            events: event_tx.clone(),
        };
        let engine = Self {
            catalog,
            state,
            round_epoch: 0,
            auto_advance: None,
            commands: command_rx,
            state_tx,
            events: event_tx,
            shutdown_token,
        };
        (engine, handle)
    }

    /// Runs the engine until shut down or until all command handles are
    /// dropped.
    #[instrument(skip_all)]
    pub async fn run(mut self) -> Result<()> {
        let mut tick = interval_at(Instant::now() + TICK, TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            let advance_deadline = self.auto_advance.as_ref().map(|scheduled| scheduled.at);
            select! {
                biased;

                () = self.shutdown_token.clone().cancelled_owned() => {
                    break "received shutdown signal";
                }

                () = deadline(advance_deadline), if advance_deadline.is_some() => {
                    self.fire_auto_advance();
                }

                _ = tick.tick() => self.handle_tick(),

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break "all command handles dropped",
                },
            }
        };

        info!(reason, "engine exiting");
        Ok(())
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Advance => self.advance_queue(),
            Command::PlaceBid {
                team,
                amount,
            } => self.apply_bid(team, amount),
            Command::StartClosing => self.start_closing(),
            Command::TogglePause => self.toggle_pause(),
            Command::ToggleAutopilot => self.toggle_autopilot(),
            Command::SetBasePrice {
                price,
            } => self.set_base_price(price),
            Command::AddItem {
                name,
                role,
                country,
                base_price,
            } => self.add_item(name, role, country, base_price),
            Command::MarkSold {
                team,
                price,
            } => self.resolve_round(Outcome::Sold {
                team,
                price,
            }),
            Command::MarkUnsold => self.resolve_round(Outcome::Unsold),
            Command::Requeue {
                id,
            } => self.requeue(&id),
            Command::Reorder {
                ids,
            } => self.reorder_queue(ids),
            Command::Reset => self.reset(),
        }
    }

    /// Decrements whichever countdown is live. Skipped entirely while
    /// paused: the displayed value freezes but the timer survives.
    fn handle_tick(&mut self) {
        if self.state.paused {
            return;
        }
        if let Some(remaining) = self.state.closing_countdown {
            let remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                self.state.closing_countdown = None;
                self.resolve_round(Outcome::TimerExpired);
            } else {
                self.state.closing_countdown = Some(remaining);
                self.broadcast_patch(StatePatch::closing_countdown(Some(remaining)));
            }
            return;
        }
        if let Some(remaining) = self.state.autopilot_countdown {
            let remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                self.state.autopilot_countdown = None;
                self.resolve_round(Outcome::TimerExpired);
            } else {
                self.state.autopilot_countdown = Some(remaining);
                self.broadcast_patch(StatePatch::autopilot_countdown(Some(remaining)));
            }
        }
    }

    fn fire_auto_advance(&mut self) {
        let Some(scheduled) = self.auto_advance.take() else {
            return;
        };
        if scheduled.epoch != self.round_epoch {
            debug!(
                scheduled_epoch = scheduled.epoch,
                current_epoch = self.round_epoch,
                "discarding auto-advance scheduled for a superseded round",
            );
            return;
        }
        self.advance_queue();
    }

    /// Ends the current round per `outcome`, cancels all round timers, and
    /// (while autopilot is on) schedules the settle-delayed advance.
    fn resolve_round(&mut self, outcome: Outcome) {
        let Some(item) = self.state.current_item.take() else {
            debug!("ignoring resolution; no item is up for auction");
            return;
        };
        self.round_epoch = self.round_epoch.wrapping_add(1);
        self.auto_advance = None;

        let timer_driven = matches!(outcome, Outcome::TimerExpired);
        let prefix = if timer_driven { "[auto] " } else { "" };
        let sale = match outcome {
            Outcome::Sold {
                team,
                price,
            } => Some((team, price)),
            Outcome::Unsold => None,
            Outcome::TimerExpired => self
                .state
                .current_leader
                .clone()
                .map(|team| (team, self.state.current_bid)),
        };
        match sale {
            Some((team, price)) => {
                self.state.push_log(
                    LogKind::Sold,
                    format!("{prefix}{} sold to {team} for {price}", item.name),
                );
                self.state.sold.push(LedgerEntry {
                    item,
                    sold_price: price,
                    sold_to: team,
                });
            }
            None => {
                self.state
                    .push_log(LogKind::Unsold, format!("{prefix}{} went unsold", item.name));
                self.state.unsold.push(item);
            }
        }
        self.state.current_leader = None;
        self.state.current_bid = 0.0;
        self.state.closing_countdown = None;
        self.state.autopilot_countdown = None;
        self.broadcast_full();

        if self.state.autopilot {
            self.auto_advance = Some(ScheduledAdvance {
                at: Instant::now() + SETTLE_DELAY,
                epoch: self.round_epoch,
            });
        }
    }

    /// Pulls the next item from the queue, or goes idle if it is empty.
    fn advance_queue(&mut self) {
        self.round_epoch = self.round_epoch.wrapping_add(1);
        self.auto_advance = None;

        // An unresolved current item must not be orphaned by a manual
        // advance; it goes to the unsold pool where it can be re-queued.
        if let Some(item) = self.state.current_item.take() {
            self.state
                .push_log(LogKind::Unsold, format!("{} went unsold", item.name));
            self.state.unsold.push(item);
        }

        self.state.current_leader = None;
        self.state.closing_countdown = None;
        match self.state.queue.pop_front() {
            Some(item) => {
                self.state.current_bid = item.base_price;
                self.state.current_item = Some(item);
                self.state.paused = false;
                self.state.autopilot_countdown = self
                    .state
                    .autopilot
                    .then_some(AUTOPILOT_COUNTDOWN_START);
            }
            None => {
                self.state.current_bid = 0.0;
                self.state.autopilot_countdown = None;
                self.state
                    .push_log(LogKind::Info, "auction completed".to_string());
            }
        }
        self.broadcast_full();
    }

    /// The single entry point applying a bid. Last write wins; increment
    /// and affordability checks are a presentation concern applied before
    /// submission.
    fn apply_bid(&mut self, team: String, amount: f64) {
        if self.state.current_item.is_none() {
            debug!("rejecting bid; no item is up for auction");
            return;
        }
        if self.state.paused {
            debug!("rejecting bid; the auction is paused");
            return;
        }
        if self.state.closing_countdown.is_some() {
            debug!("rejecting bid; bidding is locked while the closing countdown runs");
            return;
        }
        self.state.current_bid = amount;
        self.state.current_leader = Some(team);
        if self.state.autopilot && self.state.autopilot_countdown.is_some() {
            // active bidding keeps the round alive under autopilot
            self.state.autopilot_countdown = Some(AUTOPILOT_COUNTDOWN_START);
        }
        self.broadcast_full();
    }

    fn start_closing(&mut self) {
        if self.state.current_item.is_none() || self.state.current_leader.is_none() {
            debug!("not starting closing countdown; no leading bid to close on");
            return;
        }
        if self.state.closing_countdown.is_some() {
            debug!("not starting closing countdown; one is already running");
            return;
        }
        if self.state.paused {
            debug!("not starting closing countdown; the auction is paused");
            return;
        }
        // The closing fuse preempts the autopilot fuse; only one countdown
        // may ever be live for a round.
        self.state.autopilot_countdown = None;
        self.state.closing_countdown = Some(CLOSING_COUNTDOWN_START);
        self.broadcast_full();
    }

    fn toggle_pause(&mut self) {
        self.state.paused = !self.state.paused;
        self.broadcast_full();
    }

    fn toggle_autopilot(&mut self) {
        self.state.autopilot = !self.state.autopilot;
        let message = if self.state.autopilot {
            "autopilot enabled"
        } else {
            "manual mode enabled"
        };
        self.state.push_log(LogKind::Info, message.to_string());

        if self.state.autopilot {
            if self.state.current_item.is_some() {
                if self.state.autopilot_countdown.is_none()
                    && self.state.closing_countdown.is_none()
                {
                    self.state.autopilot_countdown = Some(AUTOPILOT_COUNTDOWN_START);
                }
                self.broadcast_full();
            } else {
                self.advance_queue();
            }
        } else {
            self.state.autopilot_countdown = None;
            self.auto_advance = None;
            self.broadcast_full();
        }
    }

    fn set_base_price(&mut self, price: f64) {
        let Some(item) = self.state.current_item.as_mut() else {
            debug!("ignoring base price edit; no item is up for auction");
            return;
        };
        item.base_price = price;
        if self.state.current_leader.is_none() {
            // the opening ask moves with the base price until someone bids
            self.state.current_bid = price;
        }
        self.broadcast_full();
    }

    fn add_item(&mut self, name: String, role: Role, country: String, base_price: f64) {
        let item = Item::wildcard(name, role, country, base_price);
        self.state
            .push_log(LogKind::Info, format!("new item added: {}", item.name));
        self.state.queue.push_front(item);
        self.broadcast_full();
    }

    fn requeue(&mut self, id: &str) {
        let Some(position) = self.state.unsold.iter().position(|item| item.id == id) else {
            warn!(id, "ignoring request to requeue an unknown unsold item");
            return;
        };
        let item = self.state.unsold.remove(position);
        self.state
            .push_log(LogKind::Info, format!("{} returned to auction", item.name));
        self.state.queue.push_front(item);
        self.broadcast_full();
    }

    /// Replaces the queue order. Requests that are not a permutation of the
    /// current queue ids are rejected outright so a buggy or malicious
    /// caller cannot drop or invent items.
    fn reorder_queue(&mut self, ids: Vec<String>) {
        if ids.len() != self.state.queue.len() {
            warn!(
                got = ids.len(),
                expected = self.state.queue.len(),
                "rejecting reorder; id count does not match the queue",
            );
            return;
        }
        let current: HashSet<&str> = self.state.queue.iter().map(|item| item.id.as_str()).collect();
        let unique: HashSet<&str> = ids.iter().map(String::as_str).collect();
        if unique.len() != ids.len() || !unique.is_subset(&current) {
            warn!("rejecting reorder; ids are not a permutation of the queue");
            return;
        }
        let mut by_id: HashMap<String, Item> = self
            .state
            .queue
            .drain(..)
            .map(|item| (item.id.clone(), item))
            .collect();
        self.state.queue = ids
            .iter()
            .map(|id| {
                by_id
                    .remove(id)
                    .expect("ids were validated as a permutation of the queue")
            })
            .collect();
        self.broadcast_full();
    }

    /// Replaces the entire state with a fresh singleton over a newly
    /// shuffled catalog and broadcasts it as an init event so observers
    /// resynchronize instead of merging.
    fn reset(&mut self) {
        self.round_epoch = self.round_epoch.wrapping_add(1);
        self.auto_advance = None;
        let queue = self.catalog.build_queue(&mut rand::thread_rng());
        self.state = AuctionState::new(queue, "auction reset");
        self.broadcast_init();
    }

    fn broadcast_full(&self) {
        let snapshot = self.state.snapshot();
        self.state_tx.send_replace(snapshot.clone());
        let _ = self.events.send(Outbound::Update {
            patch: StatePatch::full(snapshot),
        });
    }

    fn broadcast_patch(&self, patch: StatePatch) {
        self.state_tx.send_replace(self.state.snapshot());
        let _ = self.events.send(Outbound::Update {
            patch,
        });
    }

    fn broadcast_init(&self) {
        let snapshot = self.state.snapshot();
        self.state_tx.send_replace(snapshot.clone());
        let _ = self.events.send(Outbound::Init {
            state: snapshot,
        });
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
