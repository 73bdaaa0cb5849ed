//! bidhall runs a live, multi-party player auction.
//!
//! One controller drives a queue of items through bidding rounds while
//! many team bidders submit competing bids, all observing a single
//! authoritative state broadcast over per-observer WebSocket connections.
//!
//! # How a round works
//!
//! Advancing the queue puts the next item on the floor with its base
//! price as the opening ask. Bids overwrite the current bid and leader,
//! last write wins. The round ends either manually (sold/unsold
//! commands), via the short closing countdown once a leader exists, or
//! via the long autopilot countdown when the floor runs unattended.
//! Resolution moves the item into the sold ledger or the unsold pool and,
//! under autopilot, pulls the next item after a short settle delay.
//!
//! # Consistency model
//!
//! All state mutation is serialized through a single engine task; timer
//! ticks and inbound commands are interleaved, never concurrent, so every
//! broadcast is a consistent snapshot or patch of the state. Concurrent
//! bids are resolved purely by arrival order at the server.

use std::{
    future::Future,
    task::Poll,
    time::Duration,
};

mod api;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod message;
pub mod state;
pub mod telemetry;

use eyre::{
    eyre,
    Result,
    WrapErr as _,
};
pub use config::Config;
use tokio::{
    task::{
        JoinError,
        JoinHandle,
    },
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    error,
    info,
    instrument,
    warn,
};

use crate::{
    catalog::Catalog,
    engine::{
        Engine,
        Handle,
    },
};

/// The [`BidHall`] service returned by [`BidHall::spawn`].
pub struct BidHall {
    shutdown_token: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

impl BidHall {
    /// Spawns the [`BidHall`] service.
    ///
    /// # Errors
    /// Returns an error if the catalog cannot be loaded.
    pub fn spawn(cfg: Config) -> Result<Self> {
        let catalog = if cfg.catalog_path.is_empty() {
            Catalog::demo()
        } else {
            Catalog::load(&cfg.catalog_path).wrap_err("failed loading the item catalog")?
        };
        let shutdown_token = CancellationToken::new();
        let (engine, handle) = Engine::new(catalog, shutdown_token.child_token());
        // run holds the root token and cancels it when any subtask exits
        let task = tokio::spawn(run(cfg, engine, handle, shutdown_token.clone()));
        Ok(Self {
            shutdown_token,
            task: Some(task),
        })
    }

    /// Shuts down the service, waiting for its engine and gateway to stop.
    ///
    /// # Errors
    /// Returns an error if an error occured during shutdown.
    ///
    /// # Panics
    /// Panics if called twice.
    #[instrument(skip_all, err)]
    pub async fn shutdown(&mut self) -> Result<()> {
        self.shutdown_token.cancel();
        flatten_join_result(
            self.task
                .take()
                .expect("shutdown must not be called twice")
                .await,
        )
    }
}

impl Future for BidHall {
    type Output = Result<()>;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Self::Output> {
        use futures::future::FutureExt as _;

        let task = self
            .task
            .as_mut()
            .expect("bidhall must not be polled after shutdown");
        task.poll_unpin(cx).map(flatten_join_result)
    }
}

/// How long each subtask gets to finish after cancellation before it is
/// aborted. Kubernetes issues a SIGKILL after 30 seconds.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(25);

async fn run(
    cfg: Config,
    engine: Engine,
    handle: Handle,
    shutdown_token: CancellationToken,
) -> Result<()> {
    let server = api::serve(cfg.api_listen_addr, handle, shutdown_token.child_token())
        .await
        .wrap_err("failed starting the observer gateway")?;
    info!(listen_addr = %server.local_addr(), "observer gateway listening");

    let mut engine_task = tokio::spawn(engine.run());
    let mut server_task =
        tokio::spawn(async move { server.await.wrap_err("observer gateway failed") });

    let (result, engine_task, server_task) = tokio::select! {
        biased;

        () = shutdown_token.cancelled() => (
            Ok("received shutdown signal"),
            Some(engine_task),
            Some(server_task),
        ),

        res = &mut engine_task => (
            flatten_join_result(res)
                .and_then(|()| Err(eyre!("engine task exited unexpectedly"))),
            None,
            Some(server_task),
        ),

        res = &mut server_task => (
            flatten_join_result(res)
                .and_then(|()| Err(eyre!("observer gateway exited unexpectedly"))),
            Some(engine_task),
            None,
        ),
    };
    shutdown_token.cancel();

    match &result {
        Ok(reason) => info!(reason, "shutting down"),
        Err(error) => error!(%error, "shutting down"),
    }
    wind_down("engine", engine_task).await;
    wind_down("observer gateway", server_task).await;
    result.map(|_| ())
}

/// Joins an already-cancelled subtask, aborting it if it overstays the
/// grace period.
async fn wind_down(name: &'static str, task: Option<JoinHandle<Result<()>>>) {
    let Some(mut task) = task else {
        info!(task = name, "task had already exited");
        return;
    };
    match timeout(SHUTDOWN_GRACE_PERIOD, &mut task)
        .await
        .map(flatten_join_result)
    {
        Ok(Ok(())) => info!(task = name, "task exited gracefully"),
        Ok(Err(error)) => warn!(task = name, %error, "task exited with an error"),
        Err(_) => {
            error!(
                task = name,
                timeout_secs = SHUTDOWN_GRACE_PERIOD.as_secs(),
                "task did not shut down within the grace period; killing it"
            );
            task.abort();
        }
    }
}

fn flatten_join_result<T>(res: Result<Result<T>, JoinError>) -> Result<T> {
    match res {
        Ok(Ok(val)) => Ok(val),
        Ok(Err(err)) => Err(err).wrap_err("task returned with error"),
        Err(err) => Err(err).wrap_err("task panicked"),
    }
}
