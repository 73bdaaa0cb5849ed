//! The broadcast gateway: one WebSocket per observer.
//!
//! On upgrade each observer immediately receives an `init` event carrying
//! the full state, then every engine event as it is fanned out. Inbound
//! text frames are parsed into commands and forwarded to the engine;
//! malformed frames are dropped. An observer that lags behind the fan-out
//! is resynchronized with a fresh `init` snapshot instead of replaying the
//! missed updates.

use std::{
    future::{
        Future,
        IntoFuture as _,
    },
    net::SocketAddr,
};

use axum::{
    extract::{
        ws::{
            Message,
            WebSocket,
        },
        State,
        WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use eyre::{
    Result,
    WrapErr as _,
};
use futures::FutureExt as _;
use tokio::{
    select,
    sync::broadcast::error::RecvError,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    info,
    instrument,
};

use crate::{
    engine::{
        Command,
        Handle,
    },
    message::{
        Inbound,
        Outbound,
    },
};

pub(crate) async fn serve(
    listen_addr: SocketAddr,
    handle: Handle,
    shutdown_token: CancellationToken,
) -> Result<Serve> {
    let app = Router::new()
        .route("/", get(liveness))
        .route("/ws", get(upgrade_observer))
        .with_state(AppState {
            handle,
            shutdown_token: shutdown_token.clone(),
        });
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .wrap_err_with(|| format!("failed to bind `{listen_addr}`"))?;
    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_token.cancelled_owned());
    let local_addr = serve
        .local_addr()
        .wrap_err("bound TCP listener failed to report local addr")?;
    Ok(Serve {
        local_addr,
        fut: serve.into_future().boxed(),
    })
}

/// A wrapper of a type-erased [`axum::serve::Serve`] future.
pub(crate) struct Serve {
    local_addr: SocketAddr,
    fut: futures::future::BoxFuture<'static, std::io::Result<()>>,
}

impl Serve {
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Future for Serve {
    type Output = std::io::Result<()>;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        self.fut.as_mut().poll(cx)
    }
}

/// `AppState` is an axum extractor.
#[derive(Clone)]
struct AppState {
    handle: Handle,
    shutdown_token: CancellationToken,
}

async fn liveness() -> &'static str {
    "bidhall is running"
}

#[instrument(skip_all)]
async fn upgrade_observer(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_observer(socket, state.handle, state.shutdown_token))
}

#[instrument(skip_all)]
async fn serve_observer(mut socket: WebSocket, handle: Handle, shutdown_token: CancellationToken) {
    info!("observer connected");
    let mut events = handle.subscribe();
    if send_init(&mut socket, &handle).await.is_err() {
        return;
    }
    loop {
        select! {
            () = shutdown_token.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }

            frame = socket.recv() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if handle_frame(&text, &mut socket, &handle).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                // pings and pongs are answered by axum itself
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    debug!(%error, "observer connection errored");
                    break;
                }
            },

            event = events.recv() => match event {
                Ok(event) => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "observer lagged behind the fan-out; resynchronizing");
                    if send_init(&mut socket, &handle).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    info!("observer disconnected");
}

async fn handle_frame(
    text: &str,
    socket: &mut WebSocket,
    handle: &Handle,
) -> Result<(), axum::Error> {
    match serde_json::from_str::<Inbound>(text) {
        Ok(Inbound::RequestInit) => send_init(socket, handle).await,
        Ok(message) => {
            if let Some(command) = Command::from_wire(message) {
                handle.submit(command).await;
            }
            Ok(())
        }
        Err(error) => {
            debug!(%error, "dropping malformed observer frame");
            Ok(())
        }
    }
}

async fn send_init(socket: &mut WebSocket, handle: &Handle) -> Result<(), axum::Error> {
    let event = Outbound::Init {
        state: handle.snapshot(),
    };
    send_event(socket, &event).await
}

async fn send_event(socket: &mut WebSocket, event: &Outbound) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).expect("outbound events always serialize");
    socket.send(Message::Text(json)).await
}
