use std::process::ExitCode;

use bidhall::{
    telemetry,
    BidHall,
    Config,
};
use eyre::eyre;
use tokio::{
    select,
    signal::unix::{
        signal,
        SignalKind,
    },
};
use tracing::{
    error,
    info,
    instrument,
    warn,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cfg: Config = match Config::get() {
        Err(err) => {
            eprintln!("failed to read configuration:\n{err:?}");
            return ExitCode::FAILURE;
        }
        Ok(cfg) => cfg,
    };

    if let Err(err) = telemetry::init(std::io::stdout, &cfg.log, cfg.force_stdout) {
        eprintln!("failed to setup telemetry:\n{err:?}");
        return ExitCode::FAILURE;
    }

    info!(
        config = serde_json::to_string(&cfg).expect("serializing to a string cannot fail"),
        "initializing bidhall"
    );

    let mut service = match BidHall::spawn(cfg) {
        Ok(service) => service,
        Err(error) => {
            error!(%error, "failed initializing bidhall");
            return ExitCode::FAILURE;
        }
    };

    let mut sigterm = signal(SignalKind::terminate())
        .expect("setting a SIGTERM listener should always work on Unix");

    let exit_reason = select! {
        _ = sigterm.recv() => Ok("received shutdown signal"),
        res = &mut service => {
            res.and_then(|()| Err(eyre!("bidhall task exited unexpectedly")))
        }
    };

    shutdown(exit_reason, service).await
}

#[instrument(skip_all)]
async fn shutdown(reason: eyre::Result<&'static str>, mut service: BidHall) -> ExitCode {
    let message = "shutting down";
    let exit_code = match reason {
        Ok(reason) => {
            info!(reason, message);
            if let Err(error) = service.shutdown().await {
                warn!(%error, "encountered errors during shutdown");
            };
            ExitCode::SUCCESS
        }
        Err(reason) => {
            error!(%reason, message);
            ExitCode::FAILURE
        }
    };
    info!("shutdown target reached");
    exit_code
}
