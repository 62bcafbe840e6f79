use crate::cli::ServeArgs;
use crate::infra::build_context;
use crate::routes::router;
use charge_optimizer::config::{AppConfig, ConfigError, OptimizerConfig};
use charge_optimizer::error::AppError;
use charge_optimizer::optimizer::OrchestrationLoop;
use charge_optimizer::telemetry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let optimizer = match OptimizerConfig::load() {
        Ok(optimizer) => optimizer,
        Err(err @ ConfigError::NoVehicles) => {
            error!(error = %err, "no vehicles configured, refusing to start");
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };
    let context = build_context(&optimizer)?;

    let shutdown = CancellationToken::new();
    let engine = tokio::spawn(OrchestrationLoop::new(context, shutdown.clone()).run());

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(
        ?config.environment,
        %addr,
        vehicles = optimizer.vehicles.len(),
        "charge optimizer ready"
    );

    let signal = shutdown.clone();
    axum::serve(listener, router())
        .with_graceful_shutdown(async move {
            wait_for_signal(signal).await;
        })
        .await?;

    shutdown.cancel();
    if let Err(err) = engine.await {
        warn!(error = %err, "orchestration loop ended abnormally");
    }
    info!("charge optimizer stopped");
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!(error = %err, "unable to listen for shutdown signal");
            }
            info!("shutdown requested");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }
}
