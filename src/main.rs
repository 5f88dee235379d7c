use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tx_submitter::{
    BatchMode, BatchOrchestrator, Config, StopSignal,
    config::ModeKind,
    service::{LocalPxe, PxeService},
};

/// Entry point of the submitter harness.
///
/// Loads the configuration, runs one batch against the in-process service,
/// optionally waits for every submitted transaction to settle, and logs a
/// JSON summary. Ctrl-C interrupts the running batch.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/default.toml".to_string());
    let config = Config::load(&path)?;
    info!("Submitter starting with config: {:?}", config);

    let pxe = Arc::new(LocalPxe::new(config.local.clone()));
    let mode = match config.run.mode {
        ModeKind::Deployments => BatchMode::Deployments,
        ModeKind::Calls => {
            let calls = config
                .calls
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("calls mode requires a [calls] section"))?;
            pxe.deploy_contract(calls.address).await;
            BatchMode::Calls {
                context: calls.context(),
                seed: calls.seed,
            }
        }
    };

    let service: Arc<dyn PxeService> = pxe;
    let orchestrator = BatchOrchestrator::new(service, config.batch.clone(), config.deployment);

    let (stop, signal) = StopSignal::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, interrupting batch");
            stop.interrupt("interrupted by Ctrl-C");
        }
    });

    let batch = orchestrator
        .submit_batch_until(config.run.count, mode, signal)
        .await?;

    if config.settlement.wait {
        let timeout = Duration::from_millis(config.settlement.timeout_ms);
        let interval = Duration::from_millis(config.settlement.poll_interval_ms);
        for sent in batch.handles() {
            match orchestrator
                .submitter()
                .wait_for_settlement(sent, timeout, interval)
                .await
            {
                Ok(receipt) => info!("Tx {:?} settled as {}", sent.hash, receipt.status),
                Err(e) => warn!("Tx {:?} did not settle: {}", sent.hash, e),
            }
        }
    }

    info!("Batch summary: {}", serde_json::to_string(&batch.summary())?);
    Ok(())
}
