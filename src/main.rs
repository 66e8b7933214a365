use std::sync::Arc;

use anyhow::Context;
use grindstone::config::{Config, DeviceSelection};
use grindstone::getwork::GetworkClient;
use grindstone::health::HealthChecker;
use grindstone::metrics::MetricsCollector;
use grindstone::miner::Miner;
use grindstone::report::HashRateMonitor;
use grindstone::server::HealthServer;
use grindstone::worker::ComputeDevice;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

// The blocking HTTP client must not live inside an async context, so the
// runtime is only built for the health server.
fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    config.validate()?;
    grindstone::logging::init(&config.log_level)?;

    info!(
        url = %config.work_url,
        intensity = config.intensity,
        device_type = ?config.device_type,
        "starting grindstone"
    );

    let source = Arc::new(
        GetworkClient::new(&config.work_url, &config.work_user_agent, config.get_refresh_interval())
            .context("building work source client")?,
    );
    let metrics = Arc::new(MetricsCollector::new());

    let server_shutdown = CancellationToken::new();
    let _runtime = if config.metrics_enabled {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("health")
            .enable_all()
            .build()?;
        let checker = Arc::new(HealthChecker::new(metrics.clone(), config.clone()));
        let server = HealthServer::new(checker, config.health_port);
        let shutdown = server_shutdown.clone();
        runtime.spawn(async move {
            if let Err(e) = server.start(shutdown).await {
                error!(error = %e, "health server failed");
            }
        });
        Some(runtime)
    } else {
        None
    };

    let result = start_mining(&config, source, metrics);
    server_shutdown.cancel();
    result
}

fn start_mining(
    config: &Config,
    source: Arc<GetworkClient>,
    metrics: Arc<MetricsCollector>,
) -> anyhow::Result<()> {
    #[cfg(feature = "cpu-fallback")]
    if config.device_type == DeviceSelection::Cpu {
        return run(config, host_devices(config), source, metrics);
    }

    #[cfg(feature = "opencl")]
    {
        use grindstone::gpu::{DeviceKind, list_devices};

        let kind = match config.device_type {
            DeviceSelection::Gpu => DeviceKind::Gpu,
            DeviceSelection::Cpu => DeviceKind::Cpu,
            DeviceSelection::All => DeviceKind::All,
        };
        match list_devices(config.opencl_platform, kind) {
            Ok(available) => {
                let devices = config.select_devices(available);
                if !devices.is_empty() {
                    return run(config, devices, source, metrics);
                }
                warn!("no OpenCL devices match DEVICES");
            }
            Err(e) => warn!(error = %e, "OpenCL device discovery failed"),
        }
    }

    #[cfg(feature = "cpu-fallback")]
    {
        warn!("GPU not found, using the host CPU");
        run(config, host_devices(config), source, metrics)
    }

    #[cfg(not(feature = "cpu-fallback"))]
    {
        anyhow::bail!("no usable compute devices")
    }
}

#[cfg(feature = "cpu-fallback")]
fn host_devices(config: &Config) -> Vec<grindstone::cpu::CpuDevice> {
    (0..config.cpu_devices.max(1))
        .map(|index| grindstone::cpu::CpuDevice { index })
        .collect()
}

fn run<D: ComputeDevice>(
    config: &Config,
    devices: Vec<D>,
    source: Arc<GetworkClient>,
    metrics: Arc<MetricsCollector>,
) -> anyhow::Result<()> {
    let (reports_tx, reports_rx) = crossbeam_channel::unbounded();
    HashRateMonitor::new(metrics.clone(), config.get_report_interval())
        .spawn(reports_rx)
        .context("starting hash rate monitor")?;

    let handle = Miner::new(devices, source, reports_tx, config.miner_config())
        .with_metrics(metrics)
        .mine()?;

    match handle.wait_fatal() {
        Some(e) => {
            error!(error = %e, "mining stopped");
            Err(e.into())
        }
        None => {
            info!("all devices halted");
            handle.shutdown();
            Ok(())
        }
    }
}
