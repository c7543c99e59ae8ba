use anyhow::Context;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use transcode_queue::cli::{Args, ConfigDiscovery, ExecutionMode, RunConfig};
use transcode_queue::{
    ChannelEventHandler, FfmpegEncoder, OutputParams, QueueSignal, ServiceCommand, ServiceConfig,
    ServiceEvent, TaskStatus, TranscodeService,
};

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let verbose = matches!(&mode, ExecutionMode::Run(config) if config.verbose);
    init_tracing(verbose);

    match mode {
        ExecutionMode::Run(config) => run(config).await,
        ExecutionMode::ShowConfig => show_config(),
        ExecutionMode::InitConfig => {
            let path = ConfigDiscovery::create_default_user_config()?;
            println!("Configuration file: {}", path.display());
            Ok(())
        }
    }
}

/// Logs go to stderr; stdout carries the event stream
fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        "transcode_queue=debug"
    } else {
        "transcode_queue=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(config: &RunConfig) -> anyhow::Result<ServiceConfig> {
    let mut service_config = match &config.config_override {
        Some(path) => {
            info!("Loading configuration override from: {:?}", path);
            ServiceConfig::from_toml_file(path)
                .with_context(|| format!("loading {}", path.display()))?
        }
        None => ConfigDiscovery::discover_config().context("discovering configuration")?,
    };
    if let Some(limit) = config.concurrency {
        service_config.scheduler.max_concurrent_tasks = limit;
    }
    Ok(service_config)
}

async fn run(config: RunConfig) -> anyhow::Result<()> {
    let service_config = load_config(&config)?;
    info!(
        "Starting transcode queue with {} input(s), concurrency {}",
        config.inputs.len(),
        service_config.concurrency_limit()
    );

    let (channel, mut events) = ChannelEventHandler::channel(EVENT_BUFFER);
    let mut service = TranscodeService::new(service_config, Arc::new(FfmpegEncoder::new()));
    service.add_event_handler(Box::new(channel));
    service.init_encoder();
    let (handle, join) = service.spawn();

    let mut ids = Vec::new();
    for input in &config.inputs {
        let path = std::fs::canonicalize(input)
            .with_context(|| format!("input {} not found", input.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut params = OutputParams::for_input(path.to_string_lossy());
        if let Some(format) = &config.format {
            params.output.format = format.clone();
        }
        ids.push(handle.task_add(name, params).await?);
    }
    handle.execute(ServiceCommand::QueueStart).await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    if let ServiceEvent::WorkingStatusUpdate {
                        value: QueueSignal::Stop | QueueSignal::Pause,
                    } = event
                    {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping encoders");
                break;
            }
        }
    }

    let mut failed = 0;
    for id in &ids {
        if let Some(task) = handle.task_snapshot(*id).await? {
            match task.status {
                TaskStatus::Finished => info!(
                    "[task {}] {} -> {}",
                    id, task.file_base_name, task.output_path
                ),
                status => {
                    failed += 1;
                    error!("[task {}] {} ended as {}", id, task.file_base_name, status);
                }
            }
        }
    }

    handle.shutdown().await?;
    join.await.context("service task panicked")?;

    if failed > 0 {
        anyhow::bail!("{} of {} task(s) did not finish", failed, ids.len());
    }
    Ok(())
}

fn show_config() -> anyhow::Result<()> {
    ConfigDiscovery::show_discovery_info();
    let config = ConfigDiscovery::discover_config()?;
    println!();
    println!("{}", config.to_toml_string()?);
    Ok(())
}
