use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};
use std::path::PathBuf;

use flowtap::models::filter::{FilterSpec, Operator};
use flowtap::pipeline::Pipeline;
use flowtap::utils::logging;
use flowtap::{EventKind, PipelineConfig, PipelineEvent, WsConnector};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Streams intercepted HTTP flows from an interception backend")]
struct Args {
    /// WebSocket endpoint of the backend
    #[clap(short, long)]
    endpoint: Option<String>,

    /// JSON configuration file; flags override its values
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Maximum number of buffered flows
    #[clap(long)]
    capacity: Option<usize>,

    /// Quick filter debounce window
    #[clap(long)]
    debounce_ms: Option<u64>,

    /// Delay before the first reconnect attempt
    #[clap(long)]
    reconnect_base_ms: Option<u64>,

    /// Automatic reconnect attempts before giving up
    #[clap(long)]
    max_reconnect_attempts: Option<u32>,

    /// Keep-alive ping interval, 0 disables pings
    #[clap(long)]
    ping_interval_secs: Option<u64>,

    /// Structured filter field (url, method, body, header:<name>)
    #[clap(long, requires = "filter_value")]
    filter_field: Option<String>,

    /// Structured filter operator (contains, equals, starts_with, ends_with, regex)
    #[clap(long, default_value = "contains")]
    filter_operator: Operator,

    /// Structured filter value
    #[clap(long, requires = "filter_field")]
    filter_value: Option<String>,

    /// Quick filter text matched against URL, method and status
    #[clap(short, long)]
    quick: Option<String>,

    /// Log level (trace, debug, info, warn, error, off)
    #[clap(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }
        if let Some(debounce_ms) = self.debounce_ms {
            config.debounce_ms = debounce_ms;
        }
        if let Some(base) = self.reconnect_base_ms {
            config.reconnect_base_delay_ms = base;
        }
        if let Some(attempts) = self.max_reconnect_attempts {
            config.max_reconnect_attempts = attempts;
        }
        match self.ping_interval_secs {
            Some(0) => config.ping_interval_secs = None,
            Some(secs) => config.ping_interval_secs = Some(secs),
            None => {}
        }

        config.validate()?;
        Ok(config)
    }

    fn filter(&self) -> Option<FilterSpec> {
        let field = self.filter_field.as_ref()?;
        let value = self.filter_value.as_ref()?;
        Some(FilterSpec::new(field.clone(), self.filter_operator, value.clone()))
    }
}

/// Log everything the pipeline publishes
fn register_log_handlers(pipeline: &mut Pipeline) {
    pipeline.on(
        EventKind::Flow,
        Box::new(|event: &PipelineEvent| {
            if let PipelineEvent::Flow(flow) = event {
                info!(
                    "{} {} {} ({}, {})",
                    flow.method,
                    flow.status_text(),
                    flow.url,
                    flow.duration,
                    flow.response_size_display
                );
            }
            Ok(())
        }),
    );
    pipeline.on(
        EventKind::Connected,
        Box::new(|_: &PipelineEvent| {
            info!("Backend connected");
            Ok(())
        }),
    );
    pipeline.on(
        EventKind::Disconnected,
        Box::new(|event: &PipelineEvent| {
            if let PipelineEvent::Disconnected { code, reason } = event {
                warn!("Backend disconnected ({}): {}", code, reason);
            }
            Ok(())
        }),
    );
    pipeline.on(
        EventKind::Error,
        Box::new(|event: &PipelineEvent| {
            if let PipelineEvent::Error { cause } = event {
                error!("Connection error: {}", cause);
            }
            Ok(())
        }),
    );
    for kind in [EventKind::InterceptionStarted, EventKind::InterceptionStopped] {
        pipeline.on(
            kind,
            Box::new(|event: &PipelineEvent| {
                match event {
                    PipelineEvent::InterceptionStarted { port } => {
                        info!("Interception started on port {}", port.map_or("?".to_string(), |p| p.to_string()))
                    }
                    PipelineEvent::InterceptionStopped { port } => {
                        info!("Interception stopped on port {}", port.map_or("?".to_string(), |p| p.to_string()))
                    }
                    _ => {}
                }
                Ok(())
            }),
        );
    }
    for kind in [EventKind::Message, EventKind::FlowCreated, EventKind::FlowUpdated, EventKind::Pong] {
        pipeline.on(
            kind,
            Box::new(|event: &PipelineEvent| {
                debug!("Backend: {:?}", event);
                Ok(())
            }),
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logger with specified level
    logging::init_logger(logging::get_log_level(&args.log_level));

    info!("Starting flowtap v{}", env!("CARGO_PKG_VERSION"));

    let config = args.pipeline_config()?;
    info!(
        "Endpoint {}, capacity {}, debounce {}ms",
        config.endpoint, config.capacity, config.debounce_ms
    );

    let (mut pipeline, handle) = Pipeline::new(config, WsConnector);
    register_log_handlers(&mut pipeline);
    let task = pipeline.spawn();

    if let Some(spec) = args.filter() {
        handle.set_filter(Some(spec))?;
    }
    if let Some(text) = &args.quick {
        handle.set_quick_text(text.clone())?;
    }

    if let Err(e) = handle.connect().await {
        warn!("Initial connection failed: {}", e);
    }

    let mut view = handle.view();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    warn!("Pipeline stopped unexpectedly");
                    break;
                }
                let current = view.borrow_and_update().clone();
                info!("{} flows in view", current.len());
            }
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    // Already gone if the loop ended on its own
    let _ = handle.shutdown();
    task.await?;

    Ok(())
}
