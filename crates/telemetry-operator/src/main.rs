//! Telemetry manager - Kubernetes operator for log, metric and trace pipelines

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::Client;

use telemetry_common::telemetry::{init_telemetry, TelemetryConfig};
use telemetry_operator::controller_runner::{build_module_controller, build_pipeline_controllers};
use telemetry_operator::crds::{crds_yaml, ensure_crds_installed};
use telemetry_operator::{selfmon, webhook, ControllerArgs, OperatorConfig};
use telemetry_pipeline::controller::PipelineContext;
use telemetry_pipeline::selfmon::AlertStore;

/// Telemetry manager - reconciles telemetry pipelines into collector workloads
#[derive(Parser, Debug)]
#[command(name = "telemetry-manager", version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers, the admission webhook and the alert receiver (default mode)
    Controller(ControllerArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The webhook server and the kube client both need a process-wide provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crds_yaml()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())
        .map_err(|e| anyhow::anyhow!("failed to initialize telemetry: {}", e))?;

    let args = match cli.command {
        Some(Commands::Controller(args)) => args,
        None => cli.controller,
    };
    run_controller(OperatorConfig::from(args)).await
}

async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kube client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let certs = webhook::generate_certs(&config.webhook_service_name, config.namespace())?;
    webhook::ensure_webhook_config(
        &client,
        &config.webhook_service_name,
        config.namespace(),
        config.webhook_port,
        &certs.ca_cert_pem,
    )
    .await?;

    let webhook_addr = SocketAddr::from(([0, 0, 0, 0], config.webhook_port));
    tokio::spawn(async move {
        if let Err(e) = webhook::serve(webhook_addr, &certs).await {
            tracing::error!(error = %e, "admission webhook server stopped");
        }
    });

    let alerts = Arc::new(AlertStore::new(config.reconciler.alert_window));
    let receiver_addr = SocketAddr::from(([0, 0, 0, 0], config.self_monitor_port));
    let receiver_store = alerts.clone();
    tokio::spawn(async move {
        if let Err(e) = selfmon::serve(receiver_addr, receiver_store).await {
            tracing::error!(error = %e, "self-monitor alert receiver stopped");
        }
    });

    let prune_store = alerts.clone();
    let prune_every = config.reconciler.alert_window.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(prune_every);
        loop {
            ticker.tick().await;
            prune_store.prune(chrono::Utc::now());
        }
    });

    let ctx = Arc::new(PipelineContext::from_client(
        client.clone(),
        config.reconciler.clone(),
        alerts,
    ));

    tracing::info!(namespace = %config.namespace(), "Starting telemetry controllers...");
    let mut controllers = build_pipeline_controllers(client.clone(), ctx.clone());
    controllers.extend(build_module_controller(client, ctx));

    futures::future::join_all(controllers).await;

    tracing::info!("telemetry manager shutting down");
    Ok(())
}
