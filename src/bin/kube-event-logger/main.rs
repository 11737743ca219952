// Third Party
use clap::Parser;
use k8s_openapi::api::core::v1::Event;
use kube::Client;
use tokio::sync::mpsc;
use tracing::{error, info};

// Local
use kube_event_logger::{
    config::Args,
    credentials,
    lifecycle::{setup_exit_hooks, Controller, Outcome, STARTUP_FAILURE_EXIT_CODE},
    sink::EventSink,
    utils::init_tracing,
    watcher::{EventWatcher, NOTIFICATION_QUEUE_CAPACITY},
};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    init_tracing(args.log_level())?;
    let signals = setup_exit_hooks()?;
    let (controller, shutdown) = Controller::new();

    let resolved = match credentials::resolve(args.kubeconfig_path()).await {
        Ok(resolved) => resolved,
        Err(e) => {
            error!("Failed to resolve cluster credentials: {}", e);
            std::process::exit(STARTUP_FAILURE_EXIT_CODE);
        }
    };
    info!(
        "Using credentials from {:?} for {}",
        resolved.source, resolved.config.cluster_url
    );
    let client = match Client::try_from(resolved.config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create cluster client: {}", e);
            std::process::exit(STARTUP_FAILURE_EXIT_CODE);
        }
    };

    let (sender, receiver) = mpsc::channel(NOTIFICATION_QUEUE_CAPACITY);
    let sink = tokio::spawn(EventSink::<Event>::new(receiver).run());
    let event_watcher = EventWatcher::<Event>::new(&client);

    match controller.run(event_watcher.run(sender, shutdown), signals).await {
        Outcome::Completed => {
            sink.await?;
            Ok(())
        }
        outcome @ Outcome::Forced => std::process::exit(outcome.exit_code()),
    }
}
