// System
use std::path::Path;

// Third Party
use clap::Parser;
use tracing::Level;

/// Log every Event added to the cluster as a JSON line.
#[derive(Debug, Parser)]
#[command(name = "kube-event-logger", version)]
pub struct Args {
    /// Path to kubeconfig, defaults to use .kube in home directory or in-cluster config if run in
    /// a container
    #[arg(long, default_value = "")]
    pub kubeconfig: String,

    /// Set debug logs
    #[arg(long)]
    pub debug: bool,
}

impl Args {
    /// The explicit kubeconfig path, or `None` when the flag was left empty.
    pub fn kubeconfig_path(&self) -> Option<&Path> {
        if self.kubeconfig.is_empty() {
            None
        } else {
            Some(Path::new(&self.kubeconfig))
        }
    }

    pub fn log_level(&self) -> Level {
        if self.debug {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }
}
