// System
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

// Third Party
use kube::{
    config::{InClusterError, KubeConfigOptions, Kubeconfig, KubeconfigError},
    Config,
};
use tracing::debug;

/// Where a set of connection credentials was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    ExplicitPath(PathBuf),
    /// `KUBECONFIG`, falling back to `~/.kube/config`.
    DefaultKubeconfig,
    /// The service account mounted into a pod.
    InCluster,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to load kubeconfig {}: {source}", .path.display())]
    ExplicitPath {
        path: PathBuf,
        source: KubeconfigError,
    },
    #[error("failed to load default kubeconfig: {source}")]
    DefaultKubeconfig { source: KubeconfigError },
    #[error("no usable credentials: default kubeconfig: {kubeconfig}; in-cluster: {in_cluster}")]
    Exhausted {
        kubeconfig: KubeconfigError,
        in_cluster: InClusterError,
    },
}

#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    pub config: Config,
    pub source: CredentialSource,
}

/// Resolve connection credentials: explicit path, then the user's default kubeconfig, then
/// in-cluster service account credentials.
///
/// Only a missing kubeconfig moves on to the next source. An explicit path or a default
/// kubeconfig that exists but cannot be loaded is an error.
pub async fn resolve(explicit: Option<&Path>) -> Result<ResolvedCredentials, CredentialError> {
    resolve_with(explicit, Config::incluster).await
}

async fn resolve_with<F>(
    explicit: Option<&Path>,
    in_cluster: F,
) -> Result<ResolvedCredentials, CredentialError>
where
    F: FnOnce() -> Result<Config, InClusterError>,
{
    debug!(
        "Kubeconfig path: {}",
        explicit.map(|p| p.display().to_string()).unwrap_or_default()
    );
    let options = KubeConfigOptions::default();

    if let Some(path) = explicit {
        let config = load_explicit(path, &options)
            .await
            .map_err(|source| CredentialError::ExplicitPath {
                path: path.to_path_buf(),
                source,
            })?;
        return Ok(ResolvedCredentials {
            config,
            source: CredentialSource::ExplicitPath(path.to_path_buf()),
        });
    }

    let kubeconfig = match Config::from_kubeconfig(&options).await {
        Ok(config) => {
            return Ok(ResolvedCredentials {
                config,
                source: CredentialSource::DefaultKubeconfig,
            })
        }
        Err(error) if is_missing(&error) => error,
        Err(source) => return Err(CredentialError::DefaultKubeconfig { source }),
    };
    debug!("No default kubeconfig ({}), trying in-cluster config", kubeconfig);

    match in_cluster() {
        Ok(config) => Ok(ResolvedCredentials {
            config,
            source: CredentialSource::InCluster,
        }),
        Err(in_cluster) => Err(CredentialError::Exhausted {
            kubeconfig,
            in_cluster,
        }),
    }
}

/// True when there is no default kubeconfig at all, as opposed to one that fails to load.
fn is_missing(error: &KubeconfigError) -> bool {
    match error {
        KubeconfigError::FindPath => true,
        KubeconfigError::ReadConfig(io_error, _) => io_error.kind() == ErrorKind::NotFound,
        _ => false,
    }
}

async fn load_explicit(path: &Path, options: &KubeConfigOptions) -> Result<Config, KubeconfigError> {
    let kubeconfig = Kubeconfig::read_from(path)?;
    Config::from_custom_kubeconfig(kubeconfig, options).await
}
