//! Error handling in [`gkbm_client`][crate]
use std::path::PathBuf;

use kube::config::KubeconfigError;
use thiserror::Error;

use crate::config::{InClusterError, TokenError};

/// Possible errors when resolving cluster credentials
///
/// None of these are retried. Each one is terminal for the current invocation.
#[derive(Error, Debug)]
pub enum Error {
    /// The requested mode was given incomplete or conflicting parameters
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Minting an EKS bearer token failed
    #[error("failed to get token for eks: {0}")]
    TokenGeneration(#[source] TokenError),

    /// A client configuration could not be assembled or turned into a client
    #[error("failed to build client config: {0}")]
    ClientConfig(#[source] ClientConfigError),

    /// The in-cluster service account could not be loaded
    #[error("failed to load in-cluster config: {0}")]
    AmbientConfig(#[source] InClusterError),

    /// The kubeconfig file was missing, malformed, or its context was incomplete
    #[error("failed to load kubeconfig from {path:?}: {source}")]
    ExternalConfigParse {
        /// The kubeconfig path that was attempted
        path: PathBuf,
        /// The underlying kubeconfig error
        #[source]
        source: KubeconfigError,
    },
}

/// Possible errors when turning resolved credentials into a client
#[derive(Error, Debug)]
pub enum ClientConfigError {
    /// The in-memory kubeconfig was rejected
    #[error("invalid cluster entry: {0}")]
    Kubeconfig(#[source] KubeconfigError),

    /// The cluster endpoint does not use https
    #[error("cluster url {0:?} must use https")]
    UnsupportedScheme(String),

    /// The client could not be constructed from its configuration
    #[error("failed to generate client: {0}")]
    Client(#[source] kube::Error),
}
