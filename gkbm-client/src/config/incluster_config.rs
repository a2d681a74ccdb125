use std::{
    io,
    path::{Path, PathBuf},
};

use kube::Config;
use thiserror::Error;

use super::utils;
use crate::{environment::InClusterEnv, Error, Result};

pub(crate) const SERVICE_HOSTENV: &str = "KUBERNETES_SERVICE_HOST";
pub(crate) const SERVICE_PORTENV: &str = "KUBERNETES_SERVICE_PORT";

// Mounted credential files
pub(crate) const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const SERVICE_TOKENFILE: &str = "token";
const SERVICE_CERTFILE: &str = "ca.crt";
const SERVICE_DEFAULT_NS: &str = "namespace";

const DEFAULT_NAMESPACE: &str = "default";

/// Errors from loading in-cluster config
#[derive(Error, Debug)]
pub enum InClusterError {
    /// A required service environment variable is unset
    #[error("missing environment variable {0}; not running inside a cluster?")]
    MissingEnvironmentVariable(&'static str),

    /// Failed to parse cluster url
    #[error("failed to parse cluster url: {0}")]
    ParseClusterUrl(#[source] http::uri::InvalidUri),

    /// Failed to read the service account token
    #[error("failed to read the service account token {path:?}: {source}")]
    ReadToken {
        /// Path of the token file
        path: PathBuf,
        /// The io error
        #[source]
        source: io::Error,
    },

    /// The service account token is empty
    #[error("the service account token {0:?} is empty")]
    EmptyToken(PathBuf),

    /// Failed to read a certificate bundle
    #[error("failed to read a certificate bundle: {0}")]
    ReadCertificateBundle(#[source] io::Error),

    /// Failed to parse PEM-encoded certificates
    #[error("failed to parse PEM-encoded certificates: {0}")]
    ParseCertificates(#[source] pem::PemError),

    /// The certificate bundle holds no certificates
    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),

    /// Failed to read the default namespace for the service account
    #[error("failed to read the default namespace: {0}")]
    ReadDefaultNamespace(#[source] io::Error),
}

/// Resolve the mounted service account into a client configuration
pub(super) fn config(env: &InClusterEnv) -> Result<Config> {
    load(env).map_err(Error::AmbientConfig)
}

fn load(env: &InClusterEnv) -> Result<Config, InClusterError> {
    let cluster_url = kube_server(env)?
        .parse::<http::Uri>()
        .map_err(InClusterError::ParseClusterUrl)?;

    let token_file = env.secrets_dir.join(SERVICE_TOKENFILE);
    check_token(&token_file)?;
    let root_cert = load_cert(&env.secrets_dir.join(SERVICE_CERTFILE))?;
    let default_namespace = load_default_ns(&env.secrets_dir.join(SERVICE_DEFAULT_NS))?;
    tracing::debug!(%cluster_url, namespace = %default_namespace, "loaded in-cluster service account");

    let mut config = Config::new(cluster_url);
    config.default_namespace = default_namespace;
    config.root_cert = Some(root_cert);
    // Referenced by path so rotated tokens are picked up
    config.auth_info.token_file = Some(token_file.to_string_lossy().into_owned());
    Ok(config)
}

fn kube_server(env: &InClusterEnv) -> Result<String, InClusterError> {
    let host = env
        .service_host
        .as_deref()
        .ok_or(InClusterError::MissingEnvironmentVariable(SERVICE_HOSTENV))?;
    let port = env
        .service_port
        .as_deref()
        .ok_or(InClusterError::MissingEnvironmentVariable(SERVICE_PORTENV))?;
    if host.contains(':') {
        Ok(format!("https://[{host}]:{port}"))
    } else {
        Ok(format!("https://{host}:{port}"))
    }
}

fn check_token(path: &Path) -> Result<(), InClusterError> {
    let token = std::fs::read_to_string(path).map_err(|source| InClusterError::ReadToken {
        path: path.to_owned(),
        source,
    })?;
    if token.trim().is_empty() {
        return Err(InClusterError::EmptyToken(path.to_owned()));
    }
    Ok(())
}

/// Returns certification from specified path in cluster.
fn load_cert(path: &Path) -> Result<Vec<Vec<u8>>, InClusterError> {
    let certs = std::fs::read(path).map_err(InClusterError::ReadCertificateBundle)?;
    let certs = utils::certs(&certs).map_err(InClusterError::ParseCertificates)?;
    if certs.is_empty() {
        return Err(InClusterError::NoCertificates(path.to_owned()));
    }
    Ok(certs)
}

/// Returns the default namespace from specified path in cluster.
///
/// Older clusters do not mount the namespace file.
fn load_default_ns(path: &Path) -> Result<String, InClusterError> {
    match std::fs::read_to_string(path) {
        Ok(ns) if !ns.trim().is_empty() => Ok(ns.trim().to_owned()),
        Ok(_) => Ok(DEFAULT_NAMESPACE.to_owned()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(DEFAULT_NAMESPACE.to_owned()),
        Err(e) => Err(InClusterError::ReadDefaultNamespace(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CA: &str = "-----BEGIN CERTIFICATE-----\naGVsbG8K\n-----END CERTIFICATE-----\n";

    fn mounted(token: &str, ca: &str, namespace: Option<&str>) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SERVICE_TOKENFILE), token).unwrap();
        std::fs::write(dir.path().join(SERVICE_CERTFILE), ca).unwrap();
        if let Some(ns) = namespace {
            std::fs::write(dir.path().join(SERVICE_DEFAULT_NS), ns).unwrap();
        }
        dir
    }

    fn env(dir: &Path) -> InClusterEnv {
        InClusterEnv {
            service_host: Some("10.96.0.1".into()),
            service_port: Some("443".into()),
            secrets_dir: dir.to_owned(),
        }
    }

    #[test]
    fn loads_mounted_service_account() {
        let dir = mounted("sa-token\n", CA, Some("apps\n"));
        let config = config(&env(dir.path())).unwrap();
        assert_eq!(config.cluster_url, "https://10.96.0.1:443/");
        assert_eq!(config.default_namespace, "apps");
        assert_eq!(config.root_cert, Some(vec![b"hello\n".to_vec()]));
        assert_eq!(
            config.auth_info.token_file.as_deref(),
            Some(dir.path().join(SERVICE_TOKENFILE).to_string_lossy().as_ref())
        );
    }

    #[test]
    fn namespace_file_is_optional() {
        let dir = mounted("sa-token", CA, None);
        let config = config(&env(dir.path())).unwrap();
        assert_eq!(config.default_namespace, "default");
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let env = InClusterEnv {
            service_host: Some("fd00::1".into()),
            service_port: Some("6443".into()),
            ..Default::default()
        };
        assert_eq!(kube_server(&env).unwrap(), "https://[fd00::1]:6443");
    }

    #[test]
    fn outside_a_cluster_is_ambient_config_error() {
        let err = config(&InClusterEnv::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::AmbientConfig(InClusterError::MissingEnvironmentVariable(SERVICE_HOSTENV))
        ));
    }

    #[test]
    fn missing_port_is_reported() {
        let env = InClusterEnv {
            service_host: Some("10.96.0.1".into()),
            ..Default::default()
        };
        assert!(matches!(
            load(&env),
            Err(InClusterError::MissingEnvironmentVariable(SERVICE_PORTENV))
        ));
    }

    #[test]
    fn missing_mount_is_ambient_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = config(&env(&dir.path().join("absent"))).unwrap_err();
        assert!(matches!(err, Error::AmbientConfig(InClusterError::ReadToken { .. })));
    }

    #[test]
    fn empty_token_is_rejected() {
        let dir = mounted("  \n", CA, None);
        assert!(matches!(load(&env(dir.path())), Err(InClusterError::EmptyToken(_))));
    }

    #[test]
    fn bundle_without_certificates_is_rejected() {
        let dir = mounted("sa-token", "", None);
        assert!(matches!(
            load(&env(dir.path())),
            Err(InClusterError::NoCertificates(_))
        ));
    }
}
