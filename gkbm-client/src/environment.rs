use std::{ffi::OsString, path::PathBuf};

use crate::config::incluster_config::{SERVICE_ACCOUNT_DIR, SERVICE_HOSTENV, SERVICE_PORTENV};

/// Values taken from the process environment
///
/// Lookups happen once in [`Environment::from_process`], at the process boundary.
/// Everything downstream receives this struct instead of reading globals, which
/// makes every resolution path testable with a hand-built value.
#[derive(Clone, Debug, Default)]
pub struct Environment {
    /// The resolving user's home directory, if one could be determined
    pub home_dir: Option<PathBuf>,
    /// Settings for in-cluster resolution
    pub in_cluster: InClusterEnv,
}

/// Where the in-cluster service account lives
#[derive(Clone, Debug)]
pub struct InClusterEnv {
    /// Value of `KUBERNETES_SERVICE_HOST`
    pub service_host: Option<String>,
    /// Value of `KUBERNETES_SERVICE_PORT`
    pub service_port: Option<String>,
    /// Directory holding the mounted `token`, `ca.crt` and `namespace` files
    pub secrets_dir: PathBuf,
}

impl Default for InClusterEnv {
    fn default() -> Self {
        Self {
            service_host: None,
            service_port: None,
            secrets_dir: PathBuf::from(SERVICE_ACCOUNT_DIR),
        }
    }
}

impl Environment {
    /// Capture the environment of the running process
    ///
    /// The home directory is `HOME`, then `USERPROFILE`, then whatever the platform reports.
    pub fn from_process() -> Self {
        let home_dir = home_from_vars(std::env::var_os("HOME"), std::env::var_os("USERPROFILE"))
            .or_else(home::home_dir);
        Self {
            home_dir,
            in_cluster: InClusterEnv {
                service_host: non_empty_var(SERVICE_HOSTENV),
                service_port: non_empty_var(SERVICE_PORTENV),
                ..Default::default()
            },
        }
    }

    /// Default kubeconfig location, `<home>/.kube/config`
    pub fn default_kubeconfig_path(&self) -> Option<PathBuf> {
        self.home_dir.as_ref().map(|h| h.join(".kube").join("config"))
    }
}

fn home_from_vars(home: Option<OsString>, userprofile: Option<OsString>) -> Option<PathBuf> {
    home.filter(|h| !h.is_empty())
        .or_else(|| userprofile.filter(|h| !h.is_empty()))
        .map(PathBuf::from)
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
