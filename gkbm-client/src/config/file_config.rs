use std::path::{Path, PathBuf};

use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Config,
};

use crate::{environment::Environment, Error, Result};

/// The kubeconfig path to load: the override, else `<home>/.kube/config`
///
/// Without a home directory this is the empty path, which fails when read.
pub(crate) fn kubeconfig_path(path: Option<&Path>, env: &Environment) -> PathBuf {
    path.map(Path::to_path_buf)
        .or_else(|| env.default_kubeconfig_path())
        .unwrap_or_default()
}

/// Resolve a kubeconfig file into a client configuration
///
/// Uses the file's current context unless `context` names another one.
pub(super) async fn config(path: Option<&Path>, context: Option<&str>, env: &Environment) -> Result<Config> {
    let path = kubeconfig_path(path, env);
    tracing::debug!(path = %path.display(), context, "loading kubeconfig");

    let kubeconfig = match Kubeconfig::read_from(&path) {
        Ok(kubeconfig) => kubeconfig,
        Err(source) => return Err(Error::ExternalConfigParse { path, source }),
    };
    let options = KubeConfigOptions {
        context: context.map(str::to_owned),
        ..Default::default()
    };
    Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .map_err(|source| Error::ExternalConfigParse { path, source })
}
