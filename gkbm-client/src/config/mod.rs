//! Resolution of cluster credentials into a [`kube::Config`]
//!
//! # Usage
//! Pick an [`AuthMode`], hand it to a [`Resolver`], and receive either a
//! [`Config`] via [`Resolver::resolve_config`] or a ready [`Client`] via [`Resolver::resolve`].
//!
//! Only [`AuthMode::CloudIam`] needs a [`TokenGenerator`]; attach one with
//! [`Resolver::with_token_generator`].
mod eks;
mod file_config;
pub(crate) mod incluster_config;
mod utils;

use std::path::PathBuf;

use kube::{Client, Config};

use crate::{
    error::ClientConfigError,
    environment::Environment,
    Error, Result,
};

pub use eks::{NoTokenGenerator, StsTokenGenerator, Token, TokenError, TokenGenerator};
pub use incluster_config::InClusterError;

/// How to authenticate against the cluster
///
/// Exactly one mode is resolved per invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthMode {
    /// Exchange an assumed IAM role for an EKS bearer token
    CloudIam(EksParams),
    /// Use the service account mounted into the current pod
    InProcess,
    /// Load a kubeconfig file
    ExternalConfig {
        /// Explicit kubeconfig path, instead of `<home>/.kube/config`
        path: Option<PathBuf>,
        /// Named context to load, instead of the file's current context
        context: Option<String>,
    },
}

impl AuthMode {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            AuthMode::CloudIam(_) => "aws",
            AuthMode::InProcess => "in-cluster",
            AuthMode::ExternalConfig { .. } => "out-cluster",
        }
    }
}

/// Parameters for [`AuthMode::CloudIam`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EksParams {
    /// EKS cluster name, also the `x-k8s-aws-id` the token is scoped to
    pub cluster_name: String,
    /// API server endpoint of the cluster
    pub cluster_url: String,
    /// ARN of the IAM role to assume
    pub role_arn: String,
    /// Role session name; generated when unset
    pub session_name: Option<String>,
}

impl EksParams {
    /// Create parameters with a generated role session name
    pub fn new(
        cluster_name: impl Into<String>,
        cluster_url: impl Into<String>,
        role_arn: impl Into<String>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            cluster_url: cluster_url.into(),
            role_arn: role_arn.into(),
            session_name: None,
        }
    }

    /// Check that every required parameter is present
    ///
    /// Surrounding whitespace is ignored, here and when the parameters are resolved.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("cluster name", &self.cluster_name),
            ("cluster url", &self.cluster_url),
            ("role arn", &self.role_arn),
        ];
        for (what, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Configuration(format!("eks {what} is required")));
            }
        }
        if let Some(name) = &self.session_name {
            let name = name.trim();
            if !is_valid_session_name(name) {
                return Err(Error::Configuration(format!(
                    "eks session name {name:?} must be 2 to 64 characters of [A-Za-z0-9+=,.@_-]"
                )));
            }
        }
        Ok(())
    }

    fn trimmed(&self) -> Self {
        Self {
            cluster_name: self.cluster_name.trim().to_owned(),
            cluster_url: self.cluster_url.trim().to_owned(),
            role_arn: self.role_arn.trim().to_owned(),
            session_name: self.session_name.as_deref().map(|s| s.trim().to_owned()),
        }
    }
}

// Same rule STS applies to RoleSessionName
fn is_valid_session_name(name: &str) -> bool {
    (2..=64).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "+=,.@_-".contains(c))
}

/// Maps an [`AuthMode`] to cluster credentials
///
/// The resolver holds no state besides the injected [`Environment`] and token generator,
/// so resolving the same mode twice gives configs of the same shape.
/// Tokens are never cached: each CloudIam resolution mints a new one.
#[derive(Clone, Debug)]
pub struct Resolver<G = NoTokenGenerator> {
    environment: Environment,
    generator: G,
}

impl Resolver {
    /// Create a resolver without EKS support
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            generator: NoTokenGenerator,
        }
    }
}

impl<G> Resolver<G> {
    /// Use `generator` to mint tokens for [`AuthMode::CloudIam`]
    pub fn with_token_generator<T: TokenGenerator>(self, generator: T) -> Resolver<T> {
        Resolver {
            environment: self.environment,
            generator,
        }
    }

    /// The environment this resolver was created with
    pub fn environment(&self) -> &Environment {
        &self.environment
    }
}

impl<G: TokenGenerator> Resolver<G> {
    /// Resolve `mode` into a client configuration
    pub async fn resolve_config(&self, mode: &AuthMode) -> Result<Config> {
        tracing::debug!(mode = mode.name(), "resolving cluster credentials");
        match mode {
            AuthMode::CloudIam(params) => eks::config(params, &self.generator).await,
            AuthMode::InProcess => incluster_config::config(&self.environment.in_cluster),
            AuthMode::ExternalConfig { path, context } => {
                file_config::config(path.as_deref(), context.as_deref(), &self.environment).await
            }
        }
    }

    /// Resolve `mode` into a client
    pub async fn resolve(&self, mode: &AuthMode) -> Result<Client> {
        let config = self.resolve_config(mode).await?;
        connect(config)
    }
}

/// Build a [`Client`] from a resolved configuration
///
/// Must be called from within a tokio runtime.
pub fn connect(config: Config) -> Result<Client> {
    // The AWS SDK compiles in aws-lc-rs next to ring, so rustls has no implicit default.
    // An error here only means a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();
    Client::try_from(config).map_err(|e| Error::ClientConfig(ClientConfigError::Client(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn eks_params_require_every_field() {
        assert!(EksParams::new("demo", "https://demo.example", "arn:aws:iam::1:role/r")
            .validate()
            .is_ok());
        for params in [
            EksParams::new("", "https://demo.example", "arn:aws:iam::1:role/r"),
            EksParams::new("demo", "", "arn:aws:iam::1:role/r"),
            EksParams::new("demo", "https://demo.example", "  "),
        ] {
            assert!(matches!(params.validate(), Err(Error::Configuration(_))));
        }
    }

    #[test]
    fn session_names_follow_sts_rules() {
        let with_session = |name: &str| EksParams {
            session_name: Some(name.into()),
            ..EksParams::new("demo", "https://demo.example", "arn:aws:iam::1:role/r")
        };
        assert!(with_session("deploy@ci.example_1+=,-").validate().is_ok());
        assert!(with_session(" padded ").validate().is_ok());
        for name in ["", "a", "has space", "slash/name", "ünicode", &"x".repeat(65)] {
            let err = with_session(name).validate().unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{name:?}: {err}");
        }
        assert!(with_session(&"x".repeat(64)).validate().is_ok());
    }

    struct FixedGenerator;

    impl TokenGenerator for FixedGenerator {
        async fn generate(&self, _: &str, _: &str, _: &str) -> Result<Token, TokenError> {
            Ok(Token::new("tok-123", chrono::Utc::now()))
        }
    }

    fn eks_mode() -> AuthMode {
        AuthMode::CloudIam(EksParams::new(
            "demo",
            "https://demo.example",
            "arn:aws:iam::123456789012:role/deployer",
        ))
    }

    #[tokio::test]
    async fn each_mode_runs_its_own_strategy() {
        let env = Environment {
            home_dir: Some("/nonexistent/home".into()),
            ..Default::default()
        };
        let resolver = Resolver::new(env);

        let err = resolver.resolve_config(&AuthMode::InProcess).await.unwrap_err();
        assert!(matches!(err, Error::AmbientConfig(_)), "{err}");

        let external = AuthMode::ExternalConfig {
            path: None,
            context: None,
        };
        match resolver.resolve_config(&external).await.unwrap_err() {
            Error::ExternalConfigParse { path, .. } => {
                assert_eq!(path, std::path::Path::new("/nonexistent/home/.kube/config"))
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = resolver.resolve_config(&eks_mode()).await.unwrap_err();
        assert!(matches!(err, Error::TokenGeneration(TokenError::Unavailable)), "{err}");
    }

    #[tokio::test]
    async fn attached_generator_is_used() {
        let resolver = Resolver::new(Environment::default()).with_token_generator(FixedGenerator);
        let config = resolver.resolve_config(&eks_mode()).await.unwrap();
        assert_eq!(config.cluster_url, "https://demo.example/");
        assert_eq!(
            config.auth_info.token.as_ref().map(|t| t.expose_secret()),
            Some("tok-123")
        );
    }

    #[tokio::test]
    async fn resolve_fails_before_connecting() {
        let resolver = Resolver::new(Environment::default());
        let Err(err) = resolver.resolve(&AuthMode::InProcess).await else {
            panic!("in-cluster resolution should fail without a service account");
        };
        assert!(matches!(err, Error::AmbientConfig(_)), "{err}");
    }

    #[tokio::test]
    async fn resolve_connects_with_kubeconfig() {
        let file = tempfile::NamedTempFile::new().expect("create config tempfile");
        std::fs::write(
            file.path(),
            r#"
apiVersion: v1
kind: Config
clusters:
- name: local
  cluster:
    server: https://127.0.0.1:6443
users:
- name: dev
  user:
    token: dev-token
contexts:
- name: local
  context:
    cluster: local
    user: dev
    namespace: gkbm
current-context: local
"#,
        )
        .unwrap();

        let mode = AuthMode::ExternalConfig {
            path: Some(file.path().to_owned()),
            context: None,
        };
        let client = match Resolver::new(Environment::default()).resolve(&mode).await {
            Ok(client) => client,
            Err(err) => panic!("kubeconfig should resolve into a client: {err}"),
        };
        assert_eq!(client.default_namespace(), "gkbm");
    }

    #[test]
    fn mode_names() {
        assert_eq!(AuthMode::InProcess.name(), "in-cluster");
        let external = AuthMode::ExternalConfig {
            path: None,
            context: None,
        };
        assert_eq!(external.name(), "out-cluster");
        assert_eq!(AuthMode::CloudIam(EksParams::new("a", "b", "c")).name(), "aws");
    }
}
