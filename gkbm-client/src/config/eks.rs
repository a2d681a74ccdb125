//! EKS bearer tokens from an assumed IAM role
//!
//! A token is a presigned STS `GetCallerIdentity` url, base64url encoded behind a
//! `k8s-aws-v1.` prefix. The API server replays the url against STS to learn who we are.
//! The `x-k8s-aws-id` header is part of the signature and pins the token to one cluster.
use std::{
    future::Future,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use aws_config::{Region, SdkConfig};
use aws_credential_types::{
    provider::{error::CredentialsError, ProvideCredentials},
    Credentials,
};
use aws_sigv4::{
    http_request::{sign, SignableBody, SignableRequest, SignatureLocation, SigningSettings},
    sign::v4,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, TimeDelta, Utc};
use kube::{
    config::{AuthInfo, Cluster, Context, KubeConfigOptions, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext},
    Config,
};
use secrecy::SecretString;
use thiserror::Error;

use super::EksParams;
use crate::{error::ClientConfigError, Error, Result};

const TOKEN_PREFIX: &str = "k8s-aws-v1.";
const CLUSTER_ID_HEADER: &str = "x-k8s-aws-id";
// Presigned url lifetime; STS rejects replays after this
const PRESIGN_EXPIRY: Duration = Duration::from_secs(60);
// EKS accepts a token for 15 minutes after signing; report one minute less
const TOKEN_LIFETIME: TimeDelta = TimeDelta::minutes(14);
const SESSION_NAME_PREFIX: &str = "gkbm";

/// Errors from minting an EKS token
#[derive(Error, Debug)]
pub enum TokenError {
    /// The ambient session has no credentials provider
    #[error("no aws credentials found in the ambient session")]
    MissingCredentials,

    /// The ambient session has no region
    #[error("no aws region configured in the ambient session")]
    MissingRegion,

    /// The ambient credentials provider could not produce credentials
    #[error("failed to load aws credentials: {0}")]
    LoadCredentials(#[source] CredentialsError),

    /// This resolver was built without a token generator
    #[error("no token generator configured")]
    Unavailable,

    /// STS refused to assume the role
    #[error("failed to assume role {role_arn}: {source}")]
    AssumeRole {
        /// Role that was requested
        role_arn: String,
        /// Error reported by STS
        #[source]
        source: Box<aws_sdk_sts::Error>,
    },

    /// STS answered without credentials
    #[error("assume role response for {0} carried no credentials")]
    MissingAssumedCredentials(String),

    /// Presigning the identity request failed
    #[error("failed to presign sts request: {0}")]
    Presign(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A bearer token for an EKS cluster
#[derive(Clone, Debug)]
pub struct Token {
    /// The token presented on every request
    pub value: SecretString,
    /// When the API server stops accepting the token
    pub expiration: DateTime<Utc>,
}

impl Token {
    /// Create a token from its parts
    pub fn new(value: impl Into<String>, expiration: DateTime<Utc>) -> Self {
        Self {
            value: SecretString::from(value.into()),
            expiration,
        }
    }
}

/// Mints bearer tokens for a role and cluster
pub trait TokenGenerator {
    /// Mint a token for `cluster_name` as `role_arn`
    fn generate(
        &self,
        cluster_name: &str,
        role_arn: &str,
        session_name: &str,
    ) -> impl Future<Output = Result<Token, TokenError>> + Send;
}

/// Placeholder for resolvers that never handle EKS
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTokenGenerator;

impl TokenGenerator for NoTokenGenerator {
    async fn generate(&self, _: &str, _: &str, _: &str) -> Result<Token, TokenError> {
        Err(TokenError::Unavailable)
    }
}

/// Token generator backed by AWS STS
///
/// Assumes the requested role with the ambient session, then presigns
/// `GetCallerIdentity` with the assumed credentials.
#[derive(Clone, Debug)]
pub struct StsTokenGenerator {
    sts: aws_sdk_sts::Client,
    region: Region,
}

impl StsTokenGenerator {
    /// Create a generator from an ambient session
    ///
    /// Fails when the session cannot sign anything: no credentials provider, or no region.
    /// The provider itself is not consulted; see [`StsTokenGenerator::load`].
    pub fn new(session: &SdkConfig) -> Result<Self> {
        if session.credentials_provider().is_none() {
            return Err(Error::TokenGeneration(TokenError::MissingCredentials));
        }
        let region = session
            .region()
            .cloned()
            .ok_or(Error::TokenGeneration(TokenError::MissingRegion))?;
        Ok(Self {
            sts: aws_sdk_sts::Client::new(session),
            region,
        })
    }

    /// Create a generator and check that the ambient session yields credentials
    ///
    /// The default provider chain is always present, so an empty chain only shows up here.
    pub async fn load(session: &SdkConfig) -> Result<Self> {
        let generator = Self::new(session)?;
        if let Some(provider) = session.credentials_provider() {
            provider
                .provide_credentials()
                .await
                .map_err(|e| Error::TokenGeneration(TokenError::LoadCredentials(e)))?;
        }
        Ok(generator)
    }

    async fn assume_role(&self, role_arn: &str, session_name: &str) -> Result<Credentials, TokenError> {
        let output = self
            .sts
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .send()
            .await
            .map_err(|err| TokenError::AssumeRole {
                role_arn: role_arn.to_owned(),
                source: Box::new(err.into()),
            })?;
        let creds = output
            .credentials()
            .ok_or_else(|| TokenError::MissingAssumedCredentials(role_arn.to_owned()))?;
        Ok(Credentials::new(
            creds.access_key_id(),
            creds.secret_access_key(),
            Some(creds.session_token().to_owned()),
            None,
            "AssumeRole",
        ))
    }
}

impl TokenGenerator for StsTokenGenerator {
    async fn generate(&self, cluster_name: &str, role_arn: &str, session_name: &str) -> Result<Token, TokenError> {
        let credentials = self.assume_role(role_arn, session_name).await?;
        presign_token(&credentials, self.region.as_ref(), cluster_name, SystemTime::now())
    }
}

/// Presign `GetCallerIdentity` for `cluster_name` and wrap it as an EKS token
pub(crate) fn presign_token(
    credentials: &Credentials,
    region: &str,
    cluster_name: &str,
    time: SystemTime,
) -> Result<Token, TokenError> {
    let url = format!("https://sts.{region}.amazonaws.com/?Action=GetCallerIdentity&Version=2011-06-15");

    let mut settings = SigningSettings::default();
    settings.signature_location = SignatureLocation::QueryParams;
    settings.expires_in = Some(PRESIGN_EXPIRY);

    let identity = credentials.clone().into();
    let params = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name("sts")
        .time(time)
        .settings(settings)
        .build()
        .map_err(|e| TokenError::Presign(e.into()))?
        .into();

    let signable = SignableRequest::new(
        "GET",
        url.as_str(),
        [(CLUSTER_ID_HEADER, cluster_name)].into_iter(),
        SignableBody::Bytes(&[]),
    )
    .map_err(|e| TokenError::Presign(e.into()))?;
    let (instructions, _signature) = sign(signable, &params)
        .map_err(|e| TokenError::Presign(e.into()))?
        .into_parts();

    let mut request = http::Request::builder()
        .method(http::Method::GET)
        .uri(url.as_str())
        .header(CLUSTER_ID_HEADER, cluster_name)
        .body(())
        .map_err(|e| TokenError::Presign(e.into()))?;
    instructions.apply_to_request_http1x(&mut request);

    let presigned = request.uri().to_string();
    Ok(Token::new(
        format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(presigned)),
        DateTime::<Utc>::from(time) + TOKEN_LIFETIME,
    ))
}

fn default_session_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{SESSION_NAME_PREFIX}-{millis}")
}

/// Resolve EKS parameters into a client configuration
///
/// Parameters and endpoint are validated before the generator is touched.
pub(super) async fn config<G: TokenGenerator>(params: &EksParams, generator: &G) -> Result<Config> {
    params.validate()?;
    let params = &params.trimmed();
    check_endpoint(&params.cluster_url)?;

    let session_name = params.session_name.clone().unwrap_or_else(default_session_name);
    let token = generator
        .generate(&params.cluster_name, &params.role_arn, &session_name)
        .await
        .map_err(Error::TokenGeneration)?;
    tracing::debug!(
        cluster = %params.cluster_name,
        expiration = %token.expiration,
        "minted eks token"
    );

    let kubeconfig = single_cluster_kubeconfig(params, token.value);
    let options = KubeConfigOptions {
        context: Some(params.cluster_name.clone()),
        cluster: Some(params.cluster_name.clone()),
        user: Some(params.cluster_name.clone()),
    };
    Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .map_err(|e| Error::ClientConfig(ClientConfigError::Kubeconfig(e)))
}

// Urls that do not parse at all are left to the kubeconfig loader
fn check_endpoint(url: &str) -> Result<()> {
    match url.parse::<http::Uri>() {
        Ok(uri) if uri.scheme() != Some(&http::uri::Scheme::HTTPS) => Err(Error::ClientConfig(
            ClientConfigError::UnsupportedScheme(url.to_owned()),
        )),
        _ => Ok(()),
    }
}

// One cluster, one user and one context, all named after the cluster
fn single_cluster_kubeconfig(params: &EksParams, token: SecretString) -> Kubeconfig {
    let name = params.cluster_name.clone();
    Kubeconfig {
        clusters: vec![NamedCluster {
            name: name.clone(),
            cluster: Some(Cluster {
                server: Some(params.cluster_url.clone()),
                ..Default::default()
            }),
        }],
        auth_infos: vec![NamedAuthInfo {
            name: name.clone(),
            auth_info: Some(AuthInfo {
                token: Some(token),
                ..Default::default()
            }),
        }],
        contexts: vec![NamedContext {
            name: name.clone(),
            context: Some(Context {
                cluster: name.clone(),
                ..Default::default()
            }),
        }],
        current_context: Some(name),
        ..Default::default()
    }
}
