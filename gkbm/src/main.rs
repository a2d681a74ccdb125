//! `gkbm` authenticates to a Kubernetes cluster and checks that the credentials work.
//!
//! gkbm {aws, in-cluster, out-cluster} [flags]
use std::path::PathBuf;

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region};
use clap::{builder::NonEmptyStringValueParser, Args, Parser, Subcommand};
use gkbm_client::{AuthMode, EksParams, Environment, Resolver, StsTokenGenerator, TokenGenerator};
use kube::Client;
use tracing::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_REGION: &str = "eu-west-3";
const DEFAULT_LOG_FILTER: &str = "info,gkbm=debug,gkbm_client=debug";

#[derive(Parser, Debug)]
#[command(name = "gkbm", version, about)]
struct App {
    /// Skip the API server version check after authenticating
    #[arg(long, global = true)]
    no_verify: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Authenticate to EKS with a token from an assumed IAM role
    Aws(AwsArgs),
    /// Authenticate with the service account of the current pod
    #[command(alias = "inCluster")]
    InCluster,
    /// Authenticate with a kubeconfig file
    #[command(alias = "outCluster")]
    OutCluster(OutClusterArgs),
}

#[derive(Args, Debug)]
struct AwsArgs {
    /// EKS cluster name
    #[arg(long, alias = "clusterName", value_parser = NonEmptyStringValueParser::new())]
    cluster_name: String,
    /// EKS cluster url
    #[arg(long, alias = "clusterUrl", value_parser = NonEmptyStringValueParser::new())]
    cluster_url: String,
    /// IAM role to assume
    #[arg(long, alias = "roleArn", value_parser = NonEmptyStringValueParser::new())]
    role_arn: String,
    /// Region of the STS endpoint
    #[arg(long, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    region: String,
    /// Role session name, generated when omitted
    #[arg(long, alias = "sessionName")]
    session_name: Option<String>,
}

#[derive(Args, Debug)]
struct OutClusterArgs {
    /// Path to the kubeconfig file, defaults to ~/.kube/config
    #[arg(long)]
    kubeconfig: Option<PathBuf>,
    /// Context to use instead of the current one
    #[arg(long)]
    context: Option<String>,
}

impl Command {
    fn auth_mode(&self) -> AuthMode {
        match self {
            Command::Aws(args) => AuthMode::CloudIam(EksParams {
                cluster_name: args.cluster_name.clone(),
                cluster_url: args.cluster_url.clone(),
                role_arn: args.role_arn.clone(),
                session_name: args.session_name.clone(),
            }),
            Command::InCluster => AuthMode::InProcess,
            Command::OutCluster(args) => AuthMode::ExternalConfig {
                path: args.kubeconfig.clone(),
                context: args.context.clone(),
            },
        }
    }
}

async fn authenticate<G: TokenGenerator>(resolver: &Resolver<G>, mode: &AuthMode) -> Result<Client> {
    let config = resolver.resolve_config(mode).await?;
    info!(
        mode = mode.name(),
        cluster = %config.cluster_url,
        namespace = %config.default_namespace,
        "resolved cluster credentials"
    );
    Ok(gkbm_client::connect(config)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .init();

    let app = App::parse();
    let mode = app.command.auth_mode();
    let resolver = Resolver::new(Environment::from_process());

    let client = match &app.command {
        Command::Aws(args) => {
            let session = aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(args.region.clone()))
                .load()
                .await;
            let generator = StsTokenGenerator::load(&session)
                .await
                .context("failed to create iam-authenticator token generator")?;
            authenticate(&resolver.with_token_generator(generator), &mode).await
        }
        Command::InCluster | Command::OutCluster(_) => authenticate(&resolver, &mode).await,
    }
    .with_context(|| format!("failed to authenticate with {}", mode.name()))?;

    if app.no_verify {
        return Ok(());
    }
    let version = client
        .apiserver_version()
        .await
        .context("cluster rejected the resolved credentials")?;
    info!(
        version = %version.git_version,
        platform = %version.platform,
        "connected to cluster"
    );
    Ok(())
}
