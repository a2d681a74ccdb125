//! Credential resolution for `gkbm`
//!
//! This crate turns one of three authentication modes into a ready [`kube::Client`]:
//!
//! - [`AuthMode::CloudIam`]: an EKS bearer token minted from an assumed IAM role
//! - [`AuthMode::InProcess`]: the service account mounted into a running pod
//! - [`AuthMode::ExternalConfig`]: the current context of a kubeconfig file
//!
//! Every mode produces the same [`Config`](kube::Config) and [`Client`](kube::Client) types,
//! so code running after resolution never has to know which strategy was used.
//!
//! # Example
//!
//! ```rust,no_run
//! use gkbm_client::{AuthMode, Environment, Resolver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Environment variables are read once, here, and injected afterwards.
//!     let resolver = Resolver::new(Environment::from_process());
//!     let mode = AuthMode::ExternalConfig {
//!         path: None,
//!         context: None,
//!     };
//!     let client = resolver.resolve(&mode).await?;
//!     println!("default namespace: {}", client.default_namespace());
//!     Ok(())
//! }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
mod environment;
pub mod error;

#[doc(inline)]
pub use config::{
    connect, AuthMode, EksParams, NoTokenGenerator, Resolver, StsTokenGenerator, Token, TokenGenerator,
};
pub use environment::{Environment, InClusterEnv};
#[doc(inline)]
pub use error::Error;

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
