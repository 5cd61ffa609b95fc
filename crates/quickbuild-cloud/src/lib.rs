//! QuickBuild cloud clients
//!
//! This crate talks to the two remote collaborators of a quick build:
//! the registry build service and blob storage.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 quickbuild-build                  │
//! │       (archive → upload → queue → stream logs)    │
//! └──────────────┬──────────────────────┬────────────┘
//!                │                      │
//! ┌──────────────▼───────────┐ ┌────────▼────────────┐
//! │  trait BuildService      │ │  trait BlobStore    │
//! │  RegistryBuildClient     │ │  SasBlobClient      │
//! │  (management REST API)   │ │  (SAS blob URLs)    │
//! └──────────────────────────┘ └─────────────────────┘
//! ```
//!
//! Every call goes through [`retry::with_retry`] with a bounded
//! exponential backoff.

pub mod blob;
pub mod error;
pub mod model;
pub mod provider;
pub mod registry;
pub mod retry;

// Re-exports
pub use blob::{BlobLocation, BlobReceipt, BlobStore, ByteStream, SasBlobClient};
pub use error::{CloudError, Result};
pub use model::{
    BuildHandle, BuildRequest, BuildStatus, LogLocation, Platform, RegistryIdentity,
    UploadDestination, redact_url,
};
pub use provider::BuildService;
pub use registry::{
    DEFAULT_API_VERSION, DEFAULT_MANAGEMENT_ENDPOINT, RegistryBuildClient, RegistryClientConfig,
};
pub use retry::{RetryConfig, with_retry};
