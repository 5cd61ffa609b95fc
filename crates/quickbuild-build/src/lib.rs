//! QuickBuild remote image build pipeline
//!
//! This crate packages a local source directory, uploads it to the
//! registry's build storage, queues a quick build and forwards the build
//! log back to the caller, stage by stage:
//!
//! ```text
//! ContextBuilder → UploadTargetResolver → BlobUploader → BuildSubmitter → LogStreamer
//! ```
//!
//! [`BuildPipeline`] drives the stages in order. Progress is written to an
//! injected [`StatusSink`].

pub mod context;
pub mod error;
pub mod image;
pub mod logs;
pub mod pipeline;
pub mod progress;
pub mod resolver;
pub mod status;
pub mod submitter;
pub mod upload;

#[cfg(test)]
mod testing;

pub use context::{ContextBuilder, SourceArchive};
pub use error::{BuildError, BuildResult};
pub use image::{normalize_image_name, normalize_image_names, split_image_tag};
pub use logs::{LogOptions, LogOutcome, LogStreamer};
pub use pipeline::{BuildParameters, BuildPipeline, PipelineOptions, QueuedBuild};
pub use progress::ConsoleSink;
pub use resolver::{relative_dockerfile_path, resolve_dockerfile};
pub use status::{MemorySink, StatusKind, StatusLine, StatusSink};
pub use submitter::{BuildSubmitter, RequestSpec};
pub use upload::{BlobUploader, UploadTargetResolver};
