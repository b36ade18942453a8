//! sealgate-pipeline: envelope encryption of application files
//!
//! [`FilePipeline`] coordinates the object store, the metadata store, the
//! key server and the audit log. Every file is sealed under its own DEK;
//! the [`KeyManager`] decides whether that DEK comes from the KMS or is
//! generated locally and whether its wrapped form is stored.

pub mod admin_cache;
pub mod commit;
pub mod key_manager;
pub mod metrics;
pub mod pipeline;

pub use admin_cache::AdminCache;
pub use commit::{CommitHandle, CommitTracker};
pub use key_manager::{Dek, Kek, KeyManager};
pub use metrics::PipelineMetrics;
pub use pipeline::{
    object_key, Backends, ConsistencyReport, Encrypted, FilePipeline, PipelineSettings,
    Plaintext, RekeyReport, Upload,
};
