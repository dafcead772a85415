//! Stack artifacts, deployed snapshots, parameters and waiters.

mod artifact;
mod hash;
mod params;
mod snapshot;
mod waiters;

pub use artifact::{
    ASSET_PATH_METADATA, LOGICAL_ID_METADATA, MetadataEntry, ResourceMetadata, StackArtifact,
    parse_template_body,
};
pub use hash::TemplateHasher;
pub use params::{
    ParameterChanges, ParameterPlan, SSM_SKIP_MARKER, TemplateParameter, TemplateParameters,
};
pub use snapshot::StackSnapshot;
pub use waiters::{DEFAULT_POLL_INTERVAL, StackWaiter};
