//! Stack file handling.
//!
//! This module handles everything read from disk before a deployment:
//! - Parsing `halldyll.stack.yaml` and the templates it points at
//! - Environment overrides and `.env` loading
//! - Validation of names, ARNs, tags and templates

mod parser;
mod spec;
mod validator;

pub use parser::{
    API_TOKEN_ENV, ConfigParser, DEFAULT_STACK_FILES, ENDPOINT_ENV, STACK_NAME_ENV,
    apply_overrides, find_stack_file,
};
pub use spec::{
    ControlPlaneConfig, DeploySettings, MetadataConfig, MethodConfig, StackConfig, StackFile,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
