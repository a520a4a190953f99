//! Stack file configuration.
//!
//! This module handles everything about `stackplan.yaml`:
//! - Parsing and deserializing the stack file
//! - Environment overrides and `.env` loading
//! - Validation against the kind catalog
//! - Hashing for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use spec::{
    ExecutionConfig, OutputConfig, ProjectConfig, ProviderBackend, ProviderConfig, ResourceConfig,
    StackConfig, StateBackend, StateConfig,
};
pub use validator::{ConfigValidator, REMOVAL_POLICIES, ValidationError, ValidationResult};
