pub mod config;
pub mod retry;

use std::path::Path;

use tracing::debug;
use vigil_core::PolicyConfig;

/// The policy file when given, otherwise defaults plus environment overrides.
pub fn load(source: Option<&Path>) -> vigil_core::ConfigResult<PolicyConfig> {
    match source {
        Some(path) => {
            debug!(path = %path.display(), "loading policy config from file");
            PolicyConfig::from_toml_file(path)
        }
        None => {
            debug!("loading policy config from defaults and VIGIL_* environment");
            PolicyConfig::load_from_environment()
        }
    }
}
