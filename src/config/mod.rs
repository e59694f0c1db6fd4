// Configuration module
// Public interface for configuration loading

mod loader;
mod settings;

pub use loader::{apply_env_overrides, load_config, parse_config};
pub use settings::{chinta_dir, DaemonConfig, ServerConfig};
