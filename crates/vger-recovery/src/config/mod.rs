mod defaults;
mod resolve;
mod types;

pub use self::defaults::parse_human_size;
pub use self::resolve::{load_config, resolve_config_path, ConfigSource, CONFIG_ENV_VAR};
pub use self::types::*;
