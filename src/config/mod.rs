mod settings;

pub use settings::{Config, TomlConfig, DEFAULT_SERVER_URL, EXAMPLE_CONFIG};
