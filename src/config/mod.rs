mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{EmitterSettings, ListenerSettings, LogSettings, Settings};

/// Prefix of environment variables read by [`load_config`].
pub const ENV_PREFIX: &str = "BUSLINE";

/// Loads `config/default.*` (if present) and `BUSLINE_*` environment
/// variables on top of the built-in defaults.
///
/// Nested keys use `__`, lists are comma separated:
/// `BUSLINE_LISTENER__NSQD=10.0.0.1:4150,10.0.0.2:4150`.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Like [`load_config`] but reads the file at `path` (extension optional).
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("listener.lookup")
                .with_list_parse_key("listener.nsqd")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}
