mod settings;

use std::env;

use config::{Config, Environment, File};

use crate::config::settings::PartialSettings;
use crate::utils::error::SettingsError;

pub use settings::{BrokerSettings, ServerSettings, Settings, StoreSettings, TransportSettings};

/// Loads the configuration from the default file and environment variables.
///
/// Sources, lowest precedence first: built-in defaults, `config/default.*`,
/// `GQLSUB_<SECTION>__<KEY>` variables, then the conventional `DATABASE_URL`
/// and `PORT`. Fails when no database URL ends up configured.
pub fn load_config() -> Result<Settings, SettingsError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("GQLSUB")
                .prefix_separator("_")
                .separator("__"),
        )
        .set_override_option("store.database_url", env::var("DATABASE_URL").ok())?
        .set_override_option("server.port", env::var("PORT").ok())?;

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    let settings = Settings::merge(partial);

    if settings.store.database_url.trim().is_empty() {
        return Err(SettingsError::MissingDatabaseUrl);
    }

    Ok(settings)
}
