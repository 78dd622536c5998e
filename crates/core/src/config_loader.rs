use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};

use crate::config::TopLevelConfig;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the top-level configuration by merging TOML, environment
    /// variables, and JSON, in that order of increasing precedence.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed, or
    /// if the merged document fails to deserialize into `TopLevelConfig`.
    pub fn load() -> figment::Result<TopLevelConfig> {
        Figment::new()
            .merge(Toml::file("config/Config.toml"))
            .merge(Env::prefixed("LAYLINE_"))
            .join(Json::file("config/Config.json"))
            .extract()
    }

    /// Loads configuration with a profile-specific TOML overlay, e.g.
    /// `config/Config.dry_run.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_with_profile(profile: &str) -> figment::Result<TopLevelConfig> {
        Figment::new()
            .merge(Toml::file("config/Config.toml"))
            .merge(Toml::file(format!("config/Config.{profile}.toml")))
            .merge(Env::prefixed("LAYLINE_"))
            .join(Json::file("config/Config.json"))
            .extract()
    }
}
