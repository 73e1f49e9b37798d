use config::{Config, ConfigError, Environment, File};
use infrastructure::{HttpServerConfig, MonitoringConfig, MqttConfig};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub octopus: crate::adapter::kraken::Octopus,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub homeassistant: crate::adapter::homeassistant::HomeAssistant,
    pub http_server: Option<HttpServerConfig>,
    pub monitoring: MonitoringConfig,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(Config::builder().add_source(File::with_name("config.toml").required(false)))
    }

    fn load(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self, ConfigError> {
        builder
            .add_source(Environment::default().separator("__").list_separator(","))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use config::FileFormat;

    use super::*;

    const MINIMAL: &str = r#"
        [octopus]
        email = "user@example.com"
        password = "secret"

        [mqtt]
        host = "localhost"
        port = 1883
        client_id = "octopus-energy-jp"

        [monitoring]
        service_name = "octopus-energy-jp"
        app_name = "octopus-energy-jp"
    "#;

    fn load(toml: &str) -> Settings {
        Settings::load(Config::builder().add_source(File::from_str(toml, FileFormat::Toml))).unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let settings = load(MINIMAL);

        assert_eq!(settings.octopus.api_url, "https://api.oejp-kraken.energy/v1/graphql/");
        assert_eq!(settings.octopus.scan_interval(), std::time::Duration::from_secs(30 * 60));
        assert_eq!(settings.octopus.account_number, None);
        assert_eq!(settings.homeassistant.discovery_prefix, "homeassistant");
        assert_eq!(settings.homeassistant.base_topic, "octopus_energy_jp");
        assert!(settings.http_server.is_none());
    }

    #[test]
    fn explicit_values_win() {
        let settings = load(&format!(
            "{MINIMAL}\n{}",
            r#"
            [homeassistant]
            discovery_prefix = "ha"
            base_topic = "energy"

            [http_server]
            port = 8080
            "#
        ));

        assert_eq!(settings.homeassistant.discovery_prefix, "ha");
        assert_eq!(settings.http_server.map(|s| s.port), Some(8080));
    }

    #[test]
    fn credentials_are_required() {
        let result = Settings::load(Config::builder().add_source(File::from_str(
            r#"
            [mqtt]
            host = "localhost"
            port = 1883
            client_id = "x"
            "#,
            FileFormat::Toml,
        )));

        assert!(result.is_err());
    }
}
