use std::{collections::HashMap, path::Path};

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Prefix of environment variables overlaid on the file, e.g.
/// `SNEAK_LINK__SIGNING_KEY` or `SNEAK_LINK__RATE_LIMIT__REQUESTS`.
pub const ENV_PREFIX: &str = "SNEAK_LINK";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from an optional file plus `SNEAK_LINK__*` environment
/// variables. Supports TOML, YAML, JSON and INI files; environment wins.
pub fn load_config(config_path: Option<&str>) -> Result<GatewayConfig> {
    load_with_env(config_path, None)
}

/// Format by extension, TOML when unknown.
fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    }
}

/// `env` replaces the process environment when given.
fn load_with_env(
    config_path: Option<&str>,
    env: Option<HashMap<String, String>>,
) -> Result<GatewayConfig> {
    let mut builder = Config::builder();

    if let Some(raw) = config_path {
        let path = Path::new(raw);
        if !path.exists() {
            eyre::bail!("Config file {} does not exist", path.display());
        }
        builder = builder.add_source(File::new(raw, file_format(path)));
    }

    let settings = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        )
        .build()
        .with_context(|| match config_path {
            Some(path) => format!("Failed to build config from {path}"),
            None => "Failed to build config from environment".to_string(),
        })?;

    let gateway_config: GatewayConfig = settings
        .try_deserialize()
        .wrap_err("Failed to deserialize gateway configuration")?;

    tracing::debug!(
        services = gateway_config.services.len(),
        "Loaded gateway configuration"
    );
    Ok(gateway_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    const TOML_CONFIG: &str = r#"
listen_addr = "127.0.0.1:3000"
signing_key = "0123456789abcdef0123456789abcdef"

[rate_limit]
requests = 3
window = "1m"

[[services]]
hostname = "cloud.example.com"
type = "nextcloud"
url = "http://nextcloud:8080"

[[services]]
hostname = "photos.example.com"
type = "immich"
url = "http://immich:2283"
grants_session = false
"#;

    fn write_temp(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(suffix).unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    #[test]
    fn test_load_toml_config() {
        let file = write_temp(".toml", TOML_CONFIG);
        let config = load_with_env(file.path().to_str(), Some(HashMap::new())).unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[1].service_type, "immich");
        assert_eq!(config.services[1].grants_session, Some(false));
        assert_eq!(config.rate_limit.requests, 3);
        assert_eq!(config.rate_limit.window, "1m");
        // Untouched sections keep their defaults
        assert_eq!(config.session.max_age, "24h");
    }

    #[test]
    fn test_load_yaml_config() {
        let yaml = r#"
signing_key: "yaml-key"
services:
  - hostname: "docs.example.com"
    type: "paperless"
    url: "https://paperless.internal"
    cookie_domain: "example.com"
"#;
        let file = write_temp(".yaml", yaml);
        let config = load_with_env(file.path().to_str(), Some(HashMap::new())).unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.services[0].cookie_domain.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_temp(".toml", TOML_CONFIG);
        let env = HashMap::from([
            ("SNEAK_LINK__SIGNING_KEY".to_string(), "from-env".to_string()),
            ("SNEAK_LINK__RATE_LIMIT__REQUESTS".to_string(), "7".to_string()),
            ("SNEAK_LINK__LOGGING__JSON".to_string(), "false".to_string()),
        ]);
        let config = load_with_env(file.path().to_str(), Some(env)).unwrap();

        assert_eq!(config.signing_key, "from-env");
        assert_eq!(config.rate_limit.requests, 7);
        assert!(!config.logging.json);
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = load_with_env(Some("/definitely/not/here.toml"), Some(HashMap::new()));
        assert!(result.is_err());
    }

    #[test]
    fn test_environment_only() {
        let env = HashMap::from([(
            "SNEAK_LINK__SIGNING_KEY".to_string(),
            "only-env".to_string(),
        )]);
        let config = load_with_env(None, Some(env)).unwrap();
        assert_eq!(config.signing_key, "only-env");
        assert!(config.services.is_empty());
    }
}
