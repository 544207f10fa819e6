use std::io::Write;
use tempfile::{NamedTempFile, tempdir};
use tunnel_core::config::{Config, ConfigError, ConfigManager};
use tunnel_core::logging::DEFAULT_BUFFER_CAPACITY;
use tunnel_core::TunnelConfig;

#[test]
fn test_load_valid_config() {
    let mut file = NamedTempFile::new().unwrap();

    let config_str = r#"
        log_level = "debug"

        [logging]
        console_echo = true
        files_dir = "/data/external/files"
        buffer_capacity = 4096

        [[tunnels]]
        config_id = "abc-123"
        options = { masquerade_ip4 = "10.8.0.2" }

        [[tunnels]]
        config_id = "backup"
        kind = "openvpn"
    "#;

    file.write_all(config_str.as_bytes()).unwrap();

    let config = Config::load(file.path()).unwrap();

    assert_eq!(config.log_level, "debug");
    assert!(config.logging.console_echo);
    assert_eq!(
        config.logging.files_dir,
        Some("/data/external/files".to_string())
    );
    assert_eq!(config.logging.buffer_capacity, 4096);
    assert_eq!(config.tunnels.len(), 2);

    let tunnel = config.tunnel("abc-123").unwrap();
    assert_eq!(tunnel.kind, "openvpn");
    assert_eq!(tunnel.option("masquerade_ip4"), Some("10.8.0.2"));
    assert!(config.tunnel("missing").is_none());

    let options = config.logging.diagnostic_options();
    assert!(options.console_echo);
    assert_eq!(options.buffer_capacity, 4096);
}

#[test]
fn test_load_minimal_config_uses_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"").unwrap();

    let config = Config::load(file.path()).unwrap();

    assert_eq!(config.log_level, "info");
    assert_eq!(config.logging.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
    assert_eq!(config.logging.files_dir, None);
    assert!(!config.logging.log_to_file);
    assert!(config.tunnels.is_empty());
}

#[test]
fn test_missing_file() {
    let dir = tempdir().unwrap();
    let result = Config::load(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
}

#[test]
fn test_invalid_toml() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"log_level = [").unwrap();

    let result = Config::load(file.path());
    assert!(matches!(result, Err(ConfigError::TomlError(_))));
}

#[test]
fn test_zero_buffer_capacity_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"[logging]\nbuffer_capacity = 0\n").unwrap();

    let result = Config::load(file.path());
    assert!(matches!(
        result,
        Err(ConfigError::InvalidValue { ref key, .. }) if key == "logging.buffer_capacity"
    ));
}

#[test]
fn test_duplicate_tunnel_ids_are_rejected() {
    let mut config = Config::new();
    config.tunnels.push(TunnelConfig::new("same"));
    config.tunnels.push(TunnelConfig::new("same"));

    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue { .. })
    ));
}

#[test]
fn test_empty_tunnel_id_is_rejected() {
    let mut config = Config::new();
    config.tunnels.push(TunnelConfig::new("  "));

    assert!(matches!(
        config.validate(),
        Err(ConfigError::MissingValue(_))
    ));
}

#[test]
fn test_unknown_kind_is_rejected() {
    let mut config = Config::new();
    config
        .tunnels
        .push(TunnelConfig::new("wg").with_kind("wireguard"));

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("wireguard"));
}

#[test]
fn test_ipsec_kind_is_accepted() {
    let mut config = Config::new();
    config.tunnels.push(
        TunnelConfig::new("office")
            .with_kind("ipsec")
            .with_option("gateway", "vpn.example.com"),
    );

    assert!(config.validate().is_ok());
}

#[test]
fn test_save_and_reload() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = Config::new();
    config.log_level = "warn".to_string();
    config.logging.files_dir = Some(dir.path().display().to_string());
    config
        .tunnels
        .push(TunnelConfig::new("abc-123").with_option("masquerade_ip6", "fd00::2"));
    config.save(&path).unwrap();

    let mut manager = ConfigManager::load(&path).unwrap();
    assert_eq!(manager.config_path(), path.as_path());
    assert_eq!(manager.config().log_level, "warn");
    assert_eq!(manager.config().tunnels, config.tunnels);

    std::fs::write(&path, "log_level = \"error\"\n").unwrap();
    manager.reload().unwrap();
    assert_eq!(manager.config().log_level, "error");
    assert!(manager.config().tunnels.is_empty());
}
