use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use shelfcache::config::{Config, ConfigError};
use shelfcache::content::DigestAlgorithm;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn test_config_load_defaults() {
    // Use figment directly without Env to avoid interference from other tests
    let figment = Figment::from(Serialized::defaults(Config::default()));
    let config = Config::from_figment(&figment).unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.signed_url_ttl_secs, 3600);
    assert_eq!(config.hash_buffer_size, 64 * 1024);
}

#[test]
fn test_config_load_from_toml() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
cache_root = "/srv/shelf/cache"
bucket = "archive"
digest_algorithm = "blake3"
signed_url_ttl_secs = 600
"#,
    )
    .unwrap();

    let figment = Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(&path));
    let config = Config::from_figment(&figment).unwrap();

    assert_eq!(config.cache_root, PathBuf::from("/srv/shelf/cache"));
    assert_eq!(config.bucket, "archive");
    assert_eq!(config.digest_algorithm, DigestAlgorithm::Blake3);
    assert_eq!(config.signed_url_ttl_secs, 600);
    // Unset keys keep their defaults
    assert_eq!(config.key_prefix, "books");
}

#[test]
fn test_env_overrides_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "bucket = \"from-file\"\nkey_prefix = \"uploads\"\n").unwrap();

    // A prefix private to this test keeps parallel tests independent
    std::env::set_var("SHELFCACHE_ENVTEST_BUCKET", "from-env");
    let figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("SHELFCACHE_ENVTEST_"));
    let config = Config::from_figment(&figment).unwrap();
    std::env::remove_var("SHELFCACHE_ENVTEST_BUCKET");

    assert_eq!(config.bucket, "from-env");
    assert_eq!(config.key_prefix, "uploads");
}

#[test]
fn test_unknown_algorithm_is_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "digest_algorithm = \"md5\"\n").unwrap();

    let figment = Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(&path));
    assert!(matches!(
        Config::from_figment(&figment),
        Err(ConfigError::Figment(_))
    ));
}

#[test]
fn test_invalid_toml_is_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "invalid = toml").unwrap();

    let figment = Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(&path));
    assert!(Config::from_figment(&figment).is_err());
}

#[test]
fn test_out_of_range_value_is_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "hash_buffer_size = 0\n").unwrap();

    let figment = Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(&path));
    assert!(matches!(
        Config::from_figment(&figment),
        Err(ConfigError::Invalid {
            key: "hash_buffer_size",
            ..
        })
    ));
}

#[test]
fn test_load_explicit_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("shelf.toml");
    fs::write(&path, "signed_url_ttl_secs = 42\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.signed_url_ttl_secs, 42);
}
