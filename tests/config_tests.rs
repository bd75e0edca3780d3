//! Integration tests for configuration files as the CLI sees them

use std::fs;
use std::path::PathBuf;

use oradeploy::config_file::DeploymentConfig;
use oradeploy::error::DeployError;
use oradeploy::types::{DatabaseEdition, OracleVersion};
use tempfile::TempDir;

#[test]
fn test_starter_config_needs_host_and_passwords() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("deploy.json");
    DeploymentConfig::starter(OracleVersion::V12c).save_to_file(&path).unwrap();

    let mut config = DeploymentConfig::load_from_file(&path).unwrap();
    assert_eq!(config.oracle.version, OracleVersion::V12c);
    assert_eq!(config.base_dir(), dir.path());
    let err = config.validate_values().unwrap_err();
    assert!(err.to_string().contains("host.address"));

    config.host.address = "db.example.com".to_string();
    config.oracle.sys_password = "Welcome1".to_string();
    config.oracle.system_password = "Welcome1".to_string();
    config.validate_values().unwrap();

    // The key file named by the starter does not exist yet
    let err = config.validate().unwrap_err();
    assert!(matches!(err.downcast_ref::<DeployError>(), Some(DeployError::Config(_))));
    fs::write(dir.path().join("oracle-database.pem"), "key").unwrap();
    config.validate().unwrap();
}

#[test]
fn test_unknown_fields_are_ignored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("deploy.json");
    fs::write(
        &path,
        r#"{
          "comment": "left over from an older release",
          "host": { "address": "10.0.0.5", "key_file": "/keys/db.pem", "shell": "bash" },
          "oracle": {
            "version": "11g",
            "edition": "SE",
            "sid": "prod",
            "global_db_name": "prod.example.com",
            "sys_password": "x",
            "system_password": "y"
          }
        }"#,
    )
    .unwrap();

    let config = DeploymentConfig::load_from_file(&path).unwrap();
    assert_eq!(config.oracle.version, OracleVersion::V11gR2);
    assert_eq!(config.oracle.edition, DatabaseEdition::Standard);
    assert_eq!(config.host.key_file, PathBuf::from("/keys/db.pem"));
    assert_eq!(config.host.user, "root");
    assert!(config.cloud.is_none());
}

#[test]
fn test_relative_media_resolves_against_config_dir() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("envs/prod");
    fs::create_dir_all(&nested).unwrap();
    let path = nested.join("deploy.json");

    let mut config = DeploymentConfig::default();
    config.oracle.media = vec![PathBuf::from("media/db.zip"), PathBuf::from("/abs/db2.zip")];
    config.save_to_file(&path).unwrap();

    let loaded = DeploymentConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded.resolve_path(&loaded.oracle.media[0]), nested.join("media/db.zip"));
    assert_eq!(loaded.resolve_path(&loaded.oracle.media[1]), PathBuf::from("/abs/db2.zip"));
}
