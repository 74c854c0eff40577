use std::fs;

use super::*;

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
    assert_eq!(
        normalize_database_url("data\\okr.db"),
        "sqlite://data/okr.db"
    );
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(normalize_database_url("  "), Settings::default().database_url);
}

#[test]
fn creates_parent_dir_for_file_databases() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("nested").join("okr.db");

    let url = prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare");
    assert!(url.starts_with("sqlite://"));
    assert!(dir.path().join("nested").is_dir());
}

#[test]
fn memory_databases_need_no_directory() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(
        sqlite_path("sqlite://./data/okr.db?mode=rwc"),
        Some(PathBuf::from("./data/okr.db"))
    );
}

#[tokio::test]
async fn prepared_url_opens_a_real_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("deep").join("server.db");

    let url = prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare");
    let storage = storage::Storage::new(&url).await.expect("open sqlite");
    drop(storage);
    assert!(db_path.exists(), "missing {}", db_path.display());
}

#[test]
fn settings_file_overrides_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("server.toml");
    fs::write(
        &path,
        "server_bind = \"0.0.0.0:9000\"\ncurrency = \"eur\"\nmax_attachment_bytes = 1024\n",
    )
    .expect("write settings");

    let settings = load_settings_from(&path).expect("settings");
    assert_eq!(settings.server_bind, "0.0.0.0:9000");
    assert_eq!(settings.currency, "eur");
    assert_eq!(settings.max_attachment_bytes, 1024);
    assert_eq!(settings.token_ttl_seconds, 86_400);
    assert_eq!(settings.payment_provider, "sandbox");
}

#[test]
fn missing_settings_file_uses_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = load_settings_from(&dir.path().join("absent.toml")).expect("settings");
    assert_eq!(settings.server_bind, "127.0.0.1:8080");
    assert_eq!(settings.jwt_secret, "dev-secret-change-me");
}

#[test]
fn stripe_requires_a_secret_key() {
    let settings = Settings {
        payment_provider: "stripe".into(),
        ..Settings::default()
    };
    assert!(settings.build_payment_provider().is_err());

    let settings = Settings {
        payment_provider: "Stripe".into(),
        stripe_secret_key: Some("sk_test_123".into()),
        ..Settings::default()
    };
    assert!(settings.build_payment_provider().is_ok());

    let settings = Settings {
        payment_provider: "paypal".into(),
        ..Settings::default()
    };
    assert!(settings.build_payment_provider().is_err());
}
