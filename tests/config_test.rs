use deferq::config::{Backend, Config, Settings};

#[test]
fn partial_settings_keep_defaults() {
    let settings = Settings::from_toml(
        r#"
        deliver_if_present = false
        page_size = 25
        "#,
    )
    .unwrap();

    assert!(!settings.deliver_if_present);
    assert_eq!(settings.page_size, 25);
    assert!(settings.fallback_lookup);
    assert_eq!(settings.delivery_delay_ms, 1000);
    assert!(!settings.system_only_add);
    assert_eq!(settings.add_permission, "");
}

#[test]
fn empty_settings_file_is_all_defaults() {
    let settings = Settings::from_toml("").unwrap();
    assert_eq!(settings.page_size, 10);
    assert_eq!(settings.delivery_delay().as_millis(), 1000);
}

#[test]
fn zero_page_size_is_rejected() {
    assert!(Settings::from_toml("page_size = 0").is_err());
}

#[test]
fn mistyped_setting_is_rejected() {
    assert!(Settings::from_toml("deliver_if_present = \"yes\"").is_err());
}

#[test]
fn settings_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    std::fs::write(&path, "system_only_add = true\nadd_permission = \"deferq.add\"\n").unwrap();

    let settings = Settings::load(&path).unwrap();
    assert!(settings.system_only_add);
    assert_eq!(settings.add_permission, "deferq.add");

    assert!(Settings::load(&dir.path().join("missing.toml")).is_err());
}

#[test]
fn backend_names_parse() {
    assert_eq!("sqlite".parse::<Backend>().unwrap(), Backend::Sqlite);
    assert_eq!(" JSON ".parse::<Backend>().unwrap(), Backend::Document);
    assert_eq!("document".parse::<Backend>().unwrap(), Backend::Document);
    assert!("postgres".parse::<Backend>().is_err());
}

// Only test in this binary touching the environment.
#[test]
fn config_from_env_reads_backend_and_data_dir() {
    unsafe {
        std::env::set_var("DEFERQ_BACKEND", "document");
        std::env::set_var("DEFERQ_DATA_DIR", "/tmp/deferq-test");
        std::env::remove_var("DEFERQ_SETTINGS");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.storage.backend, Backend::Document);
    assert_eq!(config.storage.data_dir, std::path::PathBuf::from("/tmp/deferq-test"));
    assert!(!config.log_level.is_empty());

    unsafe {
        std::env::set_var("DEFERQ_BACKEND", "mongodb");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::remove_var("DEFERQ_BACKEND");
        std::env::remove_var("DEFERQ_DATA_DIR");
    }
}
