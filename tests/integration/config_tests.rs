use dupedex::actions::DeleteMode;
use dupedex::duplicates::LinkKind;
use dupedex::scanner::SymlinkPolicy;
use dupedex::EngineConfig;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::{Figment, Jail};
use std::path::Path;

#[test]
fn test_config_load_defaults() {
    // Use figment directly without Env to avoid interference from the environment
    let config: EngineConfig = Figment::from(Serialized::defaults(EngineConfig::default()))
        .extract()
        .unwrap();
    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.io_threads, 4);
}

#[test]
fn test_config_load_from_toml() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
            io_threads = 8
            chunk_size = 131072
            symlinks = "follow"
            link_kind = "symbolic"
            allow_symlink_fallback = true
            verify_cross_volume_moves = false
            min_size = 1024
            scan_timeout_secs = 60
            "#,
        )?;

        let config = EngineConfig::load_from(Path::new("config.toml")).unwrap();
        assert_eq!(config.io_threads, 8);
        assert_eq!(config.chunk_size, 131_072);
        assert_eq!(config.symlinks, SymlinkPolicy::Follow);
        assert_eq!(config.link_kind, LinkKind::Symbolic);
        assert!(config.allow_symlink_fallback);
        assert!(!config.verify_cross_volume_moves);
        assert_eq!(config.min_size, Some(1024));
        assert_eq!(config.scan_timeout().map(|d| d.as_secs()), Some(60));

        let finder = config.finder_config();
        assert_eq!(finder.io_threads, 8);
        assert_eq!(finder.walker_config.symlinks, SymlinkPolicy::Follow);
        Ok(())
    });
}

#[test]
fn test_env_overrides_file() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", "delete_mode = \"trash\"\nskip_hidden = true")?;
        jail.set_env("DUPEDEX_DELETE_MODE", "permanent");
        jail.set_env("DUPEDEX_INCLUDE_EMPTY", "false");

        let config = EngineConfig::load_from(Path::new("config.toml")).unwrap();
        assert_eq!(config.delete_mode, DeleteMode::Permanent);
        assert!(!config.include_empty);
        assert!(config.skip_hidden);
        Ok(())
    });
}

#[test]
fn test_env_layer_alone() {
    Jail::expect_with(|jail| {
        jail.set_env("DUPEDEX_IO_THREADS", "16");
        let config: EngineConfig = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Env::prefixed("DUPEDEX_"))
            .extract()?;
        assert_eq!(config.io_threads, 16);
        Ok(())
    });
}

#[test]
fn test_bad_enum_value_rejected() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", "symlinks = \"sometimes\"")?;
        let figment = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file("config.toml"));
        assert!(figment.extract::<EngineConfig>().is_err());
        Ok(())
    });
}
