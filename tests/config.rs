use ir_borrowck::config::{self, DEFAULT_CONFIG_FILE_NAME};
use ir_borrowck::{Config, IrDetail, Scope, UnknownCallPolicy};
use std::fs;

#[test]
fn config_file_overrides_defaults() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join(DEFAULT_CONFIG_FILE_NAME);
    fs::write(
        &path,
        r#"
[check]
scope = "all"
max_summary_depth = 5
unknown_call_policy = "conservative"
ir_detail = "lowered"
target_module = "app"
"#,
    )
    .expect("write config");

    let cfg = config::load_config_file(&path).expect("config should load");
    assert_eq!(
        cfg,
        Config::default()
            .with_scope(Scope::All)
            .with_max_summary_depth(5)
            .with_unknown_call_policy(UnknownCallPolicy::Conservative)
            .with_ir_detail(IrDetail::Lowered)
            .with_target_module("app")
    );
}

#[test]
fn missing_keys_keep_their_defaults() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join(DEFAULT_CONFIG_FILE_NAME);
    fs::write(&path, "[check]\nscope = \"module\"\n").expect("write config");

    let cfg = config::load_config_file(&path).expect("config should load");
    assert_eq!(cfg.scope, Scope::Module);
    assert_eq!(cfg.max_summary_depth, 3);
    assert_eq!(cfg.unknown_call_policy, UnknownCallPolicy::Permissive);

    fs::write(&path, "").expect("write config");
    let cfg = config::load_config_file(&path).expect("empty config should load");
    assert_eq!(cfg, Config::default());
}

#[test]
fn config_is_found_in_parent_directories() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let nested = tmp.path().join("a/b/c");
    fs::create_dir_all(&nested).expect("create dirs");
    assert!(config::load_config(None, &nested).expect("load").is_none());

    let path = tmp.path().join(DEFAULT_CONFIG_FILE_NAME);
    fs::write(&path, "[check]\ndebug = true\n").expect("write config");

    assert_eq!(config::find_config_file(&nested), Some(path.clone()));
    let (found, cfg) = config::load_config(None, &nested)
        .expect("load")
        .expect("config should be found");
    assert_eq!(found, path);
    assert!(cfg.debug);
}

#[test]
fn explicit_path_wins_over_discovery() {
    let tmp = tempfile::tempdir().expect("tempdir");
    fs::write(
        tmp.path().join(DEFAULT_CONFIG_FILE_NAME),
        "[check]\nscope = \"user\"\n",
    )
    .expect("write config");
    let explicit = tmp.path().join("strict.toml");
    fs::write(&explicit, "[check]\nunknown_call_policy = \"conservative\"\n")
        .expect("write config");

    let (found, cfg) = config::load_config(Some(explicit.as_path()), tmp.path())
        .expect("load")
        .expect("explicit config");
    assert_eq!(found, explicit);
    assert_eq!(cfg.scope, Scope::Function);
    assert_eq!(cfg.unknown_call_policy, UnknownCallPolicy::Conservative);
}

#[test]
fn invalid_config_names_the_file() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join(DEFAULT_CONFIG_FILE_NAME);
    fs::write(&path, "[check]\nscope = \"galaxy\"\n").expect("write config");

    let err = config::load_config_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains(DEFAULT_CONFIG_FILE_NAME), "{err:#}");
}

#[test]
fn target_module_is_not_part_of_the_signature() {
    let base = Config::default();
    assert_eq!(
        base.signature(),
        base.clone().with_target_module("other").signature()
    );
    assert_ne!(
        base.signature(),
        base.clone().with_scope(Scope::All).signature()
    );
}
