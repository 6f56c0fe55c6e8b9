use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cascadenv::{DotEnv, Error, Options, ParseErrorKind, TargetEnv};
use serial_test::serial;
use tempfile::TempDir;

#[test]
fn load_keeps_existing_values_without_override() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let file = dir.path().join(".env");
    write_file(&file, "A=from_file\nB=2\n");

    let mut loader = loader_with(&[("A", "existing")]);
    let report = loader.load([&file]).expect("load should succeed");

    assert_eq!(report.files_read, 1);
    assert_eq!(report.loaded, 1);
    assert_eq!(report.skipped_existing, 1);
    assert_eq!(get(&loader, "A"), "existing");
    assert_eq!(get(&loader, "B"), "2");
}

#[test]
fn overload_replaces_existing_values() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let file = dir.path().join(".env");
    write_file(&file, "A=from_file\n");

    let mut loader = loader_with(&[("A", "existing")]);
    let report = loader.overload([&file]).expect("overload should succeed");

    assert_eq!(report.loaded, 1);
    assert_eq!(report.skipped_existing, 0);
    assert_eq!(get(&loader, "A"), "from_file");
}

#[test]
fn multi_file_load_uses_last_file_precedence() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let first = dir.path().join(".env.base");
    let second = dir.path().join(".env.extra");
    write_file(&first, "A=base\nB=base\n");
    write_file(&second, "B=extra\nC=extra\n");

    let mut loader = DotEnv::new();
    let report = loader.load([first, second]).expect("load should succeed");

    assert_eq!(report.files_read, 2);
    assert_eq!(report.loaded, 4);
    assert_eq!(get(&loader, "A"), "base");
    assert_eq!(get(&loader, "B"), "extra");
    assert_eq!(get(&loader, "C"), "extra");
}

#[test]
fn later_files_resolve_against_earlier_loads() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let first = dir.path().join(".env");
    let second = dir.path().join(".env.urls");
    write_file(&first, "HOST=db.internal\n");
    write_file(&second, "DSN=\"postgres://${HOST}:${PORT:-5432}/app\"\n");

    let mut loader = DotEnv::new();
    loader.load([first, second]).expect("load should succeed");

    assert_eq!(get(&loader, "DSN"), "postgres://db.internal:5432/app");
}

#[test]
fn missing_file_returns_path_error() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let missing = dir.path().join("missing.env");

    let mut loader = DotEnv::new();
    let err = loader.load([&missing]).expect_err("expected path error");

    match err {
        Error::Path { path, .. } => assert_eq!(path, missing),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn malformed_file_returns_parse_error_and_applies_nothing() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let file = dir.path().join(".env");
    write_file(&file, "A=ok\nBAD LINE\n");

    let mut loader = DotEnv::new();
    let err = loader.load([&file]).expect_err("expected parse error");

    match err {
        Error::Parse(parse_err) => {
            assert_eq!(parse_err.kind, ParseErrorKind::WhitespaceAfterName);
            assert_eq!(parse_err.line, 2);
            assert_eq!(parse_err.path.as_deref(), Some(file.as_path()));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(loader.target_env().get_var("A").is_none());
}

#[test]
fn non_utf8_file_returns_path_error() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let file = dir.path().join(".env");
    std::fs::write(&file, b"A=\xff\n").expect("failed to write test file");

    let mut loader = DotEnv::new();
    let err = loader.load([&file]).expect_err("expected encoding error");
    match err {
        Error::Path { path, source } => {
            assert_eq!(path, file);
            assert_eq!(source.kind(), std::io::ErrorKind::InvalidData);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn cascade_names_the_file_with_invalid_encoding() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = dir.path().join(".env");
    let local = sibling(&base, "local");
    write_file(&base, "A=base\n");
    std::fs::write(&local, b"A=\xff\n").expect("failed to write test file");

    let mut loader = DotEnv::new();
    let err = loader
        .load_env(&base, Options::new())
        .expect_err("expected encoding error");

    assert!(
        err.to_string().contains(".env.local"),
        "expected file name in message: {err}"
    );
    match err {
        Error::Path { path, .. } => assert_eq!(path, local),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn cascade_applies_files_in_precedence_order() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = dir.path().join(".env");
    write_file(&base, "A=base\nB=base\nC=base\nD=base\n");
    write_file(&sibling(&base, "local"), "B=local\nC=local\nD=local\n");
    write_file(&sibling(&base, "dev"), "C=dev\nD=dev\n");
    write_file(&sibling(&base, "dev.local"), "D=dev_local\n");
    write_file(&sibling(&base, "prod"), "A=prod\n");

    let mut loader = DotEnv::new();
    loader
        .load_env(&base, Options::new())
        .expect("load_env should succeed");

    assert_eq!(get(&loader, "APP_ENV"), "dev");
    assert_eq!(get(&loader, "A"), "base");
    assert_eq!(get(&loader, "B"), "local");
    assert_eq!(get(&loader, "C"), "dev");
    assert_eq!(get(&loader, "D"), "dev_local");
}

#[test]
fn cascade_reads_files_in_precedence_order() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = dir.path().join("base");
    write_file(&base, "A=base\nB=base\n");
    write_file(&sibling(&base, "local"), "B=local\n");
    write_file(&sibling(&base, "prod"), "A=prod\n");
    write_file(&sibling(&base, "dev"), "A=dev\n");

    let mut loader = DotEnv::new();
    let report = loader
        .load_env(&base, Options::new())
        .expect("load_env should succeed");

    assert_eq!(
        report.files,
        vec![base.clone(), sibling(&base, "local"), sibling(&base, "dev")]
    );
    assert_eq!(report.files_read, 3);
    assert_eq!(get(&loader, "A"), "dev");
    assert_eq!(get(&loader, "B"), "local");
}

#[test]
fn cascade_for_test_environment_skips_local_in_report() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = dir.path().join(".env");
    write_file(&base, "A=base\n");
    write_file(&sibling(&base, "local"), "A=local\n");
    write_file(&sibling(&base, "test"), "A=test\n");

    let mut loader = loader_with(&[("APP_ENV", "test")]);
    let report = loader
        .load_env(&base, Options::new().test_envs(["test"]))
        .expect("load_env should succeed");

    assert_eq!(report.files, vec![base.clone(), sibling(&base, "test")]);
}

#[test]
fn cascade_without_env_specific_files_stops_after_local() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = dir.path().join(".env");
    write_file(&base, "A=base\n");
    write_file(&sibling(&base, "local"), "A=local\n");
    write_file(&sibling(&base, "prod"), "A=prod\n");

    let mut loader = DotEnv::new();
    loader
        .load_env(&base, Options::new())
        .expect("load_env should succeed");

    assert_eq!(get(&loader, "APP_ENV"), "dev");
    assert_eq!(get(&loader, "A"), "local");
}

#[test]
fn cascade_falls_back_to_dist_file() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = dir.path().join(".env");
    write_file(&sibling(&base, "dist"), "FROM=dist\n");

    let mut loader = DotEnv::new();
    loader
        .load_env(&base, Options::new())
        .expect("load_env should succeed");

    assert_eq!(get(&loader, "FROM"), "dist");
}

#[test]
fn cascade_prefers_base_over_dist() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = dir.path().join(".env");
    write_file(&base, "FROM=base\n");
    write_file(&sibling(&base, "dist"), "FROM=dist\nONLY_DIST=1\n");

    let mut loader = DotEnv::new();
    loader
        .load_env(&base, Options::new())
        .expect("load_env should succeed");

    assert_eq!(get(&loader, "FROM"), "base");
    assert!(loader.target_env().get_var("ONLY_DIST").is_none());
}

#[test]
fn cascade_fails_without_base_or_dist() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = dir.path().join(".env");

    let mut loader = DotEnv::new();
    let err = loader
        .load_env(&base, Options::new())
        .expect_err("expected path error");

    match err {
        Error::Path { path, .. } => assert_eq!(path, base),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn cascade_respects_preset_app_environment() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = dir.path().join(".env");
    write_file(&base, "APP_ENV=dev\nA=base\n");
    write_file(&sibling(&base, "prod"), "A=prod\n");
    write_file(&sibling(&base, "dev"), "A=dev\n");

    let mut loader = loader_with(&[("APP_ENV", "prod")]);
    loader
        .load_env(&base, Options::new())
        .expect("load_env should succeed");

    assert_eq!(get(&loader, "APP_ENV"), "prod");
    assert_eq!(get(&loader, "A"), "prod");
}

#[test]
fn cascade_skips_local_file_for_test_environments() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = dir.path().join(".env");
    write_file(&base, "A=base\n");
    write_file(&sibling(&base, "local"), "A=local\nLOCAL_ONLY=1\n");
    write_file(&sibling(&base, "test"), "A=test\n");

    let mut loader = loader_with(&[("APP_ENV", "test")]);
    loader
        .load_env(&base, Options::new().test_envs(["test"]))
        .expect("load_env should succeed");

    assert_eq!(get(&loader, "A"), "test");
    assert!(loader.target_env().get_var("LOCAL_ONLY").is_none());
}

#[test]
fn cascade_adopts_app_environment_from_local_file() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = dir.path().join(".env");
    write_file(&base, "A=base\n");
    write_file(&sibling(&base, "local"), "APP_ENV=staging\n");
    write_file(&sibling(&base, "staging"), "A=staging\n");
    write_file(&sibling(&base, "dev"), "A=dev\n");

    let mut loader = DotEnv::new();
    loader
        .load_env(&base, Options::new())
        .expect("load_env should succeed");

    assert_eq!(get(&loader, "APP_ENV"), "staging");
    assert_eq!(get(&loader, "A"), "staging");
}

#[test]
fn cascade_stops_for_local_environment() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = dir.path().join(".env");
    write_file(&base, "A=base\n");
    write_file(&sibling(&base, "local"), "APP_ENV=local\n");
    write_file(&sibling(&base, "local.local"), "A=local_local\n");

    let mut loader = DotEnv::new();
    loader
        .load_env(&base, Options::new())
        .expect("load_env should succeed");

    assert_eq!(get(&loader, "APP_ENV"), "local");
    assert_eq!(get(&loader, "A"), "base");
}

#[test]
fn cascade_uses_custom_keys_and_restores_options() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = dir.path().join(".env");
    write_file(&base, "A=base\n");
    write_file(&sibling(&base, "qa"), "A=qa\n");

    let mut loader = DotEnv::new();
    loader
        .load_env(&base, Options::new().env_key("STAGE").default_env("qa"))
        .expect("load_env should succeed");

    assert_eq!(get(&loader, "STAGE"), "qa");
    assert_eq!(get(&loader, "A"), "qa");
    assert!(loader.target_env().get_var("APP_ENV").is_none());
    assert_eq!(loader.config().env_key, "APP_ENV");
    assert_eq!(loader.config().default_env, "dev");
}

#[test]
fn cascade_error_in_sibling_aborts_and_restores_options() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = dir.path().join(".env");
    let local = sibling(&base, "local");
    write_file(&base, "A=base\n");
    write_file(&local, "A='unterminated\n");

    let mut loader = DotEnv::new();
    let err = loader
        .load_env(&base, Options::new().default_env("qa"))
        .expect_err("expected parse error");

    match err {
        Error::Parse(parse_err) => {
            assert_eq!(parse_err.kind, ParseErrorKind::UnterminatedQuote);
            assert_eq!(parse_err.path.as_deref(), Some(local.as_path()));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(loader.config().default_env, "dev");
}

#[test]
fn boot_env_defaults_debug_by_environment() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = dir.path().join(".env");
    write_file(&base, "A=1\n");

    let mut dev = DotEnv::new();
    dev.boot_env(&base, Options::new()).expect("boot should succeed");
    assert_eq!(get(&dev, "APP_DEBUG"), "1");

    let mut prod = loader_with(&[("APP_ENV", "prod")]);
    prod.boot_env(&base, Options::new()).expect("boot should succeed");
    assert_eq!(get(&prod, "APP_DEBUG"), "0");

    let mut custom = loader_with(&[("APP_ENV", "live")]);
    custom
        .boot_env(&base, Options::new().prod_envs(["live"]))
        .expect("boot should succeed");
    assert_eq!(get(&custom, "APP_DEBUG"), "0");
}

#[test]
fn boot_env_normalizes_existing_debug_flag() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = dir.path().join(".env");
    write_file(&base, "APP_DEBUG=off\n");

    let mut from_file = DotEnv::new();
    from_file
        .boot_env(&base, Options::new())
        .expect("boot should succeed");
    assert_eq!(get(&from_file, "APP_DEBUG"), "0");

    let mut preset = loader_with(&[("APP_ENV", "prod"), ("APP_DEBUG", "true")]);
    preset
        .boot_env(&base, Options::new())
        .expect("boot should succeed");
    assert_eq!(get(&preset, "APP_DEBUG"), "1");
}

#[test]
#[serial]
fn process_environment_load_skips_variables_set_by_others() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let file = dir.path().join(".env");
    write_file(
        &file,
        "CASCADENV_TEST_PRESET=file\nCASCADENV_TEST_FRESH=file\n",
    );

    unsafe {
        std::env::set_var("CASCADENV_TEST_PRESET", "preset");
        std::env::remove_var("CASCADENV_TEST_FRESH");
    }

    let report = unsafe { cascadenv::load([&file]) }.expect("load should succeed");
    assert_eq!(report.loaded, 1);
    assert_eq!(report.skipped_existing, 1);
    assert_eq!(std::env::var("CASCADENV_TEST_PRESET").as_deref(), Ok("preset"));
    assert_eq!(std::env::var("CASCADENV_TEST_FRESH").as_deref(), Ok("file"));

    unsafe { cascadenv::overload([&file]) }.expect("overload should succeed");
    assert_eq!(std::env::var("CASCADENV_TEST_PRESET").as_deref(), Ok("file"));

    unsafe {
        std::env::remove_var("CASCADENV_TEST_PRESET");
        std::env::remove_var("CASCADENV_TEST_FRESH");
    }
}

#[test]
#[serial]
fn process_environment_loader_overrides_its_own_writes() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let first = dir.path().join(".env");
    let second = dir.path().join(".env.second");
    write_file(&first, "CASCADENV_TEST_OWNED=first\n");
    write_file(&second, "CASCADENV_TEST_OWNED=second\n");

    unsafe { std::env::remove_var("CASCADENV_TEST_OWNED") };

    let mut loader = unsafe { DotEnv::process() };
    loader.load([&first]).expect("load should succeed");
    loader.load([&second]).expect("load should succeed");
    assert!(loader.is_loaded("CASCADENV_TEST_OWNED"));
    assert_eq!(std::env::var("CASCADENV_TEST_OWNED").as_deref(), Ok("second"));

    unsafe { std::env::remove_var("CASCADENV_TEST_OWNED") };
}

#[test]
fn cascade_logs_skipped_steps() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let base = dir.path().join(".env");
    write_file(&sibling(&base, "dist"), "A=dist\n");
    write_file(&sibling(&base, "local"), "A=local\n");

    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let mut testing = loader_with(&[("APP_ENV", "test")]);
        testing
            .load_env(&base, Options::new().test_envs(["test"]))
            .expect("load_env should succeed");

        let mut local = loader_with(&[("APP_ENV", "local")]);
        local
            .load_env(&base, Options::new())
            .expect("load_env should succeed");
    });

    let output = logs.contents();
    assert!(output.contains("using dist file"), "missing dist step: {output}");
    assert!(
        output.contains("test environment, skipping local file"),
        "missing test-env step: {output}"
    );
    assert!(
        output.contains("local environment, skipping environment-specific files"),
        "missing local stop: {output}"
    );
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("log buffer")).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn loader_with(env: &[(&str, &str)]) -> DotEnv {
    let map: BTreeMap<String, String> = env
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect();
    DotEnv::with_target(TargetEnv::from_memory(map))
}

fn get(loader: &DotEnv, key: &str) -> String {
    loader
        .target_env()
        .get_var(key)
        .unwrap_or_else(|| panic!("{key} should be set"))
}

fn sibling(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{suffix}"));
    PathBuf::from(name)
}

fn write_file(path: &Path, content: &str) {
    std::fs::write(path, content).expect("failed to write test file");
}
