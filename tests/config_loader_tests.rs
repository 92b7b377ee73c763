use gfibot::config::ConfigLoader;
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    unsafe {
        env::remove_var("GFIBOT_PROFILE");
        env::remove_var("GFIBOT_LOG_LEVEL");
        env::remove_var("GFIBOT_DATABASE_URL");
        env::remove_var("GFIBOT_TOKEN");
        env::remove_var("GFIBOT_TOKENS");
        env::remove_var("GFIBOT_PROJECTS");
        env::remove_var("GFIBOT_SCHEDULER_DAEMON_CRON");
        env::remove_var("GFIBOT_SCHEDULER_DAEMON_INIT");
        env::remove_var("GFIBOT_SCHEDULER_JITTER_MAX_SECONDS");
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.scheduler.tick_interval_seconds, 60);
    assert_eq!(cfg.scheduler.jitter_max_seconds, 1200);
    assert_eq!(cfg.scheduler.daemon_cron, "0 0 * * *");
    assert!(!cfg.scheduler.daemon_init);
    assert!(cfg.tokens.is_empty());
    assert!(cfg.projects.is_empty());
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "GFIBOT_DATABASE_URL=postgres://base/db\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "GFIBOT_DATABASE_URL=postgres://test/db\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "GFIBOT_DATABASE_URL=postgres://test-local/db\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "GFIBOT_PROFILE=test\nGFIBOT_DATABASE_URL=postgres://local/db\n",
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.database_url, "postgres://test-local/db");
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "GFIBOT_TOKENS=file-token\n");

    unsafe {
        env::set_var("GFIBOT_TOKENS", "env-token-1,env-token-2");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert_eq!(cfg.tokens, vec!["env-token-1", "env-token-2"]);

    clear_env();
}

#[test]
fn single_token_variable_is_accepted() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "GFIBOT_TOKEN=only-token\n");

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with a single token");
    assert_eq!(cfg.tokens, vec!["only-token"]);

    clear_env();
}

#[test]
fn daemon_init_flag_is_parsed_from_env() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "GFIBOT_SCHEDULER_DAEMON_INIT=true\n");

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with init flag");
    assert!(cfg.scheduler.daemon_init);

    clear_env();
}

#[test]
fn malformed_project_slug_returns_error() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "GFIBOT_PROJECTS=octocat/hello,just-a-name\n",
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("malformed slug should fail");
    assert!(format!("{}", err).contains("invalid project slug"));

    clear_env();
}

#[test]
fn invalid_daemon_cron_returns_error() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "GFIBOT_SCHEDULER_DAEMON_CRON=every day at noon\n",
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("invalid cron should fail");
    assert!(format!("{}", err).contains("invalid daemon cron expression"));

    clear_env();
}
