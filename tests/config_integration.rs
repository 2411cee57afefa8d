use crew_agui::config::{AppConfig, EngineKind};
use serial_test::serial;
use std::env;
use std::fs;
use std::io::Write;

const ARGS: [&str; 1] = ["crew-agui"];

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        env::remove_var("CREW_SERVER__PORT");
        env::remove_var("CREW_WORKFLOW__ENGINE");
        env::remove_var("CREW_WORKFLOW__FEEDBACK_OPTIONS");
        env::remove_var("CREW_RUNS__QUEUE_CAPACITY");
        env::remove_var("CONFIG_FILE");
        env::remove_var("PORT");
        env::remove_var("WORKFLOW_ENGINE");
        env::remove_var("FEEDBACK_TTL_SECS");
    }
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = AppConfig::load_from_args(ARGS).expect("defaults should load");
    assert_eq!(config.server.port, 8000);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.runs.queue_capacity, 64);
    assert_eq!(config.registry.ttl_secs, 1800);
    assert_eq!(config.workflow.engine, EngineKind::Scripted);
    assert_eq!(config.workflow.feedback_options.len(), 3);
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("CREW_SERVER__PORT", "9090");
        env::set_var("CREW_WORKFLOW__ENGINE", "chat");
        env::set_var("CREW_WORKFLOW__FEEDBACK_OPTIONS", "Cheaper,Fancier");
    }

    let config = AppConfig::load_from_args(ARGS).expect("Failed to load config");
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.workflow.engine, EngineKind::Chat);
    assert_eq!(config.workflow.feedback_options, ["Cheaper", "Fancier"]);

    clear_env_vars();
}

#[test]
#[serial]
fn test_cli_beats_env() {
    clear_env_vars();
    unsafe {
        env::set_var("CREW_SERVER__PORT", "9090");
    }

    let config = AppConfig::load_from_args([
        "crew-agui",
        "--port",
        "7171",
        "--feedback-ttl-secs",
        "60",
    ])
    .expect("Failed to load config");
    assert_eq!(config.server.port, 7171);
    assert_eq!(config.registry.ttl_secs, 60);

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp config");
    writeln!(
        file,
        "server:\n  port: 7070\nworkflow:\n  step_delay_ms: 250\nregistry:\n  ttl_secs: 120\n"
    )
    .expect("Failed to write temp config");

    // Tell AppConfig to use this file via Env Var (mocking CLI arg indirectly)
    unsafe {
        env::set_var("CONFIG_FILE", file.path());
    }

    let config = AppConfig::load_from_args(ARGS).expect("Failed to load config from file");
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.workflow.step_delay_ms, 250);
    assert_eq!(config.registry.ttl_secs, 120);
    // Untouched sections keep their defaults.
    assert_eq!(config.runs.outbound_capacity, 64);

    clear_env_vars();
}

#[test]
#[serial]
fn test_cwd_config_fallback() {
    clear_env_vars();

    let cwd_path = "config.yaml";
    fs::write(cwd_path, "server:\n  port: 6060\n").expect("Failed to write ./config.yaml");

    let config = AppConfig::load_from_args(ARGS);
    fs::remove_file(cwd_path).unwrap();

    assert_eq!(config.expect("Failed to load config").server.port, 6060);
}

#[test]
#[serial]
fn test_zero_capacity_is_rejected() {
    clear_env_vars();
    unsafe {
        env::set_var("CREW_RUNS__QUEUE_CAPACITY", "0");
    }

    assert!(AppConfig::load_from_args(ARGS).is_err());

    clear_env_vars();
}
