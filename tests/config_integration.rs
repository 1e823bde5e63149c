use chat_relay::config::{AppConfig, MAX_DURATION_SECS};
use serial_test::serial;
use std::env;
use std::fs;
use std::io::Write;

const TOUCHED_VARS: &[&str] = &[
    "CONFIG_FILE",
    "HOST",
    "PORT",
    "STATIC_DIR",
    "LOG_JSON",
    "ANTHROPIC_API_KEY",
    "CHAT_RELAY_SERVER__PORT",
    "CHAT_RELAY_LLM__API_KEY",
    "CHAT_RELAY_LLM__MODEL",
    "CHAT_RELAY_LLM__TEMPERATURE",
    "CHAT_RELAY_SESSIONS__TIMEOUT_SECS",
];

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        for var in TOUCHED_VARS {
            env::remove_var(var);
        }
    }
}

fn load(args: &[&str]) -> AppConfig {
    let argv = std::iter::once("chat-relay").chain(args.iter().copied());
    AppConfig::load_from_args(argv).expect("Failed to load config")
}

fn yaml_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp config");
    file.write_all(content.as_bytes())
        .expect("Failed to write temp config");
    file
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = load(&[]);

    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.server.static_dir, "static");
    assert_eq!(config.server.request_timeout_secs, 60);
    assert_eq!(config.llm.api_url, "https://api.anthropic.com/v1/messages");
    assert_eq!(config.llm.api_version, "2023-06-01");
    assert_eq!(config.llm.model, "claude-sonnet-4-20250514");
    assert_eq!(config.llm.max_tokens, 1024);
    assert!((config.llm.temperature - 0.7).abs() < f32::EPSILON);
    assert_eq!(config.llm.timeout_secs, 30);
    assert_eq!(config.sessions.timeout_secs, 3600);
    assert_eq!(config.sessions.sweep_interval_secs, 300);
    assert!(!config.log.json);

    // No key anywhere: loading works, validation refuses to start.
    assert!(config.llm.api_key.is_empty());
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("api_key"));
}

#[test]
#[serial]
fn test_anthropic_api_key_fallback() {
    clear_env_vars();
    unsafe {
        env::set_var("ANTHROPIC_API_KEY", "sk-ant-from-env");
    }

    let config = load(&[]);
    assert_eq!(config.llm.api_key, "sk-ant-from-env");
    assert!(config.validate().is_ok());

    clear_env_vars();
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("ANTHROPIC_API_KEY", "sk-ant-fallback");
        env::set_var("CHAT_RELAY_LLM__API_KEY", "sk-ant-prefixed");
        env::set_var("CHAT_RELAY_SERVER__PORT", "9090");
        env::set_var("CHAT_RELAY_LLM__MODEL", "claude-3-5-haiku-latest");
        env::set_var("CHAT_RELAY_SESSIONS__TIMEOUT_SECS", "120");
    }

    let config = load(&[]);
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.llm.api_key, "sk-ant-prefixed");
    assert_eq!(config.llm.model, "claude-3-5-haiku-latest");
    assert_eq!(config.sessions.timeout_secs, 120);

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let file = yaml_file(
        r#"
server:
  port: 7070
llm:
  model: claude-from-file
  max_tokens: 256
sessions:
  sweep_interval_secs: 30
"#,
    );
    let path = file.path().to_string_lossy().into_owned();

    let config = load(&["--config", &path]);
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.llm.model, "claude-from-file");
    assert_eq!(config.llm.max_tokens, 256);
    assert_eq!(config.sessions.sweep_interval_secs, 30);
    // Untouched keys keep their defaults.
    assert_eq!(config.server.host, "0.0.0.0");

    // Same file via the environment variable.
    unsafe {
        env::set_var("CONFIG_FILE", &path);
    }
    let config = load(&[]);
    assert_eq!(config.server.port, 7070);

    clear_env_vars();
}

#[test]
#[serial]
fn test_missing_explicit_config_file_is_an_error() {
    clear_env_vars();

    let result = AppConfig::load_from_args(["chat-relay", "--config", "/nonexistent/relay.yaml"]);
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_precedence_file_env_cli() {
    clear_env_vars();

    let file = yaml_file("server:\n  port: 7070\n  host: 127.0.0.1\n");
    let path = file.path().to_string_lossy().into_owned();
    unsafe {
        env::set_var("CHAT_RELAY_SERVER__PORT", "9090");
    }

    let config = load(&["--config", &path]);
    assert_eq!(config.server.port, 9090, "env beats file");
    assert_eq!(config.server.host, "127.0.0.1");

    let config = load(&["--config", &path, "--port", "9999", "--host", "::1"]);
    assert_eq!(config.server.port, 9999, "CLI beats env");
    assert_eq!(config.server.host, "::1");
    assert_eq!(config.bind_address(), "::1:9999");

    clear_env_vars();
}

#[test]
#[serial]
fn test_cli_flags() {
    clear_env_vars();

    let config = load(&["--static-dir", "/srv/chat", "--log-json", "true"]);
    assert_eq!(config.server.static_dir, "/srv/chat");
    assert!(config.log.json);
}

#[test]
#[serial]
fn test_validate_rejects_bad_values() {
    clear_env_vars();
    unsafe {
        env::set_var("ANTHROPIC_API_KEY", "sk-ant-test");
    }

    let mut config = load(&[]);
    assert!(config.validate().is_ok());

    config.llm.temperature = 1.5;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("temperature"));

    config.llm.temperature = 0.0;
    config.sessions.sweep_interval_secs = 0;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("sessions.sweep_interval_secs"));

    config.sessions.sweep_interval_secs = u64::MAX;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("sessions.sweep_interval_secs"));
    assert!(err.to_string().contains("at most"));

    config.sessions.sweep_interval_secs = MAX_DURATION_SECS;
    assert!(config.validate().is_ok());

    clear_env_vars();
}

#[test]
#[serial]
fn test_cwd_config_fallback() {
    clear_env_vars();

    // Create ./config.yaml
    let cwd_path = "config.yaml";
    fs::write(cwd_path, "server:\n  port: 6060\n").expect("Failed to write ./config.yaml");

    let config = load(&[]);

    let result = std::panic::catch_unwind(|| {
        assert_eq!(config.server.port, 6060);
    });

    fs::remove_file(cwd_path).unwrap();

    if let Err(e) = result {
        std::panic::resume_unwind(e);
    }
}
