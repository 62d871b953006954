//! Layered configuration loading

use serde::Deserialize;
use serial_test::serial;

use sipstack_infra_common::config::{from_toml_str, load_config};
use sipstack_infra_common::Error;

#[derive(Debug, Deserialize, PartialEq)]
struct Timers {
    t1: u64,
    t2: u64,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Settings {
    user_agent: String,
    timers: Timers,
}

const SAMPLE: &str = r#"
user_agent = "camera"

[timers]
t1 = 500
t2 = 4000
"#;

fn write_sample(name: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("{}-{}.toml", name, std::process::id()));
    std::fs::write(&path, SAMPLE).unwrap();
    path
}

#[test]
fn test_from_toml_str() {
    let settings: Settings = from_toml_str(SAMPLE).unwrap();
    assert_eq!(settings.user_agent, "camera");
    assert_eq!(settings.timers, Timers { t1: 500, t2: 4000 });

    let broken: Result<Settings, _> = from_toml_str("user_agent = ");
    assert!(matches!(broken, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_file_source() {
    let path = write_sample("infra-file");
    let settings: Settings = load_config(&path, "INFRATEST").unwrap();
    assert_eq!(settings.timers.t1, 500);
    std::fs::remove_file(path).ok();
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let path = write_sample("infra-env");
    std::env::set_var("INFRATEST__TIMERS__T1", "250");
    let settings: Result<Settings, _> = load_config(&path, "INFRATEST");
    std::env::remove_var("INFRATEST__TIMERS__T1");
    assert_eq!(settings.unwrap().timers.t1, 250);
    std::fs::remove_file(path).ok();
}

#[test]
fn test_missing_file() {
    let missing: Result<Settings, _> = load_config("/nonexistent/sipstack.toml", "INFRATEST");
    assert!(matches!(missing, Err(Error::Config(_))));
}
