use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn taskpipe(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("taskpipe").unwrap();
    cmd.env("HOME", home.path())
        .env_remove("TASKPIPE_THREADS")
        .env_remove("TASKPIPE_QUEUE_CAPACITY")
        .env_remove("TASKPIPE_DATA_PATH");
    cmd
}

#[test]
fn test_double_defaults() {
    let home = TempDir::new().unwrap();
    taskpipe(&home)
        .args(["--threads", "3", "double"])
        .assert()
        .success()
        .stdout("2 4 6 8 10\n");
}

#[test]
fn test_pipeline_collects_all_items() {
    let home = TempDir::new().unwrap();
    taskpipe(&home)
        .args(["pipeline", "--count", "10", "--offset", "0.5"])
        .assert()
        .success()
        .stdout("0.5 1.5 2.5 3.5 4.5 5.5 6.5 7.5 8.5 9.5\n");
}

#[test]
fn test_flaky_counts_failure() {
    let home = TempDir::new().unwrap();
    taskpipe(&home)
        .args(["--threads", "1", "flaky", "--runs", "5", "--fail-on", "3"])
        .assert()
        .success()
        .stdout("succeeded=4 failed=1\n")
        .stderr(predicate::str::contains("failed on purpose"));
}

#[test]
fn test_show_config_layers() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("custom.yml");
    std::fs::write(&file, "threads: 6\napps:\n  taskpipe:\n    queue_capacity: 12\n").unwrap();

    taskpipe(&home)
        .args(["--config", file.to_str().unwrap(), "show-config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("threads: 6"))
        .stdout(predicate::str::contains("queue_capacity: 12"));
}

#[test]
fn test_env_overrides_config() {
    let home = TempDir::new().unwrap();
    taskpipe(&home)
        .env("TASKPIPE_THREADS", "3")
        .arg("show-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("threads: 3"));
}

#[test]
fn test_zero_threads_rejected() {
    let home = TempDir::new().unwrap();
    taskpipe(&home)
        .args(["--threads", "0", "double"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("threads must be at least 1"));
}

#[test]
fn test_threads_flag_beats_env() {
    let home = TempDir::new().unwrap();
    taskpipe(&home)
        .env("TASKPIPE_THREADS", "0")
        .args(["--threads", "4", "show-config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("threads: 4"));
}

#[test]
fn test_data_path_writes_json_log() {
    let home = TempDir::new().unwrap();
    let data = home.path().join("data");
    taskpipe(&home)
        .env("TASKPIPE_DATA_PATH", &data)
        .args(["double", "7"])
        .assert()
        .success()
        .stdout("14\n");

    let log = std::fs::read_to_string(data.join("double.jsonlog")).unwrap();
    assert!(log.lines().any(|line| line.contains("\"message\":\"Begin task\"")));
}
