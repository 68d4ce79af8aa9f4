use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use tempfile::{tempdir, NamedTempFile};

fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("salary-ingest").expect("Binary exists");
    for var in ["S3_ENDPOINT", "S3_ACCESS_KEY", "S3_SECRET_KEY", "S3_BUCKET"] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn help_lists_every_command() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("watch")
                .and(predicate::str::contains("process"))
                .and(predicate::str::contains("bucket")),
        );
}

#[test]
fn bucket_help_lists_actions() {
    cmd()
        .args(["bucket", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("info")
                .and(predicate::str::contains("versions"))
                .and(predicate::str::contains("enable-versioning"))
                .and(predicate::str::contains("download")),
        );
}

#[test]
fn download_requires_key_and_dest() {
    cmd()
        .args(["bucket", "download", "--key", "a.csv"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--dest"));
}

#[test]
fn process_without_credentials_fails_before_touching_files() {
    let dir = tempdir().unwrap();
    let config = NamedTempFile::new().unwrap();
    let yaml = format!(
        "pipeline:\n  watch_folder: {}\n",
        dir.path().join("incoming").display()
    );
    write(config.path(), yaml).unwrap();

    cmd()
        .current_dir(dir.path())
        .args(["process", "--config"])
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("credentials"));
    assert!(!dir.path().join("incoming").exists());
}

#[test]
fn invalid_config_is_reported() {
    let dir = tempdir().unwrap();
    let config = NamedTempFile::new().unwrap();
    write(config.path(), b"not-yaml: [:::").unwrap();

    cmd()
        .current_dir(dir.path())
        .args(["bucket", "--config"])
        .arg(config.path())
        .arg("info")
        .assert()
        .failure()
        .stderr(predicate::str::contains("YAML"));
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{:?}", event));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use salary_ingest::cli::{run, Cli, Commands};

    let cli = Cli {
        command: Commands::Process {
            config: Some(std::path::PathBuf::from("dummy.yaml")),
        },
    };

    assert!(run(cli).await.is_err());

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
