//! End-to-end exchanges against real worker processes.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use lazycomm::{Config, ScriptError, ScriptExecutor};
use lazycomm_bridge::{FrameError, Request};
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    executor: ScriptExecutor,
}

impl Fixture {
    fn new(interpreter: &[&str], timeout_ms: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("scripts")).unwrap();
        let config = Config {
            scripts_dir: dir.path().join("scripts"),
            logs_dir: dir.path().join("logs"),
            interpreter: interpreter.iter().map(|s| s.to_string()).collect(),
            timeout_ms,
            ..Config::default()
        };
        let executor = ScriptExecutor::new(&config);
        Self { dir, executor }
    }

    /// Scripts run through the `lzy-echo` worker binary.
    fn echo() -> Self {
        let fixture = Self::new(&[env!("CARGO_BIN_EXE_lzy-echo")], 10_000);
        fixture.script("echo", "");
        fixture
    }

    fn sh(timeout_ms: u64) -> Self {
        Self::new(&["sh"], timeout_ms)
    }

    fn script(&self, name: &str, contents: &str) {
        std::fs::write(self.scripts_dir().join(format!("{name}.py")), contents).unwrap();
    }

    fn scripts_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("scripts")
    }

    fn log(&self, name: &str) -> String {
        read_or_empty(&self.dir.path().join("logs").join(format!("{name}.log")))
    }
}

fn read_or_empty(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

#[tokio::test]
async fn echo_worker_round_trip() {
    let fixture = Fixture::echo();
    let request = Request::new("items/3", "PATCH")
        .with_header("content-type", "application/json")
        .with_query("verbose", "1")
        .with_body(r#"{"name":"lamp"}"#);

    let response = fixture.executor.execute("echo", request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(&response.body[..], br#"{"name":"lamp"}"#);
    let header = |name: &str| response.headers.get(name).map(String::as_str);
    assert_eq!(header("x-path"), Some("items/3"));
    assert_eq!(header("x-method"), Some("PATCH"));
    assert_eq!(header("content-type"), Some("application/json"));
    assert_eq!(header("verbose"), Some("1"));
}

#[tokio::test]
async fn echo_worker_large_binary_body() {
    let fixture = Fixture::echo();
    let body: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();

    let response = fixture
        .executor
        .execute("echo", Request::new("", "POST").with_body(body.clone()))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body.len(), body.len());
    assert!(response.body[..] == body[..]);
}

#[tokio::test]
async fn echo_worker_stray_stdout_stays_out_of_frame() {
    let fixture = Fixture::echo();

    let response = fixture
        .executor
        .execute("echo", Request::new("a", "GET").with_body("x"))
        .await
        .unwrap();

    // lzy-echo prints a line before responding; the frame still decodes.
    assert_eq!(&response.body[..], b"x");
}

#[tokio::test]
async fn echo_worker_rejects_request_without_method() {
    let fixture = Fixture::echo();
    let mut request = Request::default();
    request.headers.insert("x-path".to_string(), "a".to_string());

    let err = fixture.executor.execute("echo", request).await.unwrap_err();

    assert!(matches!(err, ScriptError::Exited { code: 1, .. }), "{err:?}");
    assert_eq!(err.status_code(), 500);
    assert!(fixture.log("echo").contains("missing required header"));
}

#[tokio::test]
async fn stderr_is_logged_with_separator() {
    let fixture = Fixture::sh(10_000);
    fixture.script("noisy", "cat > /dev/null\necho boom >&2\nexit 2\n");

    let err = fixture
        .executor
        .execute("noisy", Request::new("", "GET"))
        .await
        .unwrap_err();
    assert!(matches!(err, ScriptError::Exited { code: 2, .. }));

    fixture
        .executor
        .execute("noisy", Request::new("", "GET"))
        .await
        .unwrap_err();

    let log = fixture.log("noisy");
    assert_eq!(log.matches("boom").count(), 2);
    assert_eq!(log.matches("-----------------------------").count(), 2);
}

#[tokio::test]
async fn clean_exit_without_response_is_502() {
    let fixture = Fixture::sh(10_000);
    fixture.script("silent", "cat > /dev/null\n");

    let err = fixture
        .executor
        .execute("silent", Request::new("", "GET"))
        .await
        .unwrap_err();

    assert!(matches!(err, ScriptError::NoResponse { .. }));
    assert_eq!(err.status_code(), 502);
}

#[tokio::test]
async fn malformed_response_is_502() {
    let fixture = Fixture::sh(10_000);
    fixture.script("garbled", "cat > /dev/null\nprintf 'hello world\\n'\n");

    let err = fixture
        .executor
        .execute("garbled", Request::new("", "GET"))
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            ScriptError::InvalidResponse {
                source: FrameError::Framing(_),
                ..
            }
        ),
        "{err:?}"
    );
    assert_eq!(err.status_code(), 502);
}

#[tokio::test]
async fn truncated_response_is_502() {
    let fixture = Fixture::sh(10_000);
    fixture.script("short", "cat > /dev/null\nprintf '200 2 10\\n{}abc'\n");

    let err = fixture
        .executor
        .execute("short", Request::new("", "GET"))
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            ScriptError::InvalidResponse {
                source: FrameError::TruncatedStream { .. },
                ..
            }
        ),
        "{err:?}"
    );
}

#[tokio::test]
async fn response_wins_over_failed_exit() {
    let fixture = Fixture::sh(10_000);
    fixture.script("late", "cat > /dev/null\nprintf '202 2 4\\n{}done'\nexit 1\n");

    let response = fixture
        .executor
        .execute("late", Request::new("", "GET"))
        .await
        .unwrap();

    assert_eq!(response.status, 202);
    assert_eq!(&response.body[..], b"done");
}

#[tokio::test]
async fn lingering_worker_still_delivers_response() {
    let fixture = Fixture::sh(500);
    fixture.script(
        "linger",
        "cat > /dev/null\nprintf '200 2 2\\n{}ok'\nexec sleep 5\n",
    );

    let started = Instant::now();
    let response = fixture
        .executor
        .execute("linger", Request::new("", "GET"))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(&response.body[..], b"ok");
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn slow_script_times_out() {
    let fixture = Fixture::sh(200);
    fixture.script("slow", "exec sleep 5\n");

    let started = Instant::now();
    let err = fixture
        .executor
        .execute("slow", Request::new("", "GET"))
        .await
        .unwrap_err();

    assert!(matches!(err, ScriptError::TimedOut { .. }), "{err:?}");
    assert_eq!(err.status_code(), 504);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn missing_interpreter_is_spawn_error() {
    let fixture = Fixture::new(&["/nonexistent/lazycomm-interpreter"], 10_000);
    fixture.script("any", "");

    let err = fixture
        .executor
        .execute("any", Request::new("", "GET"))
        .await
        .unwrap_err();

    assert!(matches!(err, ScriptError::Spawn { .. }), "{err:?}");
    assert_eq!(err.status_code(), 500);
}

/// The Python helper and demo scripts shipped in `scripts/`.
fn shipped_scripts() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../scripts")
}

fn python_available() -> bool {
    Command::new("python")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

#[tokio::test]
async fn shipped_python_echo_script_round_trip() {
    if !python_available() {
        eprintln!("python not found, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let executor = ScriptExecutor::new(&Config {
        scripts_dir: shipped_scripts(),
        logs_dir: dir.path().join("logs"),
        ..Config::default()
    });
    let body: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
    let request = Request::new("a/b", "PUT")
        .with_header("x-note", "caf\u{e9}")
        .with_query("page", "2")
        .with_body(body.clone());

    let response = executor.execute("echo", request).await.unwrap();

    assert_eq!(response.status, 200);
    assert!(response.body[..] == body[..]);
    let header = |name: &str| response.headers.get(name).map(String::as_str);
    assert_eq!(header("x-path"), Some("a/b"));
    assert_eq!(header("x-method"), Some("PUT"));
    assert_eq!(header("x-note"), Some("caf\u{e9}"));
    assert_eq!(header("page"), Some("2"));
}

#[tokio::test]
async fn shipped_python_helper_rejects_missing_method() {
    if !python_available() {
        eprintln!("python not found, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let executor = ScriptExecutor::new(&Config {
        scripts_dir: shipped_scripts(),
        logs_dir: dir.path().join("logs"),
        ..Config::default()
    });
    let request = Request::default().with_header("x-path", "a");

    let err = executor.execute("echo", request).await.unwrap_err();

    assert!(matches!(err, ScriptError::Exited { code: 1, .. }), "{err:?}");
    let log = read_or_empty(&dir.path().join("logs/echo.log"));
    assert!(log.contains("x-method"));
}
