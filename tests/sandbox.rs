//! The script engine as a child process of the `adclaw` binary.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use adclaw::ScrapeError;
use adclaw::sandbox::{ENGINE_SUBCOMMAND, Sandbox};
use serde_json::json;

/// Runs forever without tripping a loop limit of any realistic size.
const NESTED_SPIN: &str = "for (;;) { for (var i = 0; i < 1000; i++) {} }";

fn sandbox(timeout: Duration) -> Sandbox {
    Sandbox::new(PathBuf::from(env!("CARGO_BIN_EXE_adclaw")), timeout)
}

/// Live engine processes started with `limit` as their loop limit. The
/// limit doubles as a tag so concurrently running tests do not interfere.
#[cfg(target_os = "linux")]
fn engines_tagged(limit: u64) -> usize {
    let tag = limit.to_string();
    std::fs::read_dir("/proc")
        .unwrap()
        .filter_map(Result::ok)
        .filter_map(|entry| std::fs::read(entry.path().join("cmdline")).ok())
        .filter(|cmdline| {
            let args: Vec<&[u8]> = cmdline.split(|b| *b == 0).collect();
            args.contains(&ENGINE_SUBCOMMAND.as_bytes()) && args.contains(&tag.as_bytes())
        })
        .count()
}

#[cfg(target_os = "linux")]
fn sandbox_threads() -> usize {
    std::fs::read_dir("/proc/self/task")
        .unwrap()
        .filter_map(Result::ok)
        .filter_map(|task| std::fs::read_to_string(task.path().join("comm")).ok())
        .filter(|comm| comm.trim() == "js-sandbox")
        .count()
}

#[cfg(target_os = "linux")]
async fn wait_for_no_engines(limit: u64) -> usize {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let live = engines_tagged(limit);
        if live == 0 || Instant::now() > deadline {
            return live;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn window_state_crosses_the_process_boundary() {
    let state = sandbox(Duration::from_secs(5))
        .execute(
            r#"
            window.__PRERENDERED_STATE__ = "{\"listing\":{\"listing\":{\"ads\":[]}}}";
            window.z = 1;
            window.a = { "Łódź": "zł", list: [true, null, 2.5] };
            "#,
        )
        .await
        .unwrap();
    assert_eq!(
        state,
        json!({
            "__PRERENDERED_STATE__": "{\"listing\":{\"listing\":{\"ads\":[]}}}",
            "z": 1,
            "a": { "Łódź": "zł", "list": [true, null, 2.5] }
        })
    );
    let keys: Vec<&String> = state.as_object().unwrap().keys().collect();
    assert_eq!(keys, ["__PRERENDERED_STATE__", "z", "a"]);
}

#[tokio::test]
async fn engine_errors_keep_their_kind() {
    let sb = sandbox(Duration::from_secs(5));

    let err = sb.execute("throw new Error('boom');").await.unwrap_err();
    assert!(matches!(err, ScrapeError::SandboxExecution(ref m) if m.contains("boom")), "{err:?}");

    let err = sb.execute("window.self_ref = window;").await.unwrap_err();
    assert!(matches!(err, ScrapeError::Serialization(_)), "{err:?}");
}

#[tokio::test]
async fn loop_limit_is_passed_to_the_engine() {
    let err = sandbox(Duration::from_secs(10))
        .with_loop_iteration_limit(1_000)
        .execute("for (;;) {}")
        .await
        .unwrap_err();
    assert!(
        matches!(err, ScrapeError::SandboxExecution(ref m) if !m.contains("timed out")),
        "{err:?}"
    );
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn timed_out_engine_leaves_nothing_running() {
    const TAG: u64 = 987_654_321;
    let started = Instant::now();

    let err = sandbox(Duration::from_millis(200))
        .with_loop_iteration_limit(TAG)
        .execute(NESTED_SPIN)
        .await
        .unwrap_err();

    assert!(matches!(err, ScrapeError::SandboxExecution(ref m) if m.contains("timed out")), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(engines_tagged(TAG), 0);
    assert_eq!(sandbox_threads(), 0);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn dropped_execution_kills_the_engine() {
    const TAG: u64 = 987_654_322;
    let sb = sandbox(Duration::from_secs(60)).with_loop_iteration_limit(TAG);

    let outer = tokio::time::timeout(Duration::from_millis(300), sb.execute(NESTED_SPIN)).await;
    assert!(outer.is_err());
    assert_eq!(wait_for_no_engines(TAG).await, 0);
}
