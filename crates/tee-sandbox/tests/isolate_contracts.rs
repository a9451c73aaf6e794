//! Process backend contract tests: env scrubbing, exit codes, timeouts,
//! cancellation, scoped cleanup.

use std::sync::Arc;
use std::time::Duration;

use tee_sandbox::{
    cancel_pair, create_isolate, run_isolated, ExecRequest, Isolate, IsolationLevel,
    ResourceCeiling, TeeError, TeePolicy,
};

fn sh(script: &str) -> Vec<String> {
    vec!["-c".to_string(), script.to_string()]
}

fn short_policy(timeout_secs: i64) -> TeePolicy {
    TeePolicy::default().with_resources(ResourceCeiling {
        memory_mb: 256,
        cpu_cores: 1.0,
        timeout_secs,
    })
}

// -------------------------------------------------------------------------
// Execution
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_execute_captures_stdout() {
    let output = run_isolated(TeePolicy::default(), "echo", &["hello".to_string()])
        .await
        .expect("run");
    assert_eq!(output.exit_code, 0);
    assert_eq!(output.stdout.trim(), "hello");
}

#[tokio::test]
async fn test_exit_code_passed_through() {
    let output = run_isolated(TeePolicy::default(), "sh", &sh("echo oops >&2; exit 3"))
        .await
        .expect("non-zero exit is not an error");
    assert_eq!(output.exit_code, 3);
    assert!(!output.success());
    assert_eq!(output.stderr.trim(), "oops");
}

#[tokio::test]
async fn test_environment_is_scrubbed_and_policy_injected() {
    std::env::set_var("TEE_TEST_OUTER_SECRET", "leaked");
    let policy = TeePolicy::default().with_env("AGENT_MODE", "sandboxed");

    let isolate = create_isolate(policy).expect("create");
    isolate.start().await.expect("start");
    let root = isolate.work_dir().expect("work dir");

    let output = isolate
        .execute(
            "sh",
            &sh("echo ${TEE_TEST_OUTER_SECRET:-unset}; echo $AGENT_MODE; echo $TEE_NETWORK_ACCESS; echo $HOME"),
        )
        .await
        .expect("execute");
    let lines: Vec<&str> = output.stdout.lines().collect();
    assert_eq!(lines[0], "unset");
    assert_eq!(lines[1], "sandboxed");
    assert_eq!(lines[2], "false");
    assert_eq!(lines[3], root.display().to_string());

    isolate.stop().await.expect("stop");
}

#[tokio::test]
async fn test_per_call_env_and_cwd() {
    let isolate = create_isolate(TeePolicy::default()).expect("create");
    isolate.start().await.expect("start");
    isolate
        .write_file("tools/marker.txt", b"present")
        .await
        .expect("write");

    let request = ExecRequest::new("sh", sh("cat marker.txt; echo \" $CALL_ONLY\""))
        .env("CALL_ONLY", "yes")
        .cwd("tools");
    let output = isolate
        .execute_cancellable(request, tee_sandbox::CancelToken::never())
        .await
        .expect("execute");
    assert_eq!(output.stdout.trim(), "present yes");

    isolate.stop().await.expect("stop");
}

// -------------------------------------------------------------------------
// Lifecycle and cancellation
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_execute_after_stop_is_not_started() {
    let isolate = create_isolate(TeePolicy::default()).expect("create");
    isolate.start().await.expect("start");
    isolate.stop().await.expect("stop");
    isolate.stop().await.expect("second stop is a no-op");

    let err = isolate.execute("echo", &[]).await.unwrap_err();
    assert!(matches!(err, TeeError::NotStarted));
}

#[tokio::test]
async fn test_timeout_is_distinct_and_dir_released() {
    let isolate = create_isolate(short_policy(1)).expect("create");
    isolate.start().await.expect("start");
    let dir = isolate.work_dir().expect("work dir");

    let err = isolate
        .execute("sleep", &["10".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, TeeError::Timeout { timeout_secs: 1 }));
    assert!(err.is_cancellation());

    isolate.stop().await.expect("stop");
    assert!(!dir.exists());
}

#[tokio::test]
async fn test_caller_cancel_kills_command() {
    let isolate = create_isolate(short_policy(30)).expect("create");
    isolate.start().await.expect("start");

    let (handle, token) = cancel_pair();
    let task = tokio::spawn({
        let isolate = Arc::clone(&isolate);
        async move {
            isolate
                .execute_cancellable(ExecRequest::new("sleep", ["30"]), token)
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("cancel must not hang")
        .expect("join");
    assert!(matches!(result, Err(TeeError::Killed { .. })));

    isolate.stop().await.expect("stop");
}

#[tokio::test]
async fn test_stop_kills_in_flight_execute() {
    let isolate = create_isolate(short_policy(30)).expect("create");
    isolate.start().await.expect("start");

    let task = tokio::spawn({
        let isolate = Arc::clone(&isolate);
        async move { isolate.execute("sleep", &["30".to_string()]).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    isolate.stop().await.expect("stop");

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("stop must not hang")
        .expect("join");
    match result {
        Err(TeeError::Killed { reason }) => assert!(reason.contains("stopped")),
        other => panic!("expected Killed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_spawned_process_can_be_killed() {
    let isolate = create_isolate(TeePolicy::default()).expect("create");
    isolate.start().await.expect("start");

    let mut process = isolate
        .spawn(ExecRequest::new("sleep", ["30"]))
        .await
        .expect("spawn");
    assert!(process.id().is_some());
    assert!(process.is_running());

    process.kill().await.expect("kill");
    assert!(!process.is_running());
    process.kill().await.expect("kill twice is fine");

    isolate.stop().await.expect("stop");
}

// -------------------------------------------------------------------------
// Files
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_copy_in_and_out() {
    let host = tempfile::tempdir().expect("host dir");
    let src = host.path().join("input.json");
    std::fs::write(&src, r#"{"x":1}"#).expect("write input");

    let isolate = create_isolate(TeePolicy::default()).expect("create");
    isolate.start().await.expect("start");
    isolate
        .copy_file_in(&src, "data/input.json")
        .await
        .expect("copy in");
    isolate
        .execute("sh", &sh("cp data/input.json data/output.json"))
        .await
        .expect("execute");

    let dest = host.path().join("output.json");
    isolate
        .copy_file_out("data/output.json", &dest)
        .await
        .expect("copy out");
    assert_eq!(std::fs::read_to_string(dest).expect("read"), r#"{"x":1}"#);

    let escape = isolate.copy_file_out("../outside", &host.path().join("x")).await;
    assert!(matches!(escape, Err(TeeError::PathEscape(_))));

    isolate.stop().await.expect("stop");
}

// -------------------------------------------------------------------------
// Factory
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_invalid_policy_never_builds_isolate() {
    let err = create_isolate(short_policy(0)).err().expect("must fail");
    assert!(matches!(err, TeeError::InvalidPolicy(_)));
}

#[tokio::test]
async fn test_vm_level_degrades_to_process() {
    let policy = TeePolicy {
        isolation: IsolationLevel::Vm,
        ..TeePolicy::default()
    };
    let output = run_isolated(policy, "sh", &sh("echo $TEE_ISOLATION"))
        .await
        .expect("run");
    assert_eq!(output.stdout.trim(), "vm");
}
