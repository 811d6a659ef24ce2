use procvisor::{Buffer, Output, ProcessError, SpawnRequest, Supervisor};
use std::io;
use std::time::Duration;
use tokio::time::timeout;

const LIMIT: Duration = Duration::from_secs(10);

fn sh(script: &str) -> SpawnRequest {
    SpawnRequest::new("sh").arg("-c").arg(script)
}

#[tokio::test]
async fn test_echo_writes_to_stdout_sink() {
    let sup = Supervisor::new();
    let out = Buffer::new();
    let fut = sup.spawn(SpawnRequest::new("echo").arg("hello").stdout(Output::buffer(&out)));
    let id = fut.id().expect("process should have a pid");
    assert_eq!(fut.display_name(), "echo hello");

    let outcome = timeout(LIMIT, fut).await.unwrap().unwrap();
    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.process_id, id);
    assert_eq!(out.to_string_lossy(), "hello\n");
    assert!(!sup.running().contains_key(&id));
}

#[tokio::test]
async fn test_command_line_string() {
    let sup = Supervisor::new();
    let fut = sup.spawn("true");
    assert_eq!(timeout(LIMIT, fut).await.unwrap().unwrap().exit_code, 0);

    let out = Buffer::new();
    let fut = sup.spawn(SpawnRequest::from("echo a  b").stdout(Output::buffer(&out)));
    timeout(LIMIT, fut).await.unwrap().unwrap();
    assert_eq!(out.to_string_lossy(), "a b\n");
}

#[tokio::test]
async fn test_nonzero_exit_captures_stderr() {
    let sup = Supervisor::new();
    let fut = sup.spawn(sh("printf error >&2; exit 1").stderr(Output::Null));
    let id = fut.id().unwrap();

    match timeout(LIMIT, fut).await.unwrap() {
        Err(ProcessError::Exit { exit_code, stderr, process_id, .. }) => {
            assert_eq!(exit_code, 1);
            assert_eq!(stderr, "error");
            assert_eq!(process_id, id);
        }
        other => panic!("expected exit failure, got {:?}", other),
    }
    assert!(!sup.is_invalid());
}

#[tokio::test]
async fn test_stderr_chunks_keep_order() {
    let sup = Supervisor::new();
    let seen = Buffer::new();
    let script = "for i in 1 2 3 4; do printf \"$i\" >&2; sleep 0.05; done; exit 3";
    let err = timeout(LIMIT, sup.spawn(sh(script).stderr(Output::buffer(&seen))))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.exit_code(), Some(3));
    assert_eq!(err.stderr(), Some("1234"));
    assert_eq!(seen.to_string_lossy(), "1234");
}

#[tokio::test]
async fn test_ignore_exit_code_resolves() {
    let sup = Supervisor::new();
    let err_out = Buffer::new();
    let fut = sup.spawn(
        sh("printf error >&2; exit 1")
            .ignore_exit_code(true)
            .stderr(Output::buffer(&err_out)),
    );
    let outcome = timeout(LIMIT, fut).await.unwrap().unwrap();
    assert_eq!(outcome.exit_code, 1);
    assert_eq!(err_out.to_string_lossy(), "error");
}

#[tokio::test]
async fn test_missing_program_is_launch_failure() {
    let sup = Supervisor::new();
    let fut = sup.spawn("/definitely/not/a/program --flag");
    assert!(fut.id().is_none());
    match fut.await {
        Err(ProcessError::Launch { cause, display_name, process_id }) => {
            assert_eq!(cause.kind(), io::ErrorKind::NotFound);
            assert_eq!(display_name, "/definitely/not/a/program --flag");
            assert!(process_id.is_none());
        }
        other => panic!("expected launch failure, got {:?}", other),
    }
    assert!(sup.running().is_empty());
}

#[tokio::test]
async fn test_working_dir_and_env() {
    let sup = Supervisor::new();
    let out = Buffer::new();
    let fut = sup.spawn(
        sh("printf '%s:%s' \"$PWD\" \"$GREETING\"")
            .current_dir("/")
            .env("GREETING", "hi")
            .stdout(Output::buffer(&out)),
    );
    timeout(LIMIT, fut).await.unwrap().unwrap();
    assert_eq!(out.to_string_lossy(), "/:hi");
}

#[tokio::test]
async fn test_registered_until_resolved() {
    let sup = Supervisor::new();
    let fut = sup.spawn(SpawnRequest::new("sleep").arg("0.3").display_name("nap"));
    let id = fut.id().unwrap();

    let running = sup.running();
    assert_eq!(running.len(), 1);
    assert_eq!(running.get(&id).map(String::as_str), Some("nap"));

    timeout(LIMIT, fut).await.unwrap().unwrap();
    assert!(sup.running().is_empty());
}

#[tokio::test]
async fn test_supervisors_are_independent() {
    let a = Supervisor::new();
    let b = Supervisor::new();
    let fut = a.spawn("sleep 0.2");
    assert_eq!(a.running().len(), 1);
    assert!(b.running().is_empty());
    b.invalidate().await;
    assert!(timeout(LIMIT, fut).await.unwrap().is_ok());
}
