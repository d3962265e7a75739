//! End-to-end orchestrator tests.
//!
//! Most tests drive `/bin/sh` as the interpreter so they run anywhere a
//! POSIX shell exists. Tests that need a real Lua interpreter are ignored.
//!
//! Run the Lua tests with: `cargo test -p luavm-core -- --ignored`

use luavm_core::{
    CoreError, ErrorKind, InterpreterConfig, NetworkConfig, OperationStatus, Orchestrator,
    OrchestratorConfig,
};
use std::time::{Duration, Instant};

fn shell_orchestrator(max_workers: usize) -> Orchestrator {
    let interpreter = InterpreterConfig::builder()
        .program("sh")
        .exec_args(["-s"])
        .interactive_args(Vec::<String>::new())
        .env("PS1", "$ ")
        .build()
        .expect("valid interpreter config");
    let config = OrchestratorConfig::builder()
        .interpreter(interpreter)
        .network(NetworkConfig::without_preload())
        .max_workers(max_workers)
        .stop_grace(Duration::from_millis(500))
        .build()
        .expect("valid orchestrator config");
    Orchestrator::new(config).expect("orchestrator")
}

/// Collect session output until `needle` shows up or five seconds pass.
async fn read_until(orch: &Orchestrator, id: &str, needle: &str) -> String {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen = String::new();
    while Instant::now() < deadline && !seen.contains(needle) {
        if let Some(chunk) = orch
            .read_output(id, Duration::from_millis(100))
            .await
            .expect("session exists")
        {
            seen.push_str(&chunk);
        }
    }
    seen
}

/// Test one-shot execution on a tracked VM
#[tokio::test]
async fn test_execute_sync() {
    let orch = shell_orchestrator(2);
    orch.create_vm("job", false).unwrap();

    let outcome = orch
        .execute_vm_sync("job", "echo sum=$((2+3))", Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(outcome.success, "stderr: {}", outcome.stderr);
    assert_eq!(outcome.stdout.trim(), "sum=5");
}

/// Test async execution, status and wait
#[tokio::test]
async fn test_execute_async_and_wait() {
    let orch = shell_orchestrator(2);
    orch.create_vm("job", false).unwrap();

    let handle = orch.execute_vm_async("job", "echo async", None).unwrap();
    assert!(orch.get_vm_status("job").unwrap().is_some());

    let outcome = orch
        .wait_for_vm("job", Some(Duration::from_secs(5)))
        .await
        .unwrap()
        .expect("finished in time");
    assert_eq!(outcome.stdout.trim(), "async");
    assert_eq!(handle.status(), OperationStatus::Done);
    assert_eq!(orch.get_vm_status("job").unwrap(), Some(OperationStatus::Done));
}

/// Test that a timeout is reported in the outcome, not as an error
#[tokio::test]
async fn test_execute_timeout_outcome() {
    let orch = shell_orchestrator(1);
    orch.create_vm("slow", false).unwrap();

    let outcome = orch
        .execute_vm_sync("slow", "sleep 5", Some(Duration::from_millis(200)))
        .await
        .unwrap();
    assert!(!outcome.success);
    assert!(outcome.error.unwrap_or_default().contains("timed out"));
}

/// Test that the pool never runs more than its bound
#[tokio::test]
async fn test_pool_bound_queues_extra_work() {
    let orch = shell_orchestrator(2);
    orch.create_vm_cluster("w", 3, false).unwrap();

    let a = orch.execute_vm_async("w_0", "sleep 1; echo a", None).unwrap();
    let b = orch.execute_vm_async("w_1", "sleep 1; echo b", None).unwrap();
    let c = orch.execute_vm_async("w_2", "echo c", None).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(c.status(), OperationStatus::Pending);
    let snapshot = orch.pool_snapshot();
    assert_eq!(snapshot.active, 2);
    assert_eq!(snapshot.queued, 1);

    for handle in [&a, &b, &c] {
        assert!(handle.wait(Some(Duration::from_secs(10))).await.unwrap().is_some());
    }
}

/// Test cancelling a queued operation versus a running one
#[tokio::test]
async fn test_cancel_queued_and_running() {
    let orch = shell_orchestrator(1);
    orch.create_vm("busy", false).unwrap();
    orch.create_vm("queued", false).unwrap();

    orch.execute_vm_async("busy", "sleep 1; echo done", None).unwrap();
    orch.execute_vm_async("queued", "echo never", None).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!orch.cancel_vm("busy").unwrap());
    assert!(orch.cancel_vm("queued").unwrap());
    assert_eq!(
        orch.get_vm_status("queued").unwrap(),
        Some(OperationStatus::Cancelled)
    );
    assert!(matches!(
        orch.wait_for_vm("queued", None).await,
        Err(CoreError::OperationCancelled(_))
    ));

    let outcome = orch
        .wait_for_vm("busy", Some(Duration::from_secs(10)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.stdout.trim(), "done");
}

/// Test that session state and output survive detach and re-attach
#[tokio::test]
async fn test_session_persists_across_detach() {
    let orch = shell_orchestrator(1);
    let info = orch.create_interactive_vm("repl", false, true).unwrap();
    assert!(info.running);
    assert!(info.attached);

    orch.send_input("repl", "x=$((40+2))\n").unwrap();
    orch.send_input("repl", "echo value=$x\n").unwrap();
    let seen = read_until(&orch, "repl", "value=42").await;
    assert!(seen.contains("value=42"), "got {seen:?}");

    orch.detach_from_vm("repl").unwrap();
    let detached = orch.sessions().get_session("repl").unwrap();
    assert!(!detached.attached);
    assert!(detached.running);

    // Output produced while detached stays buffered for the next attach.
    orch.send_input("repl", "echo late=$((x+1))\n").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    orch.attach_to_vm("repl").unwrap();
    let seen = read_until(&orch, "repl", "late=43").await;
    assert!(seen.contains("late=43"), "got {seen:?}");

    orch.terminate_vm_session("repl").await.unwrap();
}

/// Test that every member of a cluster executes independently
#[tokio::test]
async fn test_cluster_members_execute() {
    let orch = shell_orchestrator(2);
    let ids = orch.create_vm_cluster("node", 3, false).unwrap();
    assert_eq!(ids, vec!["node_0", "node_1", "node_2"]);

    for (n, id) in ids.iter().enumerate() {
        let code = format!("echo member=$(({n}*10+1))");
        let outcome = orch
            .execute_vm_sync(id, &code, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(outcome.success, "{id} stderr: {}", outcome.stderr);
        assert_eq!(outcome.stdout.trim(), format!("member={}", n * 10 + 1));
    }
}

/// Test the full interactive scenario ending in termination
#[tokio::test]
async fn test_terminate_scenario() {
    let orch = shell_orchestrator(1);
    orch.create_interactive_vm("s", false, false).unwrap();
    assert!(orch.get_vm("s").unwrap().interactive);

    let err = orch.detach_from_vm("s").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);

    orch.attach_to_vm("s").unwrap();
    orch.attach_to_vm("s").unwrap();
    orch.send_input("s", "echo hi-$((1+1))\n").unwrap();
    let seen = read_until(&orch, "s", "hi-2").await;
    assert!(seen.contains("hi-2"), "got {seen:?}");

    orch.terminate_vm_session("s").await.unwrap();
    assert!(orch.get_vm("s").is_none());
    assert!(orch.sessions().get_session("s").is_none());
    assert!(orch.send_input("s", "echo\n").unwrap_err().is_not_found());
    assert!(orch
        .read_output("s", Duration::from_millis(10))
        .await
        .unwrap_err()
        .is_not_found());
    assert!(orch.terminate_vm_session("s").await.unwrap_err().is_not_found());
}

/// Test that duplicate interactive ids are rejected and the first one kept
#[tokio::test]
async fn test_duplicate_interactive_vm() {
    let orch = shell_orchestrator(1);
    orch.create_interactive_vm("dup", false, false).unwrap();
    let err = orch.create_interactive_vm("dup", false, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert!(orch.sessions().get_session("dup").unwrap().running);
    orch.shutdown().await;
    assert_eq!(orch.sessions().session_count(), 0);
}

/// Test that a failed session start rolls back the VM
#[tokio::test]
async fn test_interactive_start_failure_rolls_back() {
    let interpreter = InterpreterConfig::builder()
        .program("/nonexistent/luavm-interpreter")
        .build()
        .unwrap();
    let config = OrchestratorConfig::builder()
        .interpreter(interpreter)
        .build()
        .unwrap();
    let orch = Orchestrator::new(config).unwrap();

    let err = orch.create_interactive_vm("bad", false, true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(orch.get_vm("bad").is_none());
    assert!(orch.sessions().get_session("bad").is_none());
}

/// Test removing a VM aborts its running operation
#[tokio::test]
async fn test_remove_vm_aborts_operation() {
    let orch = shell_orchestrator(1);
    orch.create_vm("long", false).unwrap();
    let handle = orch.execute_vm_async("long", "sleep 30", None).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    orch.remove_vm("long").await.unwrap();
    assert_eq!(handle.status(), OperationStatus::Cancelled);
    assert!(orch.list_vms().is_empty());
    assert!(orch.wait_for_vm("long", None).await.unwrap_err().is_not_found());
}

/// Test that shutdown clears every registry
#[tokio::test]
async fn test_shutdown_clears_everything() {
    let orch = shell_orchestrator(1);
    orch.create_vm_cluster("c", 3, false).unwrap();
    orch.create_interactive_vm("i", false, true).unwrap();
    orch.execute_vm_async("c_0", "sleep 30", None).unwrap();

    orch.shutdown().await;
    assert!(orch.list_vms().is_empty());
    assert_eq!(orch.sessions().session_count(), 0);
}

/// Test an interactive Lua session keeps variables across detach
#[tokio::test]
#[ignore = "requires lua interpreter"]
async fn test_lua_session_persists_across_detach() {
    let orch = Orchestrator::new(OrchestratorConfig::from_env()).unwrap();
    orch.create_interactive_vm("lua", false, true).unwrap();

    orch.send_input("lua", "x = 40 + 2\n").unwrap();
    orch.detach_from_vm("lua").unwrap();
    orch.attach_to_vm("lua").unwrap();
    orch.send_input("lua", "print('x is ' .. x)\n").unwrap();

    let seen = read_until(&orch, "lua", "x is 42").await;
    assert!(seen.contains("x is 42"), "got {seen:?}");
    orch.shutdown().await;
}

/// Test async Lua execution through the pool
#[tokio::test]
#[ignore = "requires lua interpreter"]
async fn test_lua_execute_async() {
    let orch = Orchestrator::new(OrchestratorConfig::from_env()).unwrap();
    orch.create_vm("calc", false).unwrap();
    orch.execute_vm_async("calc", "print(math.sqrt(16))", None)
        .unwrap();

    let outcome = orch
        .wait_for_vm("calc", Some(Duration::from_secs(5)))
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.success);
    assert!(outcome.stdout.contains('4'));
}
