//! Integration tests for luavm-process against a real Lua interpreter.
//!
//! These tests require a `lua` executable on `PATH` (or `LUAVM_EXECUTABLE`).
//!
//! Run with: `cargo test -p luavm-process -- --ignored`

use luavm_process::{
    Interpreter, InterpreterConfig, LuaProcess, NetworkConfig, NetworkedLuaProcess, PtyProcess,
    PtySize,
};
use std::io::Read;
use std::time::{Duration, Instant};

/// Test one-shot execution of a simple chunk
#[tokio::test]
#[ignore = "requires lua interpreter"]
async fn test_lua_execute_print() {
    let lua = LuaProcess::new("print", InterpreterConfig::from_env());
    let outcome = lua
        .execute("print('Square root of 16 is:', math.sqrt(16))", None)
        .await
        .expect("lua should spawn");

    assert!(outcome.success, "stderr: {}", outcome.stderr);
    assert!(outcome.stdout.contains("Square root of 16 is:"));
    assert!(outcome.stdout.contains('4'));
}

/// Test that a runtime error is reported in the outcome
#[tokio::test]
#[ignore = "requires lua interpreter"]
async fn test_lua_execute_runtime_error() {
    let lua = LuaProcess::new("error", InterpreterConfig::from_env());
    let outcome = lua
        .execute("error('boom')", None)
        .await
        .expect("lua should spawn");

    assert!(!outcome.success);
    assert!(outcome.error.unwrap_or_default().contains("boom"));
}

/// Test that an infinite loop is cut off by the timeout
#[tokio::test]
#[ignore = "requires lua interpreter"]
async fn test_lua_execute_timeout() {
    let lua = LuaProcess::new("spin", InterpreterConfig::from_env());
    let outcome = lua
        .execute("while true do end", Some(Duration::from_millis(200)))
        .await
        .expect("lua should spawn");

    assert!(!outcome.success);
    assert!(outcome.exit_code.is_none());
}

/// Test networked execution without any preloaded module
#[tokio::test]
#[ignore = "requires lua interpreter"]
async fn test_networked_execute_without_preload() {
    let lua = NetworkedLuaProcess::new(
        "net",
        InterpreterConfig::from_env(),
        NetworkConfig::without_preload(),
    );
    let outcome = lua.execute("print(6 * 7)", None).await.expect("lua should spawn");
    assert_eq!(outcome.stdout.trim(), "42");
}

/// Test an interactive interpreter keeps state between inputs
#[test]
#[ignore = "requires lua interpreter"]
fn test_lua_interactive_state() {
    let lua = LuaProcess::new("repl", InterpreterConfig::from_env());
    let (mut proc, mut reader) =
        PtyProcess::start(&lua.interactive_command(), PtySize::default()).expect("pty spawn");

    proc.write(b"x = 42\n").unwrap();
    proc.write(b"print('The answer is:', x)\n").unwrap();

    let start = Instant::now();
    let mut seen = String::new();
    let mut buf = [0u8; 1024];
    while start.elapsed() < Duration::from_secs(5) && !seen.contains("The answer is:\t42") {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => seen.push_str(&String::from_utf8_lossy(&buf[..n])),
        }
    }
    assert!(seen.contains("The answer is:\t42"), "got {seen:?}");

    proc.terminate().unwrap();
}
