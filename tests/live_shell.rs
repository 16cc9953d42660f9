//! End-to-end scenarios against a real PowerShell interpreter.
//!
//! Every test skips itself (with a note on stderr) when no interpreter is on
//! the PATH, so the suite stays green on hosts without PowerShell.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use pwsh_mux::{OutputFormat, Shell, ShellConfig, ShellError};

fn pwsh_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        std::process::Command::new(ShellConfig::default_exe())
            .args(["-NoLogo", "-Command", "exit"])
            .output()
            .is_ok()
    })
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pwsh-mux-{name}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn live_shell(name: &str) -> Option<Shell> {
    if !pwsh_available() {
        eprintln!("no PowerShell interpreter on PATH; skipping");
        return None;
    }
    Some(
        Shell::builder()
            .tmp_dir(scratch_dir(name))
            .start()
            .unwrap(),
    )
}

async fn recv_within<T: Clone>(rx: &mut tokio::sync::broadcast::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("broadcast emission within 30s")
        .expect("broadcast channel open")
}

#[tokio::test]
async fn test_get_date_has_datetime_property() {
    let Some(shell) = live_shell("get-date") else {
        return;
    };

    let streams = shell.call("Get-Date;").wait().await.unwrap();

    assert_eq!(streams.success.len(), 1);
    assert!(streams.success[0].get("DateTime").is_some());
    assert!(streams.error.is_empty());
    assert!(streams.warning.is_empty());
    assert!(streams.info.is_empty());

    assert!(shell.destroy().wait().await);
}

#[tokio::test]
async fn test_string_format_echo() {
    let Some(shell) = live_shell("string-echo") else {
        return;
    };

    let streams = shell
        .call_with(
            "Write-Output \"Testing Write-Output\";",
            OutputFormat::String,
        )
        .wait()
        .await
        .unwrap();

    assert!(streams.success[0]
        .as_str()
        .unwrap()
        .contains("Testing Write-Output"));

    assert!(shell.destroy().wait().await);
}

#[tokio::test]
async fn test_write_error_lands_in_error_stream() {
    let Some(shell) = live_shell("write-error") else {
        return;
    };

    let streams = shell
        .call("Write-Error \"Testing Write-Error\";")
        .wait()
        .await
        .unwrap();

    assert!(streams.success.is_empty());
    assert!(streams.error[0].contains("Testing Write-Error"));

    assert!(shell.destroy().wait().await);
}

#[tokio::test]
async fn test_interleaved_sleeps_complete_in_submission_order() {
    let Some(shell) = live_shell("fifo") else {
        return;
    };

    let mut success = shell.subscribe_success();

    let handles = [
        shell.call("Start-Sleep -m 300; Write-Output \"Call 1\";"),
        shell.call("Start-Sleep -m 200; Write-Output \"Call 2\";"),
        shell.call("Start-Sleep -m 100; Write-Output \"Call 3\";"),
        shell.call("Start-Sleep -m 400; Write-Output \"Call 4\";"),
    ];

    // Broadcast emissions arrive in submission order regardless of the
    // sleep durations.
    for expected in 1..=4 {
        let emission = recv_within(&mut success).await;
        assert_eq!(
            emission[0].as_str().unwrap(),
            format!("Call {expected}"),
            "out-of-order completion"
        );
    }

    for handle in handles {
        handle.wait().await.unwrap();
    }

    assert!(shell.destroy().wait().await);
}

#[tokio::test]
async fn test_timeout_restarts_interpreter() {
    if !pwsh_available() {
        eprintln!("no PowerShell interpreter on PATH; skipping");
        return;
    }
    let shell = Shell::builder()
        .tmp_dir(scratch_dir("timeout"))
        .timeout(Duration::from_millis(2000))
        .start()
        .unwrap();

    let err = shell
        .call("Start-Sleep -Seconds 3;")
        .wait()
        .await
        .unwrap_err();
    match err {
        ShellError::Timeout { millis } => assert_eq!(millis, 2000),
        other => panic!("expected timeout, got {other:?}"),
    }

    // The replacement interpreter serves subsequent commands.
    let streams = shell
        .call("Write-Output \"Call After Reset\";")
        .wait()
        .await
        .unwrap();
    assert_eq!(streams.success[0].as_str().unwrap(), "Call After Reset");

    assert!(shell.destroy().wait().await);
}

#[tokio::test]
async fn test_interpreter_state_is_shared_between_calls() {
    let Some(shell) = live_shell("shared-state") else {
        return;
    };

    shell.call("$XYZ = 'something';").wait().await.unwrap();
    let streams = shell.call("Write-Output $XYZ;").wait().await.unwrap();

    assert_eq!(streams.success[0].as_str().unwrap(), "something");

    assert!(shell.destroy().wait().await);
}

#[tokio::test]
async fn test_empty_fragment_yields_empty_envelope() {
    let Some(shell) = live_shell("empty") else {
        return;
    };

    let mut success = shell.subscribe_success();
    let mut error = shell.subscribe_error();

    let streams = shell.call("").wait().await.unwrap();
    assert!(streams.is_empty());

    // No stream was non-empty, so nothing was broadcast.
    assert!(success.try_recv().is_err());
    assert!(error.try_recv().is_err());

    assert!(shell.destroy().wait().await);
}

#[tokio::test]
async fn test_json_round_trip_preserves_structure() {
    let Some(shell) = live_shell("round-trip") else {
        return;
    };

    let streams = shell
        .call("[pscustomobject]@{ name = 'probe'; count = 3 };")
        .wait()
        .await
        .unwrap();

    assert_eq!(streams.success[0]["name"], "probe");
    assert_eq!(streams.success[0]["count"], 3);

    assert!(shell.destroy().wait().await);
}

#[tokio::test]
async fn test_multiline_verbose_splits_per_line() {
    let Some(shell) = live_shell("verbose") else {
        return;
    };

    let streams = shell
        .call("Write-Verbose \"line one`nline two\";")
        .wait()
        .await
        .unwrap();

    assert!(streams.verbose.len() >= 2, "verbose: {:?}", streams.verbose);
    let joined = streams.verbose.join("\n");
    assert!(joined.contains("line one"));
    assert!(joined.contains("line two"));

    assert!(shell.destroy().wait().await);
}

#[tokio::test]
async fn test_destroy_is_idempotent_and_cleans_scratch() {
    if !pwsh_available() {
        eprintln!("no PowerShell interpreter on PATH; skipping");
        return;
    }
    let dir = scratch_dir("destroy");
    let shell = Shell::builder().tmp_dir(dir.clone()).start().unwrap();

    shell.call("Write-Output 'warm';").wait().await.unwrap();

    let first = shell.destroy();
    let second = shell.destroy();
    assert!(first.wait().await);
    assert!(second.wait().await);
    assert!(shell.destroy().wait().await);

    // Commands after shutdown fail closed.
    let err = shell.call("Write-Output 'late';").wait().await.unwrap_err();
    assert!(matches!(err, ShellError::Closed));

    // Both scratch files are gone.
    let leftovers: Vec<_> = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().contains("_fps_"))
        .collect();
    assert!(leftovers.is_empty(), "leftover scratch files: {leftovers:?}");
}

#[tokio::test]
async fn test_queued_commands_fail_closed_on_destroy() {
    let Some(shell) = live_shell("drain") else {
        return;
    };

    // Occupy the interpreter, then stack commands behind it.
    let busy = shell.call("Start-Sleep -Seconds 30;");
    let queued = shell.call("Write-Output 'never';");

    // Give the dispatcher a moment to put the first command in flight.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(shell.destroy().wait().await);

    assert!(matches!(busy.wait().await, Err(ShellError::Closed)));
    assert!(matches!(queued.wait().await, Err(ShellError::Closed)));
}
