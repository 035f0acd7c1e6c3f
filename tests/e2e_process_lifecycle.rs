//! End-to-End Test Suite: native process lifecycle through the creation service
//!
//! Spawns real processes (`echo`, `sh`, `sleep`) and checks identifier
//! assignment, the failure sentinel, output ordering and automatic cleanup.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use procmux_process::{
    BufferConfig, NativeLauncher, ProcessConfig, ProcessService, ProcessState, ServiceConfig,
    FAILED_PROCESS_ID,
};
use proptest::prelude::*;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(10);

fn service() -> ProcessService {
    ProcessService::new(Arc::new(NativeLauncher::new()), ServiceConfig::default())
}

async fn wait_until_unregistered(service: &ProcessService, id: i64) {
    timeout(WAIT, async {
        while service.get(id).is_some() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("process should be unregistered");
}

#[tokio::test]
async fn test_create_returns_registered_id() {
    let service = service();

    let mut output = None;
    let id = service
        .create_with(ProcessConfig::new("echo").args(["hello"]), |process| {
            output = Some(process.create_output_stream());
        })
        .await;

    assert!(id >= 0);
    let process = service.get(id).expect("lookup right after create");
    assert_eq!(process.id(), Some(id));

    let mut output = output.unwrap();
    let mut received = Vec::new();
    timeout(WAIT, async {
        while let Some(chunk) = output.recv().await {
            received.extend(chunk);
        }
    })
    .await
    .unwrap();
    assert_eq!(String::from_utf8_lossy(&received), "hello\n");

    wait_until_unregistered(&service, id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_short_lived_process_is_registered_on_return() {
    let service = service();

    for _ in 0..100 {
        let id = service.create(ProcessConfig::new("true")).await;
        assert!(id >= 0);
        assert!(service.get(id).is_some(), "id {} missing right after create", id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unregistered_when_exit_is_observed() {
    let service = service();

    for _ in 0..100 {
        let mut exit = None;
        let id = service
            .create_with(ProcessConfig::new("true"), |process| {
                exit = Some(process.subscribe_exit())
            })
            .await;
        assert!(id >= 0);

        let code = timeout(WAIT, exit.unwrap().recv()).await.unwrap();
        assert_eq!(code, Some(0));
        assert!(service.get(id).is_none(), "id {} still registered after exit", id);
    }
    assert!(service.registry().is_empty());
}

#[tokio::test]
async fn test_missing_executable_returns_sentinel() {
    let service = service();

    let id = service
        .create(ProcessConfig::new("/nonexistent/path/to/binary"))
        .await;

    assert_eq!(id, FAILED_PROCESS_ID);
    assert!(service.get(id).is_none());
    assert!(service.registry().is_empty());
}

#[tokio::test]
async fn test_missing_cwd_returns_sentinel() {
    let service = service();

    let id = service
        .create(ProcessConfig::new("echo").cwd("/nonexistent/working/dir"))
        .await;

    assert_eq!(id, FAILED_PROCESS_ID);
}

#[tokio::test]
async fn test_exit_code_and_unregistration() {
    let service = service();

    let mut attached = None;
    let id = service
        .create_with(
            ProcessConfig::new("sh").args(["-c", "exit 3"]),
            |process| attached = Some((Arc::clone(process), process.subscribe_exit())),
        )
        .await;
    assert!(id >= 0);
    let (process, mut exit) = attached.unwrap();

    let code = timeout(WAIT, exit.recv()).await.unwrap();
    assert_eq!(code, Some(3));

    assert!(service.get(id).is_none());
    assert_eq!(process.state(), ProcessState::Exited { code: 3 });
    assert!(!service.registry().unregister(id));
}

#[tokio::test]
async fn test_last_chunk_precedes_exit() {
    let settings = ServiceConfig {
        buffer: BufferConfig::new(4, Duration::from_millis(5)),
        ..ServiceConfig::default()
    };
    let service = ProcessService::new(Arc::new(NativeLauncher::new()), settings);

    let mut streams = None;
    let id = service
        .create_with(
            ProcessConfig::new("sh").args(["-c", "printf 'abcdefghij'; exit 0"]),
            |process| {
                streams = Some((process.create_output_stream(), process.subscribe_exit()))
            },
        )
        .await;
    assert!(id >= 0);

    let (mut output, mut exit) = streams.unwrap();
    assert_eq!(timeout(WAIT, exit.recv()).await.unwrap(), Some(0));

    let mut chunks = Vec::new();
    while let Ok(chunk) = output.try_recv() {
        chunks.push(chunk);
    }
    assert!(chunks.iter().all(|chunk| chunk.len() <= 4));
    assert_eq!(chunks.concat(), b"abcdefghij");
}

#[tokio::test]
async fn test_dispose_before_exit() {
    let service = service();

    let mut streams = None;
    let id = service
        .create_with(ProcessConfig::new("sleep").args(["30"]), |process| {
            streams = Some((process.subscribe_exit(), process.subscribe_error()))
        })
        .await;
    let process = service.get(id).unwrap();
    let pid = process.pid();
    assert!(pid.is_some());

    assert!(service.dispose(id));
    assert!(service.get(id).is_none());

    let (mut exit, mut errors) = streams.unwrap();
    assert_eq!(timeout(WAIT, exit.recv()).await.unwrap(), None);
    assert_eq!(timeout(WAIT, errors.recv()).await.unwrap(), None);

    timeout(WAIT, process.released()).await.unwrap();
    assert!(!service.dispose(id));
}

#[tokio::test]
async fn test_env_cwd_and_stdin() {
    let dir = TempDir::new().unwrap();
    let service = service();

    let mut output = None;
    let id = service
        .create_with(
            ProcessConfig::new("sh")
                .args(["-c", "read line; echo \"$line $GREETING $(pwd)\""])
                .env("GREETING", "hi")
                .cwd(dir.path()),
            |process| output = Some(process.create_output_stream()),
        )
        .await;
    let process = service.get(id).unwrap();
    process.write("ping\n").await.unwrap();

    let mut output = output.unwrap();
    let mut received = Vec::new();
    timeout(WAIT, async {
        while let Some(chunk) = output.recv().await {
            received.extend(chunk);
        }
    })
    .await
    .unwrap();

    let text = String::from_utf8_lossy(&received);
    assert!(text.starts_with("ping hi "));
    let expected_dir = dir.path().canonicalize().unwrap();
    assert!(text.trim_end().ends_with(expected_dir.to_string_lossy().as_ref()));
}

#[tokio::test]
async fn test_shutdown_disposes_everything() {
    let service = service();

    let ids = vec![
        service.create(ProcessConfig::new("sleep").args(["30"])).await,
        service.create(ProcessConfig::new("sleep").args(["30"])).await,
    ];
    assert!(ids.iter().all(|id| *id >= 0));
    assert_ne!(ids[0], ids[1]);

    timeout(WAIT, service.shutdown()).await.unwrap();
    assert!(service.registry().is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_exit_code_is_reported(code in 0i32..=125) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let reported = runtime.block_on(async {
            let service = service();
            let mut exit = None;
            service
                .create_with(
                    ProcessConfig::new("sh").args(["-c".to_string(), format!("exit {}", code)]),
                    |process| exit = Some(process.subscribe_exit()),
                )
                .await;
            timeout(WAIT, exit.unwrap().recv()).await.unwrap()
        });
        prop_assert_eq!(reported, Some(code));
    }
}
