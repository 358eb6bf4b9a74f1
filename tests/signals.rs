//! Termination signals reach the shutdown latch.
//!
//! Kept in its own test binary: the SIGTERM handler installed here is
//! process-wide.

#![cfg(unix)]

use std::process::Command;
use std::time::Duration;

use parts_search_server::lifecycle::signals::spawn_signal_listener;
use parts_search_server::lifecycle::{LifecycleState, Shutdown};

mod common;

use common::{start_server, test_config};

fn send_to_self(signal: &str) {
    let status = Command::new("kill")
        .args([signal, &std::process::id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn sigterm_drains_a_running_server() {
    let server = start_server(test_config()).await;
    let shutdown: Shutdown = server.handle.shutdown_handle();
    let lifecycle = server.handle.lifecycle().clone();
    let listener = spawn_signal_listener(shutdown.clone());

    send_to_self("-TERM");

    tokio::time::timeout(Duration::from_secs(5), shutdown.triggered())
        .await
        .expect("SIGTERM never fired the shutdown latch");
    assert!(shutdown.is_triggered());

    // Repeated signals are absorbed by the latch.
    send_to_self("-TERM");

    tokio::time::timeout(Duration::from_secs(5), server.handle.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lifecycle.current(), LifecycleState::Stopped);
    listener.abort();
}
