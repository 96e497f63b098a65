//! End-to-end checks of the `piper-kit` JSON-line bridge process.

#![cfg(unix)]

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

struct Bridge {
    child: Child,
    stdin: ChildStdin,
    events: Lines<BufReader<ChildStdout>>,
    _home: tempfile::TempDir,
}

impl Bridge {
    fn spawn() -> Self {
        let home = tempfile::tempdir().unwrap();
        let mut child = Command::new(env!("CARGO_BIN_EXE_piper-kit"))
            .env("PIPER_KIT_HOME", home.path())
            .env("RUST_LOG", "off")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdin = child.stdin.take().unwrap();
        let events = BufReader::new(child.stdout.take().unwrap()).lines();
        Self {
            child,
            stdin,
            events,
            _home: home,
        }
    }

    async fn send(&mut self, line: &str) {
        self.stdin.write_all(line.as_bytes()).await.unwrap();
        self.stdin.write_all(b"\n").await.unwrap();
        self.stdin.flush().await.unwrap();
    }

    async fn next_event(&mut self) -> serde_json::Value {
        let line = tokio::time::timeout(Duration::from_secs(10), self.events.next_line())
            .await
            .expect("event within 10s")
            .unwrap()
            .expect("stdout still open");
        serde_json::from_str(&line).unwrap()
    }

    async fn interrupt(&self) {
        let pid = self.child.id().unwrap().to_string();
        let status = Command::new("kill")
            .args(["-INT", &pid])
            .status()
            .await
            .unwrap();
        assert!(status.success());
    }
}

#[tokio::test]
async fn test_ping_is_answered() {
    let mut bridge = Bridge::spawn();
    assert_eq!(bridge.next_event().await["event"], "starting");
    bridge.send(r#"{"command":"ping"}"#).await;
    assert_eq!(bridge.next_event().await["event"], "pong");
}

#[tokio::test]
async fn test_sigint_shuts_down_idle_bridge() {
    let mut bridge = Bridge::spawn();
    assert_eq!(bridge.next_event().await["event"], "starting");
    bridge.send(r#"{"command":"ping"}"#).await;
    assert_eq!(bridge.next_event().await["event"], "pong");

    bridge.interrupt().await;
    assert_eq!(bridge.next_event().await["event"], "stopping");
    let status = tokio::time::timeout(Duration::from_secs(10), bridge.child.wait())
        .await
        .expect("bridge exits after SIGINT")
        .unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn test_stop_command_exits_cleanly() {
    let mut bridge = Bridge::spawn();
    assert_eq!(bridge.next_event().await["event"], "starting");
    bridge.send(r#"{"command":"stop"}"#).await;
    assert_eq!(bridge.next_event().await["event"], "stopping");
    let status = tokio::time::timeout(Duration::from_secs(10), bridge.child.wait())
        .await
        .expect("bridge exits after stop")
        .unwrap();
    assert!(status.success());
}
