//! Making newly created users usable in the live proxy.
//!
//! The proxy itself is external. The engine only hands it the uuids created
//! in this cycle; failures are reported but never undo the user commit.

use crate::error::{SyncError, SyncResult};
use panelsync_protocol::ActivationEntry;
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Proxy activation client.
pub trait Activator: Send + Sync {
    /// Activates `uuids` in the traffic layer.
    fn activate(&self, uuids: &[Uuid]) -> SyncResult<()>;
}

impl<A: Activator + ?Sized> Activator for Box<A> {
    fn activate(&self, uuids: &[Uuid]) -> SyncResult<()> {
        (**self).activate(uuids)
    }
}

/// Pairs every inbound tag with every uuid.
pub fn activation_plan(inbound_tags: &[String], uuids: &[Uuid]) -> Vec<ActivationEntry> {
    uuids
        .iter()
        .flat_map(|uuid| {
            inbound_tags
                .iter()
                .map(move |tag| ActivationEntry::new(tag, *uuid))
        })
        .collect()
}

/// Time an activation program may run when none is configured.
pub const DEFAULT_ACTIVATION_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Runs an external program to activate users.
///
/// The program receives the configured arguments followed by the uuids, and
/// the JSON activation plan on stdin. Exit status 0 means success. A program
/// still running after the timeout is killed and the call fails.
#[derive(Debug, Clone)]
pub struct CommandActivator {
    program: PathBuf,
    args: Vec<String>,
    inbound_tags: Vec<String>,
    timeout: Duration,
}

impl CommandActivator {
    /// Creates an activator for `program`.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, inbound_tags: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            inbound_tags,
            timeout: DEFAULT_ACTIVATION_TIMEOUT,
        }
    }

    /// Sets how long the program may run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn failed(&self, what: impl fmt::Display) -> SyncError {
        SyncError::Activation(format!("{}: {what}", self.program.display()))
    }
}

impl Activator for CommandActivator {
    fn activate(&self, uuids: &[Uuid]) -> SyncResult<()> {
        let plan = activation_plan(&self.inbound_tags, uuids);
        let input = serde_json::to_vec(&plan).map_err(|e| SyncError::Activation(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .args(uuids.iter().map(Uuid::to_string))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.failed(format_args!("cannot run: {e}")))?;

        // Pipes are serviced off this thread so a chatty or non-reading
        // program cannot stall the deadline.
        let writer = child.stdin.take().map(|mut stdin| {
            thread::spawn(move || match stdin.write_all(&input) {
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            })
        });
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let Some(status) = wait_until(&mut child, Instant::now() + self.timeout)? else {
            if let Err(e) = child.kill() {
                tracing::warn!(program = %self.program.display(), error = %e, "failed to kill activation command");
            }
            child.wait()?;
            return Err(self.failed(format_args!(
                "no exit within {}s, killed",
                self.timeout.as_secs_f64()
            )));
        };

        if let Some(writer) = writer {
            writer
                .join()
                .map_err(|_| self.failed("stdin writer panicked"))??;
        }
        let stdout = collect(stdout);
        let stderr = collect(stderr);

        if !status.success() {
            return Err(self.failed(format_args!(
                "exited with {status}: {}",
                String::from_utf8_lossy(&stderr).trim()
            )));
        }

        tracing::debug!(
            entries = plan.len(),
            stdout = %String::from_utf8_lossy(&stdout).trim(),
            "activation command finished"
        );
        Ok(())
    }
}

/// Polls `child` until it exits or `deadline` passes.
fn wait_until(child: &mut Child, deadline: Instant) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        thread::sleep(remaining.min(POLL_INTERVAL));
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        // Partial output is still worth logging.
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Activator used when no command is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopActivator;

impl Activator for NoopActivator {
    fn activate(&self, uuids: &[Uuid]) -> SyncResult<()> {
        tracing::info!(
            count = uuids.len(),
            "no activation command configured, new users wait for the next proxy restart"
        );
        Ok(())
    }
}

/// An activator that records calls, for testing.
#[derive(Debug, Default)]
pub struct RecordingActivator {
    calls: Mutex<Vec<Vec<Uuid>>>,
    failing: Mutex<bool>,
}

impl RecordingActivator {
    /// Creates a recording activator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent calls fail (after being recorded).
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    /// Returns the uuid sets passed so far.
    pub fn calls(&self) -> Vec<Vec<Uuid>> {
        self.calls.lock().clone()
    }
}

impl Activator for RecordingActivator {
    fn activate(&self, uuids: &[Uuid]) -> SyncResult<()> {
        self.calls.lock().push(uuids.to_vec());
        if *self.failing.lock() {
            return Err(SyncError::Activation("injected activation failure".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panelsync_protocol::InboundProtocol;

    #[test]
    fn plan_covers_every_tag_and_uuid() {
        let tags = vec!["realityin_tcp".to_string(), "trojan_ws".to_string()];
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let plan = activation_plan(&tags, &[a, b]);
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0].uuid, a);
        assert_eq!(plan[0].protocol, InboundProtocol::Vless);
        assert_eq!(plan[0].flow.as_deref(), Some("xtls-rprx-vision"));
        assert_eq!(plan[1].protocol, InboundProtocol::Trojan);
        assert_eq!(plan[1].flow, None);
        assert_eq!(plan[3].email, format!("{b}@hiddify.com"));
    }

    #[test]
    fn boxed_activator_delegates() {
        let boxed: Box<dyn Activator> = Box::new(NoopActivator);
        boxed.activate(&[Uuid::new_v4()]).unwrap();
    }

    #[test]
    fn recording_activator() {
        let activator = RecordingActivator::new();
        let uuid = Uuid::new_v4();
        activator.activate(&[uuid]).unwrap();
        activator.set_failing(true);
        assert!(activator.activate(&[uuid]).is_err());
        assert_eq!(activator.calls(), vec![vec![uuid], vec![uuid]]);
    }

    #[cfg(unix)]
    #[test]
    fn command_activator_exit_status() {
        let ok = CommandActivator::new("true", Vec::new(), vec!["vless_tcp".into()]);
        ok.activate(&[Uuid::new_v4()]).unwrap();

        let failing = CommandActivator::new("false", Vec::new(), vec!["vless_tcp".into()]);
        assert!(matches!(
            failing.activate(&[Uuid::new_v4()]),
            Err(SyncError::Activation(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn command_activator_receives_plan_on_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("plan.json");
        let script = format!("cat > {}", out.display());
        let activator = CommandActivator::new(
            "sh",
            vec!["-c".into(), script, "activate".into()],
            vec!["vmess_ws".into()],
        );
        let uuid = Uuid::new_v4();
        activator.activate(&[uuid]).unwrap();

        let plan: Vec<ActivationEntry> =
            serde_json::from_slice(&std::fs::read(&out).unwrap()).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].uuid, uuid);
        assert_eq!(plan[0].protocol, InboundProtocol::Vmess);
    }

    #[cfg(unix)]
    #[test]
    fn hung_command_is_killed_at_the_deadline() {
        let activator = CommandActivator::new(
            "sleep",
            vec!["30".into()],
            vec!["vless_tcp".into()],
        )
        .with_timeout(Duration::from_millis(300));
        let started = Instant::now();

        let result = activator.activate(&[]);

        assert!(matches!(result, Err(SyncError::Activation(msg)) if msg.contains("killed")));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn large_plan_is_delivered_to_a_slow_reader() {
        let activator = CommandActivator::new(
            "sh",
            vec!["-c".into(), "sleep 0.2; wc -c >/dev/null".into(), "activate".into()],
            vec!["vless_tcp".into(), "trojan_ws".into()],
        )
        .with_timeout(Duration::from_secs(10));
        let uuids: Vec<Uuid> = (0..2000).map(|_| Uuid::new_v4()).collect();

        activator.activate(&uuids).unwrap();
    }

    #[test]
    fn missing_program_is_an_activation_error() {
        let activator = CommandActivator::new(
            "/nonexistent/panelsync-activate",
            Vec::new(),
            vec!["vless_tcp".into()],
        );
        assert!(matches!(
            activator.activate(&[Uuid::new_v4()]),
            Err(SyncError::Activation(_))
        ));
    }
}
