//! PTY-backed Process Host: one shell session per session id.

use chrono::Utc;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;

use crate::error::PtyError;
use crate::types::OutputChunk;

/// The narrow surface the execution lifecycle manager consumes.
///
/// `has_session` is the completion-detection channel: a session stops being
/// reported as soon as its child process has been observed dead.
pub trait ProcessHost: Send + Sync {
    fn create(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), PtyError>;
    fn write(&self, session_id: &str, data: &str) -> Result<(), PtyError>;
    fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), PtyError>;
    fn close(&self, session_id: &str) -> Result<(), PtyError>;
    fn has_session(&self, session_id: &str) -> bool;
}

struct PtySession {
    child: Box<dyn Child + Send + Sync>,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    output_rx: mpsc::Receiver<OutputChunk>,
}

/// Process Host implementation over the native PTY system.
pub struct PtyHost {
    shell_bin: String,
    sessions: Mutex<HashMap<String, PtySession>>,
}

impl PtyHost {
    pub fn new(shell_bin: impl Into<String>) -> Self {
        Self {
            shell_bin: shell_bin.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Drain buffered output lines for a session without blocking.
    ///
    /// The out-of-band output channel: a reader thread pipes PTY output into
    /// a per-session buffer which callers (terminal views) pull from here.
    pub fn drain_output(&self, session_id: &str) -> Result<Vec<OutputChunk>, PtyError> {
        let sessions = self.sessions.lock().expect("pty session table lock");
        let session = sessions
            .get(session_id)
            .ok_or_else(|| PtyError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;

        let mut chunks = Vec::new();
        while let Ok(chunk) = session.output_rx.try_recv() {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect("pty session table lock").len()
    }

    /// Kill and reap every session. Used by shutdown paths.
    pub fn close_all(&self) {
        let mut sessions = self.sessions.lock().expect("pty session table lock");
        for (_id, mut session) in sessions.drain() {
            let _ = session.child.kill();
            let _ = session.child.wait();
        }
    }
}

impl ProcessHost for PtyHost {
    fn create(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), PtyError> {
        let mut sessions = self.sessions.lock().expect("pty session table lock");
        if sessions.contains_key(session_id) {
            return Err(PtyError::SessionExists {
                session_id: session_id.to_string(),
            });
        }

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| PtyError::PtySetup {
                message: err.to_string(),
            })?;

        let command = CommandBuilder::new(self.shell_bin.clone());
        let child = pair
            .slave
            .spawn_command(command)
            .map_err(|err| PtyError::Spawn {
                message: err.to_string(),
            })?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| PtyError::PtySetup {
                message: err.to_string(),
            })?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|err| PtyError::PtySetup {
                message: err.to_string(),
            })?;

        let (tx, rx) = mpsc::channel::<OutputChunk>();
        thread::spawn(move || {
            let mut buf = BufReader::new(reader);
            loop {
                let mut line = String::new();
                match buf.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let _ = tx.send(OutputChunk {
                            at: Utc::now(),
                            text: line,
                        });
                    }
                    Err(_) => break,
                }
            }
        });

        sessions.insert(
            session_id.to_string(),
            PtySession {
                child,
                master: pair.master,
                writer,
                output_rx: rx,
            },
        );
        Ok(())
    }

    fn write(&self, session_id: &str, data: &str) -> Result<(), PtyError> {
        let mut sessions = self.sessions.lock().expect("pty session table lock");
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| PtyError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;

        session
            .writer
            .write_all(data.as_bytes())
            .and_then(|()| session.writer.flush())
            .map_err(|source| PtyError::Write {
                session_id: session_id.to_string(),
                source,
            })
    }

    fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), PtyError> {
        let sessions = self.sessions.lock().expect("pty session table lock");
        let session = sessions
            .get(session_id)
            .ok_or_else(|| PtyError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;

        session
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| PtyError::Resize {
                session_id: session_id.to_string(),
                message: err.to_string(),
            })
    }

    fn close(&self, session_id: &str) -> Result<(), PtyError> {
        // Closing an already-gone session is a no-op: cancellation and
        // completion detection may race to this call.
        let mut sessions = self.sessions.lock().expect("pty session table lock");
        if let Some(mut session) = sessions.remove(session_id) {
            let _ = session.child.kill();
            let _ = session.child.wait();
        }
        Ok(())
    }

    fn has_session(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().expect("pty session table lock");
        let alive = match sessions.get_mut(session_id) {
            Some(session) => match session.child.try_wait() {
                Ok(None) => true,
                Ok(Some(_status)) => false,
                Err(_) => false,
            },
            None => return false,
        };
        if !alive {
            sessions.remove(session_id);
        }
        alive
    }
}

#[cfg(test)]
mod tests {
    use super::{ProcessHost, PtyHost};
    use crate::error::PtyError;
    use std::time::{Duration, Instant};

    fn wait_until_gone(host: &PtyHost, session_id: &str, deadline: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if !host.has_session(session_id) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(25));
        }
        false
    }

    #[test]
    fn has_session_is_false_for_unknown_id() {
        let host = PtyHost::new("sh");
        assert!(!host.has_session("exec-missing"));
    }

    #[test]
    fn write_to_unknown_session_fails() {
        let host = PtyHost::new("sh");
        let err = host
            .write("exec-missing", "echo hi\n")
            .expect_err("write must fail without a session");
        assert!(matches!(err, PtyError::SessionNotFound { .. }));
    }

    #[test]
    fn close_unknown_session_is_a_noop() {
        let host = PtyHost::new("sh");
        host.close("exec-missing").expect("close is idempotent");
    }

    #[test]
    fn create_spawns_a_live_session_and_close_reaps_it() {
        let host = PtyHost::new("sh");
        host.create("exec-t1", 80, 24).expect("create session");
        assert!(host.has_session("exec-t1"));
        assert_eq!(host.session_count(), 1);

        host.close("exec-t1").expect("close session");
        assert!(!host.has_session("exec-t1"));
        assert_eq!(host.session_count(), 0);
    }

    #[test]
    fn duplicate_session_id_is_rejected() {
        let host = PtyHost::new("sh");
        host.create("exec-dup", 80, 24).expect("create session");
        let err = host
            .create("exec-dup", 80, 24)
            .expect_err("duplicate id must fail");
        assert!(matches!(err, PtyError::SessionExists { .. }));
        host.close("exec-dup").expect("close session");
    }

    #[test]
    fn session_disappears_after_shell_exits() {
        let host = PtyHost::new("sh");
        host.create("exec-exit", 80, 24).expect("create session");
        host.write("exec-exit", "exit 0\n").expect("write exit");

        assert!(
            wait_until_gone(&host, "exec-exit", Duration::from_secs(5)),
            "session should vanish once the shell exits"
        );
    }

    #[test]
    fn drain_output_returns_echoed_lines() {
        let host = PtyHost::new("sh");
        host.create("exec-echo", 80, 24).expect("create session");
        host.write("exec-echo", "echo ready-marker\n")
            .expect("write echo");

        let start = Instant::now();
        let mut seen = Vec::new();
        while start.elapsed() < Duration::from_secs(5) {
            seen.extend(host.drain_output("exec-echo").expect("drain output"));
            if seen.iter().any(|chunk| chunk.text.contains("ready-marker")) {
                break;
            }
            std::thread::sleep(Duration::from_millis(25));
        }
        assert!(
            seen.iter().any(|chunk| chunk.text.contains("ready-marker")),
            "expected echoed marker in output, got {seen:?}"
        );
        host.close("exec-echo").expect("close session");
    }

    #[test]
    fn resize_applies_to_live_session() {
        let host = PtyHost::new("sh");
        host.create("exec-resize", 80, 24).expect("create session");
        host.resize("exec-resize", 132, 43).expect("resize session");
        host.close("exec-resize").expect("close session");
    }

    #[test]
    fn close_all_drains_every_session() {
        let host = PtyHost::new("sh");
        host.create("exec-a", 80, 24).expect("create a");
        host.create("exec-b", 80, 24).expect("create b");
        assert_eq!(host.session_count(), 2);

        host.close_all();
        assert_eq!(host.session_count(), 0);
        assert!(!host.has_session("exec-a"));
        assert!(!host.has_session("exec-b"));
    }
}
