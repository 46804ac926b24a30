use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use sysinfo::{Pid, System};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Streams older than this are presumed leaked and reaped by the sweep.
pub const MAX_SESSION_AGE: Duration = Duration::from_secs(3 * 60 * 60);

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Bounded wait for a terminated ffmpeg to actually exit.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// One live transcode: the subprocess plus the bookkeeping needed to reap it.
/// Owned exclusively by the [`SessionManager`] for its whole lifetime.
pub struct StreamSession {
    pub id: String,
    pub source: String,
    pub started_at: Instant,
    pub pid: Option<u32>,
    pub child: Arc<Mutex<Child>>,
    pub cancel: tokio_util::sync::CancellationToken,
}

/// Process-wide registry of active streams. Everything that can end a stream
/// (natural completion, client disconnect, the sweep) funnels into
/// [`SessionManager::teardown`]; the map removal at its top is what makes a
/// second trigger a no-op.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<StreamSession>>>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub running: bool,
    pub filename: String,
    pub uptime: u64,
    pub cpu_percent: f32,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: StreamSession) {
        debug!("[Stream {}] registered for {}", short_id(&session.id), session.source);
        self.sessions
            .write()
            .insert(session.id.clone(), Arc::new(session));
    }

    pub fn get(&self, id: &str) -> Option<Arc<StreamSession>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// The single teardown path. The first caller removes the entry, cancels
    /// the forwarding loop, and reaps the subprocess; later callers find no
    /// entry and return `false`.
    pub async fn teardown(&self, id: &str) -> bool {
        let Some(session) = self.sessions.write().remove(id) else {
            return false;
        };

        session.cancel.cancel();

        let mut child = session.child.lock().await;
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("[Stream {}] ffmpeg already exited ({status})", short_id(id));
            }
            _ => {
                info!("[Stream {}] terminating ffmpeg", short_id(id));
                if let Err(err) = child.start_kill() {
                    warn!("[Stream {}] failed to signal ffmpeg: {err}", short_id(id));
                }
                match timeout(KILL_WAIT, child.wait()).await {
                    Ok(Ok(status)) => {
                        debug!("[Stream {}] ffmpeg exited ({status})", short_id(id));
                    }
                    Ok(Err(err)) => {
                        warn!("[Stream {}] wait failed: {err}", short_id(id));
                    }
                    Err(_) => {
                        warn!(
                            "[Stream {}] ffmpeg did not exit within {KILL_WAIT:?}",
                            short_id(id)
                        );
                    }
                }
            }
        }

        true
    }

    /// One sweep pass: removes sessions past the age limit and sessions whose
    /// process already exited without cleanup.
    pub async fn sweep(&self) -> usize {
        let stale: Vec<String> = {
            let sessions = self.sessions.read();
            sessions
                .values()
                .filter_map(|session| {
                    if session.started_at.elapsed() > MAX_SESSION_AGE {
                        warn!(
                            "[Stream {}] running for over 3 hours, cleaning up",
                            short_id(&session.id)
                        );
                        return Some(session.id.clone());
                    }
                    // try_lock: a locked child means a teardown is already in
                    // flight, so the sweep leaves it alone.
                    if let Ok(mut child) = session.child.try_lock()
                        && matches!(child.try_wait(), Ok(Some(_)))
                    {
                        info!(
                            "[Stream {}] process has ended, cleaning up",
                            short_id(&session.id)
                        );
                        return Some(session.id.clone());
                    }
                    None
                })
                .collect()
        };

        let mut removed = 0;
        for id in stale {
            if self.teardown(&id).await {
                removed += 1;
            }
        }
        removed
    }

    /// Spawns the janitor loop; called once when the router is built and runs
    /// for the lifetime of the process. A failed pass is logged, never fatal.
    pub fn spawn_sweeper(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = manager.sweep().await;
                if removed > 0 {
                    info!("Sweep removed {removed} stale stream session(s)");
                }
            }
        });
    }

    /// Stats for the `/stream-stats` endpoint; `None` for unknown sessions.
    pub async fn stats(&self, id: &str) -> Option<SessionStats> {
        let session = self.get(id)?;

        let running = match session.child.try_lock() {
            Ok(mut child) => matches!(child.try_wait(), Ok(None)),
            // Locked means a teardown is mid-flight; report it as running
            // since the entry has not been removed yet.
            Err(_) => true,
        };

        let cpu_percent = match (running, session.pid) {
            (true, Some(pid)) => process_cpu_percent(pid).await,
            _ => 0.0,
        };

        Some(SessionStats {
            running,
            filename: session.source.clone(),
            uptime: session.started_at.elapsed().as_secs(),
            cpu_percent,
        })
    }
}

/// sysinfo computes usage from the delta between two refreshes, hence the
/// short sleep.
async fn process_cpu_percent(pid: u32) -> f32 {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    if !sys.refresh_process(pid) {
        return 0.0;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    sys.refresh_process(pid);
    sys.process(pid).map(|proc| proc.cpu_usage()).unwrap_or(0.0)
}

pub(crate) fn short_id(id: &str) -> &str {
    &id[..id.len().min(8)]
}

#[cfg(all(test, unix))]
mod tests {
    use std::process::Stdio;

    use tokio_util::sync::CancellationToken;

    use super::*;

    fn spawn_command(program: &str, args: &[&str]) -> Child {
        tokio::process::Command::new(program)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn test process")
    }

    fn session_for(id: &str, source: &str, child: Child) -> StreamSession {
        let pid = child.id();
        StreamSession {
            id: id.to_string(),
            source: source.to_string(),
            started_at: Instant::now(),
            pid,
            child: Arc::new(Mutex::new(child)),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn teardown_removes_the_session_and_is_idempotent() {
        let manager = SessionManager::new();
        manager.register(session_for("s1", "a.mkv", spawn_command("sleep", &["30"])));

        assert!(manager.teardown("s1").await);
        assert!(manager.get("s1").is_none());
        assert_eq!(manager.active_count(), 0);

        // Second teardown of the same identifier is a no-op.
        assert!(!manager.teardown("s1").await);
    }

    #[tokio::test]
    async fn teardown_of_unknown_session_is_a_no_op() {
        let manager = SessionManager::new();
        assert!(!manager.teardown("missing").await);
    }

    #[tokio::test]
    async fn sweep_reaps_sessions_whose_process_exited() {
        let manager = SessionManager::new();
        manager.register(session_for("dead", "b.mkv", spawn_command("true", &[])));
        manager.register(session_for("live", "c.mkv", spawn_command("sleep", &["30"])));

        // Give the short-lived process time to exit.
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(manager.sweep().await, 1);
        assert!(manager.get("dead").is_none());
        assert!(manager.get("live").is_some());

        manager.teardown("live").await;
    }

    #[tokio::test]
    async fn stats_report_running_state_and_go_away_after_teardown() {
        let manager = SessionManager::new();
        manager.register(session_for("s2", "d.mkv", spawn_command("sleep", &["30"])));

        let stats = manager.stats("s2").await.expect("session should exist");
        assert!(stats.running);
        assert_eq!(stats.filename, "d.mkv");

        manager.teardown("s2").await;
        assert!(manager.stats("s2").await.is_none());
    }
}
