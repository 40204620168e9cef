//! Fava web dashboard supervisor.
//!
//! One fava subprocess serves every per-user ledger file under the ledger
//! root. After each accepted write the supervisor rescans the directory and
//! restarts fava only when the set of ledger files changed.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::{process::Child, sync::Mutex, time::timeout};

use crate::Result;

const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct DashboardConfig {
    pub enabled: bool,
    /// Binary to exec; usually just `fava`, resolved via PATH.
    pub fava_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub ledger_root: PathBuf,
}

struct Supervised {
    child: Option<Child>,
    ledgers: BTreeSet<PathBuf>,
}

pub struct DashboardSupervisor {
    cfg: DashboardConfig,
    state: Mutex<Supervised>,
}

impl DashboardSupervisor {
    pub fn new(cfg: DashboardConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(Supervised {
                child: None,
                ledgers: BTreeSet::new(),
            }),
        }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    pub async fn start(&self) -> Result<()> {
        self.refresh().await
    }

    /// Rescan the ledger root and (re)start fava if the file set changed or
    /// the process died. No-op while disabled.
    pub async fn refresh(&self) -> Result<()> {
        if !self.cfg.enabled {
            return Ok(());
        }

        let mut state = self.state.lock().await;

        std::fs::create_dir_all(&self.cfg.ledger_root)?;
        let ledgers = discover_ledgers(&self.cfg.ledger_root)?;

        if ledgers.is_empty() {
            stop_child(&mut state.child).await;
            state.ledgers.clear();
            return Ok(());
        }

        let running = matches!(
            state.child.as_mut().map(|c| c.try_wait()),
            Some(Ok(None))
        );
        if ledgers == state.ledgers && running {
            return Ok(());
        }

        stop_child(&mut state.child).await;

        eprintln!(
            "[FAVA] Starting on {}:{} with {} ledger(s)",
            self.cfg.host,
            self.cfg.port,
            ledgers.len()
        );

        let mut cmd = tokio::process::Command::new(&self.cfg.fava_path);
        cmd.arg("--host")
            .arg(&self.cfg.host)
            .arg("--port")
            .arg(self.cfg.port.to_string())
            .args(ledgers.iter())
            .current_dir(&self.cfg.ledger_root)
            .kill_on_drop(true);

        match cmd.spawn() {
            Ok(child) => {
                state.child = Some(child);
                state.ledgers = ledgers;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "[FAVA] Could not start: `{}` not found. Install fava to enable the web UI.",
                    self.cfg.fava_path.display()
                );
                state.ledgers.clear();
            }
            Err(e) => {
                eprintln!("[FAVA] Failed to start: {e}");
                state.ledgers.clear();
            }
        }

        Ok(())
    }

    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        stop_child(&mut state.child).await;
    }
}

fn discover_ledgers(root: &Path) -> Result<BTreeSet<PathBuf>> {
    let mut out = BTreeSet::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("bean") | Some("beancount") => {
                out.insert(path);
            }
            _ => {}
        }
    }
    Ok(out)
}

/// Best-effort stop + reap. Bounded wait so a wedged fava cannot stall the
/// dispatcher.
async fn stop_child(slot: &mut Option<Child>) {
    let Some(mut child) = slot.take() else {
        return;
    };
    // If it's already exited, `try_wait` reaps it.
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }

    if let Some(pid) = child.id() {
        eprintln!("[FAVA] Stopping process (pid={pid})");
    }
    if let Err(e) = child.kill().await {
        eprintln!("[FAVA] Failed to kill process: {e}");
        return;
    }
    if timeout(STOP_GRACE, child.wait()).await.is_err() {
        eprintln!("[FAVA] Process did not exit after kill.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_root(prefix: &str) -> PathBuf {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis();
        let dir = std::env::temp_dir().join(format!(
            "beanbot-fava-{prefix}-{}-{}",
            std::process::id(),
            millis
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn discovers_only_ledger_files() {
        let root = tmp_root("discover");
        std::fs::write(root.join("1.bean"), "").unwrap();
        std::fs::write(root.join("2.beancount"), "").unwrap();
        std::fs::write(root.join("notes.txt"), "").unwrap();
        std::fs::create_dir_all(root.join("sub.bean")).unwrap();

        let found = discover_ledgers(&root).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains(&root.join("1.bean")));
        assert!(found.contains(&root.join("2.beancount")));
    }

    #[tokio::test]
    async fn disabled_supervisor_never_spawns() {
        let root = tmp_root("disabled");
        std::fs::write(root.join("1.bean"), "").unwrap();
        let sup = DashboardSupervisor::new(DashboardConfig {
            enabled: false,
            fava_path: PathBuf::from("definitely-not-a-real-binary"),
            host: "127.0.0.1".to_string(),
            port: 5001,
            ledger_root: root,
        });
        sup.refresh().await.unwrap();
        assert!(sup.state.lock().await.child.is_none());
    }

    #[tokio::test]
    async fn missing_binary_is_not_fatal() {
        let root = tmp_root("missing-bin");
        std::fs::write(root.join("1.bean"), "").unwrap();
        let sup = DashboardSupervisor::new(DashboardConfig {
            enabled: true,
            fava_path: PathBuf::from("beanbot-no-such-fava-binary"),
            host: "127.0.0.1".to_string(),
            port: 5001,
            ledger_root: root,
        });
        sup.refresh().await.unwrap();
        assert!(sup.state.lock().await.child.is_none());
    }
}
