//! Configuration file watcher for backend hot reload.
//!
//! Reloads the configuration when the file changes or on SIGHUP and hands
//! the validated result to a callback, which reconciles the registry.

use crate::config::{load_config, Config};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

/// Callback type for config reload.
pub type ReloadCallback = Box<dyn Fn(Config) + Send + Sync>;

/// Configuration file watcher.
pub struct ConfigWatcher {
    /// Path to the config file.
    config_path: PathBuf,
    /// Poll interval handed to the file watcher backend.
    poll_interval: Duration,
    /// Callback to invoke when config is reloaded.
    reload_callback: ReloadCallback,
}

impl ConfigWatcher {
    /// Create a new config watcher.
    pub fn new(config_path: PathBuf, poll_interval: Duration, reload_callback: ReloadCallback) -> Self {
        Self {
            config_path,
            poll_interval,
            reload_callback,
        }
    }

    /// Get the path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Run until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(path = %self.config_path.display(), "config watcher starting");

        let (tx, mut events) = mpsc::unbounded_channel();
        let _watcher = match self.watch(tx) {
            Ok(watcher) => watcher,
            Err(e) => {
                error!(error = %e, "failed to watch config file, reload only on SIGHUP");
                None
            }
        };
        let mut hangup = HangupSignal::new();

        info!("config watcher ready, watching for changes");

        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    // Editors emit bursts; one reload per burst.
                    let mut changed = self.should_reload(&event);
                    while let Ok(event) = events.try_recv() {
                        changed |= self.should_reload(&event);
                    }
                    if changed {
                        self.try_reload();
                    }
                }

                _ = hangup.recv() => {
                    info!("received SIGHUP, reloading configuration");
                    self.try_reload();
                }

                _ = shutdown.recv() => {
                    info!("config watcher shutting down");
                    break;
                }
            }
        }
    }

    /// Start watching the config file's directory, so editors that replace
    /// the file are seen. The watcher stops when the returned value drops.
    fn watch(
        &self,
        tx: mpsc::UnboundedSender<Event>,
    ) -> Result<Option<RecommendedWatcher>, notify::Error> {
        let Some(parent) = self.config_path.parent() else {
            return Ok(None);
        };
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default().with_poll_interval(self.poll_interval),
        )?;
        watcher.watch(parent, RecursiveMode::NonRecursive)?;
        Ok(Some(watcher))
    }

    /// Check if this event should trigger a reload.
    fn should_reload(&self, event: &Event) -> bool {
        let is_our_file = event
            .paths
            .iter()
            .any(|p| p.file_name() == self.config_path.file_name());

        let is_modify_or_create = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_));

        is_our_file && is_modify_or_create
    }

    /// Reload the file; a bad file keeps the current configuration.
    fn try_reload(&self) {
        info!(path = %self.config_path.display(), "attempting config reload");

        let new_config = match load_config(&self.config_path) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "failed to load new config, keeping current");
                return;
            }
        };

        info!(
            read_write = new_config.backends.read_write.len(),
            read_only = new_config.backends.read_only.len(),
            "configuration reloaded successfully"
        );
        (self.reload_callback)(new_config);
    }
}

/// SIGHUP listener. Never fires where the signal is unavailable.
struct HangupSignal {
    #[cfg(unix)]
    inner: Option<tokio::signal::unix::Signal>,
}

impl HangupSignal {
    fn new() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let inner = signal(SignalKind::hangup())
                .map_err(|e| warn!(error = %e, "failed to setup SIGHUP handler"))
                .ok();
            Self { inner }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        if let Some(signal) = self.inner.as_mut() {
            if signal.recv().await.is_some() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn watcher_for(path: &str) -> ConfigWatcher {
        let callback: ReloadCallback = Box::new(|_| {});
        ConfigWatcher::new(PathBuf::from(path), Duration::from_secs(2), callback)
    }

    #[test]
    fn test_should_reload_modify() {
        let watcher = watcher_for("/etc/sqlgate/config.yaml");

        let event = Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Data(
                notify::event::DataChange::Content,
            )),
            paths: vec![PathBuf::from("/etc/sqlgate/config.yaml")],
            attrs: Default::default(),
        };

        assert!(watcher.should_reload(&event));
    }

    #[test]
    fn test_should_reload_create() {
        let watcher = watcher_for("/etc/sqlgate/config.yaml");

        let event = Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/etc/sqlgate/config.yaml")],
            attrs: Default::default(),
        };

        assert!(watcher.should_reload(&event));
    }

    #[test]
    fn test_should_reload_wrong_file() {
        let watcher = watcher_for("/etc/sqlgate/config.yaml");

        let event = Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Data(
                notify::event::DataChange::Content,
            )),
            paths: vec![PathBuf::from("/etc/sqlgate/other.yaml")],
            attrs: Default::default(),
        };

        assert!(!watcher.should_reload(&event));
    }

    #[test]
    fn test_should_reload_delete_ignored() {
        let watcher = watcher_for("/etc/sqlgate/config.yaml");

        let event = Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/etc/sqlgate/config.yaml")],
            attrs: Default::default(),
        };

        assert!(!watcher.should_reload(&event));
    }

    #[test]
    fn test_try_reload_invokes_callback_only_for_valid_config() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callback: ReloadCallback = Box::new(move |config| {
            assert_eq!(config.backends.read_only.len(), 1);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"backends:\n  read_only: [\"10.0.0.2:3306@2\"]\n")
            .unwrap();
        let watcher = ConfigWatcher::new(file.path().to_path_buf(), Duration::from_secs(2), callback);

        watcher.try_reload();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        std::fs::write(file.path(), "backends: {}\n").unwrap();
        watcher.try_reload();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_reloads_on_change_and_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sqlgate.yaml");
        std::fs::write(&path, "backends:\n  read_only: [\"10.0.0.2:3306\"]\n").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callback: ReloadCallback = Box::new(move |config| {
            if config.backends.read_only.len() == 2 {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let watcher = ConfigWatcher::new(path.clone(), Duration::from_millis(50), callback);
        let handle = tokio::spawn(watcher.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(
            &path,
            "backends:\n  read_only: [\"10.0.0.2:3306\", \"10.0.0.3:3306\"]\n",
        )
        .unwrap();

        for _ in 0..100 {
            if calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(calls.load(Ordering::SeqCst) >= 1);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
