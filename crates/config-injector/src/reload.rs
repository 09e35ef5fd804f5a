use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::config::WebhookConfig;
use crate::state::{load_certified_key, SharedState};

/// Quiet period after a file event before the reload runs. Certificate
/// rotations and configuration updates touch several files in a burst,
/// the debounce collapses the burst into a single reload.
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches the configuration and certificate files and swaps the shared
/// state when they change. A failed reload keeps the last good state.
pub struct ReloadManager {
    state: SharedState,
    config_file: PathBuf,
    cert_file: PathBuf,
    key_file: PathBuf,
    health_check_interval: Option<Duration>,
    health_check_file: Option<PathBuf>,
}

impl ReloadManager {
    pub fn new(
        state: SharedState,
        config_file: PathBuf,
        cert_file: PathBuf,
        key_file: PathBuf,
        health_check_interval: Option<Duration>,
        health_check_file: Option<PathBuf>,
    ) -> Self {
        ReloadManager {
            state,
            config_file,
            cert_file,
            key_file,
            health_check_interval,
            health_check_file,
        }
    }

    fn reload(&self) -> Result<u64> {
        let config = WebhookConfig::load(&self.config_file)?;
        let cert = load_certified_key(&self.cert_file, &self.key_file)?;
        Ok(self.state.replace(config, cert))
    }

    /// Re-reads the watched files without touching the shared state and
    /// refreshes the health check file when everything parses.
    fn run_health_check(&self) {
        let result = WebhookConfig::load(&self.config_file)
            .and_then(|_| load_certified_key(&self.cert_file, &self.key_file));
        match result {
            Ok(_) => {
                if let Some(path) = &self.health_check_file {
                    if let Err(error) = std::fs::write(path, b"ok") {
                        warn!(%error, "cannot write health check file");
                    }
                }
            }
            Err(error) => error!(%error, "periodic health check failed"),
        }
    }

    /// There's no watching of the files on non-linux platforms since we
    /// rely on inotify to watch for changes
    #[cfg(not(target_os = "linux"))]
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        warn!("hot reload is not available on this platform");

        let mut health_interval = self.health_check_interval.map(tokio::time::interval);

        loop {
            tokio::select! {
                _ = async { health_interval.as_mut().expect("guarded by is_some").tick().await },
                    if health_interval.is_some() =>
                {
                    self.run_health_check();
                }
                _ = &mut shutdown => {
                    info!("reload manager shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Watch for changes using inotify, which is available only on linux.
    #[cfg(target_os = "linux")]
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        use anyhow::anyhow;
        use inotify::WatchMask;
        use std::collections::BTreeSet;
        use std::path::Path;
        use tokio_stream::StreamExt;

        let inotify =
            inotify::Inotify::init().map_err(|e| anyhow!("Cannot initialize inotify: {e}"))?;

        // Kubernetes mounts secrets and config maps through symlinks that
        // are swapped atomically, an event never fires on the file itself.
        // Watching the parent directories catches the swap.
        let mask = WatchMask::CREATE | WatchMask::CLOSE_WRITE | WatchMask::MOVED_TO;
        let mut watched_dirs = BTreeSet::new();
        for file in [&self.config_file, &self.cert_file, &self.key_file] {
            let dir = file
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            if watched_dirs.insert(dir.to_path_buf()) {
                inotify
                    .watches()
                    .add(dir, mask)
                    .map_err(|e| anyhow!("Cannot watch directory {}: {e}", dir.display()))?;
            }
        }

        let buffer = [0; 1024];
        let stream = inotify
            .into_event_stream(buffer)
            .map_err(|e| anyhow!("Cannot create inotify event stream: {e}"))?;
        tokio::pin!(stream);

        let debounce = tokio::time::sleep(DEBOUNCE);
        tokio::pin!(debounce);
        let mut reload_pending = false;

        let mut health_interval = self.health_check_interval.map(tokio::time::interval);

        loop {
            tokio::select! {
                event = stream.next() => {
                    match event {
                        Some(Ok(event)) => {
                            info!(name = ?event.name, "watched directory changed");
                            reload_pending = true;
                            debounce
                                .as_mut()
                                .reset(tokio::time::Instant::now() + DEBOUNCE);
                        }
                        Some(Err(e)) => warn!("Cannot read inotify event: {e}"),
                        None => {
                            warn!("inotify event stream closed");
                            return Ok(());
                        }
                    }
                }
                () = &mut debounce, if reload_pending => {
                    reload_pending = false;
                    match self.reload() {
                        Ok(revision) => info!(revision, "configuration reloaded"),
                        Err(error) => {
                            error!(%error, "reload failed, keeping the last good state");
                        }
                    }
                }
                _ = async { health_interval.as_mut().expect("guarded by is_some").tick().await },
                    if health_interval.is_some() =>
                {
                    self.run_health_check();
                }
                _ = &mut shutdown => {
                    info!("reload manager shutting down");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::state::parse_certified_key;
    use std::path::Path;

    struct WatchedFiles {
        dir: tempfile::TempDir,
        state: SharedState,
    }

    impl WatchedFiles {
        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }
    }

    fn write_cert_material(dir: &Path) {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["localhost".to_owned()])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();
        std::fs::write(dir.join("tls.crt"), cert.pem()).unwrap();
        std::fs::write(dir.join("tls.key"), key_pair.serialize_pem()).unwrap();
    }

    fn setup() -> WatchedFiles {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.yaml"), "policy: enabled\n").unwrap();
        write_cert_material(dir.path());

        let cert = parse_certified_key(
            &std::fs::read(dir.path().join("tls.crt")).unwrap(),
            &std::fs::read(dir.path().join("tls.key")).unwrap(),
        )
        .unwrap();
        let state = SharedState::new(WebhookConfig::default(), cert);

        WatchedFiles { dir, state }
    }

    fn spawn_manager(files: &WatchedFiles) -> oneshot::Sender<()> {
        let manager = ReloadManager::new(
            files.state.clone(),
            files.path("config.yaml"),
            files.path("tls.crt"),
            files.path("tls.key"),
            None,
            None,
        );
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(manager.run(shutdown_rx));
        shutdown_tx
    }

    #[tokio::test]
    async fn burst_of_writes_causes_a_single_reload() {
        let files = setup();
        let shutdown = spawn_manager(&files);

        // let the watcher register before producing events
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(files.state.revision(), 0);

        for _ in 0..3 {
            std::fs::write(files.path("config.yaml"), "policy: disabled\n").unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(files.state.revision(), 1);
        assert_eq!(
            files.state.config().policy,
            crate::config::InjectionPolicy::Disabled
        );

        shutdown.send(()).unwrap();
    }

    #[tokio::test]
    async fn broken_configuration_keeps_the_last_good_state() {
        let files = setup();
        let shutdown = spawn_manager(&files);

        tokio::time::sleep(Duration::from_millis(150)).await;

        std::fs::write(files.path("config.yaml"), "policy: sometimes\n").unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(files.state.revision(), 0);
        assert_eq!(
            files.state.config().policy,
            crate::config::InjectionPolicy::Enabled
        );

        // a subsequent fix is picked up
        std::fs::write(files.path("config.yaml"), "policy: disabled\n").unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(files.state.revision(), 1);
        assert_eq!(
            files.state.config().policy,
            crate::config::InjectionPolicy::Disabled
        );

        shutdown.send(()).unwrap();
    }

    #[tokio::test]
    async fn certificate_rotation_is_picked_up() {
        let files = setup();
        let old_der = files.state.certified_key().cert[0].clone();
        let shutdown = spawn_manager(&files);

        tokio::time::sleep(Duration::from_millis(150)).await;

        write_cert_material(files.dir.path());
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(files.state.revision(), 1);
        assert_ne!(files.state.certified_key().cert[0], old_der);

        shutdown.send(()).unwrap();
    }
}
