use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::Config;
use crate::error::{Error, Result};

/// How long a cached parse stays valid without re-statting content.
pub const CACHE_TTL: Duration = Duration::from_secs(1);

/// Poll interval of the mtime watcher.
pub const WATCH_INTERVAL: Duration = Duration::from_secs(1);

struct CacheEntry {
    path: PathBuf,
    mtime: SystemTime,
    cached_at: Instant,
    config: Config,
}

/// Disk-backed configuration store.
///
/// Owns the on-disk file during writes; everyone else goes through
/// [`ConfigStore::load`], which serves a 1 s `(path, mtime)` cache so hot
/// API paths never re-parse an unchanged file.
pub struct ConfigStore {
    path: PathBuf,
    cache: Mutex<Option<CacheEntry>>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load from the store's default path.
    pub async fn load(&self) -> Result<Config> {
        let path = self.path.clone();
        self.load_from(&path).await
    }

    /// Load, parse, validate, and normalize a configuration file.
    ///
    /// A missing file yields the built-in defaults. Environment overrides
    /// are applied last, so they win over the document on every load.
    pub async fn load_from(&self, path: &Path) -> Result<Config> {
        let abs = absolutize(path);

        let mtime = match tokio::fs::metadata(&abs).await {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %abs.display(), "config file absent, using defaults");
                let mut cfg = Config::default();
                cfg.normalize();
                cfg.apply_env_overrides();
                return Ok(cfg);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(entry) = self.cache.lock().as_ref() {
            if entry.path == abs
                && entry.mtime == mtime
                && entry.cached_at.elapsed() < CACHE_TTL
            {
                debug!(path = %abs.display(), "config cache hit");
                return Ok(entry.config.clone());
            }
        }

        let text = tokio::fs::read_to_string(&abs).await?;
        let mut cfg: Config = serde_yaml::from_str(&text)?;
        cfg.validate()
            .map_err(|fields| Error::ConfigInvalid { fields })?;
        let dropped = cfg.normalize();
        if dropped > 0 {
            warn!(dropped, "filtered unusable destinations at config load");
        }
        cfg.apply_env_overrides();

        *self.cache.lock() = Some(CacheEntry {
            path: abs,
            mtime,
            cached_at: Instant::now(),
            config: cfg.clone(),
        });
        Ok(cfg)
    }

    /// Save to the store's default path.
    pub async fn save(&self, cfg: &Config) -> Result<()> {
        let path = self.path.clone();
        self.save_to(cfg, &path).await
    }

    /// Atomic save: write a temp sibling, rename over the target, drop the
    /// cache. The containing directory is created when absent. An invalid
    /// configuration is rejected before anything touches the disk.
    pub async fn save_to(&self, cfg: &Config, path: &Path) -> Result<()> {
        cfg.validate()
            .map_err(|fields| Error::ConfigInvalid { fields })?;

        let abs = absolutize(path);
        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let yaml = serde_yaml::to_string(cfg)?;
        let tmp = abs.with_extension(format!("tmp.{}", nanoid::nanoid!(6)));
        tokio::fs::write(&tmp, yaml.as_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &abs).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        self.invalidate();
        debug!(path = %abs.display(), "config saved");
        Ok(())
    }

    /// Drop the in-memory snapshot; the next load re-reads the file.
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    /// Start the mtime watcher. On every observed change the file is
    /// reloaded and `callback` invoked with the fresh configuration.
    /// Dropping the returned handle stops the watcher.
    pub fn watch<F>(self: &Arc<Self>, callback: F) -> WatchHandle
    where
        F: Fn(Config) + Send + Sync + 'static,
    {
        let store = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(WATCH_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last_mtime = file_mtime(&store.path).await;

            loop {
                ticker.tick().await;
                let current = file_mtime(&store.path).await;
                if current == last_mtime {
                    continue;
                }
                last_mtime = current;
                store.invalidate();
                match store.load().await {
                    Ok(cfg) => {
                        info!(path = %store.path.display(), "config file changed, reloaded");
                        callback(cfg);
                    }
                    Err(e) => {
                        warn!(path = %store.path.display(), error = %e, "config reload failed");
                    }
                }
            }
        });
        WatchHandle { task }
    }
}

/// Handle to a running config watcher. Aborts the poll task on drop.
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The store participates in the module lifecycle for ordering only; it
/// has no startup or teardown work of its own.
#[async_trait::async_trait]
impl crate::registry::Module for ConfigStore {}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

async fn file_mtime(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Destination;

    fn sample_config() -> Config {
        let mut cfg = Config::default();
        cfg.stream_manager.platforms = vec![Destination {
            id: "a".into(),
            name: "twitch".into(),
            url: "rtmp://live.twitch.tv/app".into(),
            stream_key: "sk_live".into(),
            ..Destination::default()
        }];
        cfg
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::new(dir.path().join("nope.yaml"));
        let cfg = store.load().await.expect("load");
        assert_eq!(cfg, {
            let mut c = Config::default();
            c.apply_env_overrides();
            c
        });
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::new(dir.path().join("nested").join("config.yaml"));
        let cfg = sample_config();
        store.save(&cfg).await.expect("save");

        let loaded = store.load().await.expect("load");
        assert_eq!(loaded.stream_manager.platforms, cfg.stream_manager.platforms);
        // Keys are persisted unmasked; masking happens only at the API.
        let text = std::fs::read_to_string(store.path()).expect("read");
        assert!(text.contains("sk_live"));
    }

    #[tokio::test]
    async fn save_rejects_invalid_without_touching_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::new(dir.path().join("config.yaml"));
        let mut cfg = sample_config();
        cfg.ui.port = 0;
        assert!(matches!(
            store.save(&cfg).await,
            Err(Error::ConfigInvalid { .. })
        ));
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn save_invalidates_the_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::new(dir.path().join("config.yaml"));
        store.save(&sample_config()).await.expect("save");
        let _ = store.load().await.expect("load");

        let mut changed = sample_config();
        changed.ui.port = 9999;
        store.save(&changed).await.expect("save");
        let second = store.load().await.expect("load");
        assert_eq!(second.ui.port, 9999);
    }

    #[tokio::test]
    async fn watcher_fires_on_change() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(ConfigStore::new(dir.path().join("config.yaml")));
        store.save(&sample_config()).await.expect("save");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _watch = store.watch(move |cfg| {
            let _ = tx.send(cfg.ui.port);
        });

        // Sleep past one mtime granularity tick before rewriting.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let mut changed = sample_config();
        changed.ui.port = 9001;
        store.save(&changed).await.expect("save");

        let port = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("watcher timeout")
            .expect("watcher channel");
        assert_eq!(port, 9001);
    }
}
