use crate::cache::MetadataCache;
use crate::config::ContentConfig;
use crate::header::AssetHeaderDecoder;
use crate::watch::{FileWatchSource, SuppressGuard, WatchEventKind, WatchNotification};
use crate::{AssetGuid, AssetMetadata, Ticks};
use crossbeam::channel::{unbounded, Receiver, Sender};
use nab_kiln::timing::Stopwatch;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use unicase::UniCase;
use walkdir::WalkDir;

#[derive(Debug)]
pub enum ContentError
{
    IOError(io::Error),
    RootNotFound(PathBuf),
}
impl Error for ContentError { }
impl Display for ContentError
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { Debug::fmt(self, f) }
}
impl From<io::Error> for ContentError
{
    fn from(err: io::Error) -> Self { Self::IOError(err) }
}

// Sent to every subscriber whenever the registry changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryNotification
{
    Added(Arc<AssetMetadata>),
    Updated(Arc<AssetMetadata>),
    Removed(PathBuf),
    Reset, // everything may have changed, re-query
}

const MAX_DECODE_ATTEMPTS: usize = 3;

enum Registration
{
    Unchanged,
    Changed(Arc<AssetMetadata>),
}

struct RegistryInner
{
    root: RwLock<Option<PathBuf>>,
    entries: RwLock<HashMap<PathBuf, Arc<AssetMetadata>>>,
    sync: Mutex<()>, // scans and patches never interleave

    decoder: Arc<dyn AssetHeaderDecoder>,
    cache: Arc<MetadataCache>,
    extension: String,

    subscribers: Mutex<Vec<Sender<RegistryNotification>>>,
}
impl RegistryInner
{
    fn is_asset_path(&self, path: &Path) -> bool
    {
        path.extension().is_some_and(|ext| match ext.to_str()
        {
            None => false,
            Some(e) => UniCase::new(e) == UniCase::new(self.extension.as_str()),
        })
    }

    fn modified_time(path: &Path) -> Option<Ticks>
    {
        match std::fs::metadata(path).and_then(|m| m.modified())
        {
            Ok(modified) => Some(Ticks::from_system_time(modified)),
            Err(err) =>
            {
                log::warn!("Failed to read the modified time of {path:?}: {err}");
                None
            },
        }
    }

    // Decode `path` if it is new or has changed on disk since it was last registered
    fn register(&self, path: &Path, existing: Option<&Arc<AssetMetadata>>) -> Option<Registration>
    {
        let mut modified = Self::modified_time(path)?;
        if let Some(existing) = existing
        {
            if modified <= existing.register_time { return Some(Registration::Unchanged); }
        }

        // taken before decoding, a write that lands mid-decode is newer than the registration
        let mut now = Ticks::now();
        let mut attempts = 0;
        let mut metadata = loop
        {
            let metadata = match self.decoder.decode_asset_info(path)
            {
                Ok(metadata) => metadata,
                Err(err) =>
                {
                    log::warn!("Skipping asset {path:?} with an unreadable header: {err}");
                    return None;
                },
            };

            attempts += 1;
            let after = Self::modified_time(path)?;
            if after == modified || attempts >= MAX_DECODE_ATTEMPTS
            {
                break metadata;
            }
            log::debug!("{path:?} changed while being decoded, decoding again");
            modified = after;
            now = Ticks::now();
        };
        metadata.full_path = path.to_path_buf();

        if let Some(cached) = self.cache.get(path)
        {
            metadata.icon = cached.icon;
        }

        metadata.register_time = now;
        if let Some(previous) = existing
        {
            metadata.guid = previous.guid;
            if now <= previous.register_time
            {
                metadata.register_time = previous.register_time.successor();
            }
        }

        Some(Registration::Changed(Arc::new(metadata)))
    }

    fn walk_assets(&self, dir: &Path) -> impl Iterator<Item = PathBuf>
    {
        WalkDir::new(dir).into_iter().filter_map(move |maybe_entry|
        {
            let entry = match maybe_entry
            {
                Ok(entry) => entry,
                Err(err) =>
                {
                    log::warn!("Failed to scan {dir:?}: {err}");
                    return None;
                },
            };
            (entry.file_type().is_file() && self.is_asset_path(entry.path())).then(|| entry.into_path())
        })
    }

    fn scan(&self, root: &Path) -> HashMap<PathBuf, Arc<AssetMetadata>>
    {
        let mut scanned = HashMap::new();
        for path in self.walk_assets(root)
        {
            if let Some(Registration::Changed(metadata)) = self.register(&path, None)
            {
                scanned.insert(path, metadata);
            }
        }
        scanned
    }

    fn refresh_file(&self, path: &Path, notifications: &mut Vec<RegistryNotification>)
    {
        let existing = self.entries.read().get(path).cloned();
        // unreadable files keep whatever was last registered for them
        let Some(Registration::Changed(metadata)) = self.register(path, existing.as_ref()) else { return; };

        self.entries.write().insert(path.to_path_buf(), metadata.clone());
        notifications.push(match existing
        {
            Some(_) => RegistryNotification::Updated(metadata),
            None => RegistryNotification::Added(metadata),
        });
    }

    fn refresh_path(&self, path: &Path, notifications: &mut Vec<RegistryNotification>)
    {
        if path.is_dir()
        {
            for file in self.walk_assets(path)
            {
                self.refresh_file(&file, notifications);
            }
        }
        else if path.is_file() && self.is_asset_path(path)
        {
            self.refresh_file(path, notifications);
        }
    }

    // Evict every entry whose file is gone
    fn sweep(&self, notifications: &mut Vec<RegistryNotification>)
    {
        let mut entries = self.entries.write();
        entries.retain(|path, _|
        {
            let exists = path.is_file();
            if !exists
            {
                notifications.push(RegistryNotification::Removed(path.clone()));
            }
            exists
        });
    }

    fn on_path_changed(&self, path: &Path)
    {
        let _sync = self.sync.lock();
        let mut notifications = Vec::new();
        self.refresh_path(path, &mut notifications);
        self.sweep(&mut notifications);
        self.publish_all(notifications);
    }

    fn on_watch_notification(&self, notification: WatchNotification)
    {
        let _sync = self.sync.lock();
        let mut notifications = Vec::new();
        match notification
        {
            // event kinds are unreliable, re-read disk state for each path
            WatchNotification::Changed(events) =>
            {
                log::trace!("Refreshing {} changed path(s)", events.len());
                for event in events
                {
                    self.refresh_path(&event.path, &mut notifications);
                }
            },
            WatchNotification::Reconcile =>
            {
                let Some(root) = self.root.read().clone() else { return; };
                log::debug!("Reconciling {root:?} after suppressed changes");
                self.refresh_path(&root, &mut notifications);
            },
        }
        self.sweep(&mut notifications);
        self.publish_all(notifications);
    }

    fn publish(&self, notification: RegistryNotification)
    {
        // disconnected receivers unsubscribe themselves
        self.subscribers.lock().retain(|sub| sub.send(notification.clone()).is_ok());
    }

    fn publish_all(&self, notifications: Vec<RegistryNotification>)
    {
        if notifications.is_empty() { return; }
        let mut subscribers = self.subscribers.lock();
        for notification in notifications
        {
            subscribers.retain(|sub| sub.send(notification.clone()).is_ok());
        }
    }
}

/* The authoritative path -> metadata map for a content directory, kept in sync with disk
   through a FileWatchSource. Registration reads only the header, icons come from the MetadataCache */
pub struct AssetRegistry
{
    inner: Arc<RegistryInner>,
    watch: Mutex<Option<FileWatchSource>>,
    watch_delay: Duration,
    enable_fs_watcher: bool,
}
impl AssetRegistry
{
    #[must_use]
    pub fn new(config: &ContentConfig, decoder: Arc<dyn AssetHeaderDecoder>, cache: Arc<MetadataCache>) -> Self
    {
        Self
        {
            inner: Arc::new(RegistryInner
            {
                root: RwLock::new(None),
                entries: RwLock::new(HashMap::new()),
                sync: Mutex::new(()),
                decoder,
                cache,
                extension: config.extension().to_string(),
                subscribers: Mutex::new(Vec::new()),
            }),
            watch: Mutex::new(None),
            watch_delay: config.debounce_delay(),
            enable_fs_watcher: config.enable_fs_watcher,
        }
    }

    /* Forget everything, rescan `root_dir` and watch it for changes.
       The previous watch is completely stopped before scanning, so none of its deliveries can land afterward */
    pub fn reset(&self, root_dir: impl AsRef<Path>) -> Result<(), ContentError>
    {
        let root_dir = root_dir.as_ref();
        if !root_dir.is_dir()
        {
            return Err(ContentError::RootNotFound(root_dir.to_path_buf()));
        }
        let root = std::path::absolute(root_dir)?;

        let mut watch = self.watch.lock();
        drop(watch.take());

        {
            let _sync = self.inner.sync.lock();
            *self.inner.root.write() = Some(root.clone());
            self.inner.entries.write().clear();

            let stopwatch = Stopwatch::start_new();
            let scanned = self.inner.scan(&root);
            let count = scanned.len();
            *self.inner.entries.write() = scanned;
            log::info!("Registered {count} asset(s) under {root:?} in {:?}", stopwatch.elapsed());

            self.inner.publish(RegistryNotification::Reset);
        }

        *watch = self.start_watch(&root);
        Ok(())
    }

    fn start_watch(&self, root: &Path) -> Option<FileWatchSource>
    {
        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let consumer = move |notification: WatchNotification|
        {
            if let Some(inner) = weak.upgrade()
            {
                inner.on_watch_notification(notification);
            }
        };

        if self.enable_fs_watcher
        {
            match FileWatchSource::start(root, self.watch_delay, consumer.clone())
            {
                Ok(source) => return Some(source),
                Err(err) => log::error!("Failed to start fs watcher for {root:?}, continuing without: {err:?}"),
            }
        }

        // no OS events, changes only arrive through notify_path_changed()
        FileWatchSource::manual(root, self.watch_delay, consumer)
            .inspect_err(|err| log::error!("Failed to start change notifications for {root:?}: {err:?}"))
            .ok()
    }

    #[must_use]
    pub fn root(&self) -> Option<PathBuf> { self.inner.root.read().clone() }

    #[must_use]
    pub fn lookup(&self, path: impl AsRef<Path>) -> Option<Arc<AssetMetadata>>
    {
        let path = path.as_ref();
        let entries = self.inner.entries.read();
        if let Some(found) = entries.get(path)
        {
            return Some(found.clone());
        }

        // relative paths are relative to the root
        if path.is_relative()
        {
            let root = self.inner.root.read();
            return root.as_ref().and_then(|r| entries.get(&r.join(path)).cloned());
        }
        None
    }

    // Linear scan
    #[must_use]
    pub fn lookup_guid(&self, guid: AssetGuid) -> Option<Arc<AssetMetadata>>
    {
        self.inner.entries.read().values().find(|m| m.guid == guid).cloned()
    }

    /* Re-read `path` from disk. Directories are walked recursively, asset files re-registered if modified
       since they were last registered. Afterwards, anything whose file no longer exists is evicted */
    pub fn on_path_changed(&self, path: impl AsRef<Path>)
    {
        self.inner.on_path_changed(path.as_ref());
    }

    // Queue `path` through the debounced watch as if the OS had reported it
    pub fn notify_path_changed(&self, path: impl AsRef<Path>)
    {
        let watch = self.watch.lock();
        match watch.as_ref()
        {
            Some(source) => source.inject(path.as_ref(), WatchEventKind::Modified),
            None =>
            {
                drop(watch);
                self.on_path_changed(path);
            },
        }
    }

    // Receive every change from now on. Drop the receiver to unsubscribe
    #[must_use]
    pub fn subscribe(&self) -> Receiver<RegistryNotification>
    {
        let (send, recv) = unbounded();
        self.inner.subscribers.lock().push(send);
        recv
    }

    // All entries, sorted by path
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<AssetMetadata>>
    {
        let mut all: Vec<Arc<AssetMetadata>> = self.inner.entries.read().values().cloned().collect();
        all.sort_unstable_by(|a, b| a.full_path.cmp(&b.full_path));
        all
    }

    #[must_use]
    pub fn len(&self) -> usize { self.inner.entries.read().len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.inner.entries.read().is_empty() }

    // Hold change deliveries until the guard drops; they are then replaced by one full reconcile
    #[must_use]
    pub fn suppress_watch(&self) -> Option<SuppressGuard>
    {
        self.watch.lock().as_ref().map(FileWatchSource::suppress_scoped)
    }

    // true if OS change notifications are being received
    #[must_use]
    pub fn is_watching(&self) -> bool
    {
        self.watch.lock().as_ref().is_some_and(FileWatchSource::is_os_backed)
    }

    // Stop receiving change notifications, the registry keeps its contents
    pub fn stop_watching(&self)
    {
        drop(self.watch.lock().take());
    }

    #[inline] #[must_use]
    pub fn cache(&self) -> &Arc<MetadataCache> { &self.inner.cache }
}
impl Drop for AssetRegistry
{
    fn drop(&mut self)
    {
        // joins the watch's timer thread before the shared state goes away
        self.stop_watching();
    }
}
