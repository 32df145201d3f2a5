use crate::debounce::{DebouncePayload, DebounceTimer, DebounceTrigger};
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_WATCH_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind
{
    Created,
    Modified,
    Removed,
    Renamed,
}
impl WatchEventKind
{
    fn from_notify(kind: &EventKind) -> Option<Self>
    {
        match kind
        {
            EventKind::Create(_) => Some(Self::Created),
            EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Renamed),
            EventKind::Modify(ModifyKind::Metadata(_)) => None, // atime and friends
            EventKind::Modify(_) => Some(Self::Modified),
            EventKind::Remove(_) => Some(Self::Removed),
            EventKind::Access(_) => None,
            EventKind::Any | EventKind::Other => Some(Self::Modified),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent
{
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

// What a consumer receives once per quiet period
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchNotification
{
    // One entry per distinct path, each carrying the most recent event for it
    Changed(Box<[WatchEvent]>),
    // Changes happened while suppressed; individual events are not trustworthy, rescan everything
    Reconcile,
}

#[derive(Debug)]
pub enum WatchError
{
    Notify(notify::Error),
    Thread(io::Error),
}
impl Error for WatchError { }
impl Display for WatchError
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { Debug::fmt(self, f) }
}
impl From<notify::Error> for WatchError
{
    fn from(err: notify::Error) -> Self { Self::Notify(err) }
}

#[derive(Default)]
struct Suppression
{
    count: AtomicUsize,
    missed: AtomicBool, // events arrived while suppressed
}
impl Suppression
{
    fn suppress(&self) -> usize
    {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn resume(&self) -> Option<usize>
    {
        self.count.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1))
            .ok()
            .map(|prev| prev - 1)
    }

    #[inline]
    fn is_suppressed(&self) -> bool { self.count.load(Ordering::SeqCst) > 0 }
}

// Resumes notifications when dropped
#[must_use]
pub struct SuppressGuard
{
    suppression: Arc<Suppression>,
}
impl Drop for SuppressGuard
{
    fn drop(&mut self)
    {
        self.suppression.resume();
    }
}

/* Recursive filesystem subscription for a directory, delivered in debounced batches.
   Best effort: the OS may drop or merge events, consumers should re-read disk state rather than trust event kinds */
pub struct FileWatchSource
{
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
    timer: DebounceTimer<WatchEvent>,
    suppression: Arc<Suppression>,
}
impl FileWatchSource
{
    // Subscribe to OS change notifications under `root`
    pub fn start<F>(root: impl Into<PathBuf>, delay: Duration, consumer: F) -> Result<Self, WatchError>
        where F: FnMut(WatchNotification) + Send + 'static
    {
        let mut source = Self::manual(root, delay, consumer)?;

        let trigger = source.timer.trigger_handle();
        let suppression = source.suppression.clone();
        let mut watcher = notify::recommended_watcher(move |evt: notify::Result<notify::Event>|
        {
            match evt
            {
                Ok(event) =>
                {
                    let Some(kind) = WatchEventKind::from_notify(&event.kind) else { return; };
                    for path in event.paths
                    {
                        Self::push_raw(&trigger, &suppression, path, kind);
                    }
                },
                Err(e) => log::error!("FS watch error: {e:?}"),
            }
        })?;
        watcher.watch(&source.root, RecursiveMode::Recursive)?;
        source.watcher = Some(watcher);

        log::debug!("Watching {:?} for changes", source.root);
        Ok(source)
    }

    // No OS subscription; events only arrive through inject()
    pub fn manual<F>(root: impl Into<PathBuf>, delay: Duration, mut consumer: F) -> Result<Self, WatchError>
        where F: FnMut(WatchNotification) + Send + 'static
    {
        let root = root.into();
        let suppression = Arc::new(Suppression::default());

        let timer_suppression = suppression.clone();
        let timer = DebounceTimer::new(&root.to_string_lossy(), delay, move |payload: &mut DebouncePayload<WatchEvent>|
        {
            if timer_suppression.is_suppressed()
            {
                payload.repeat = true;
                return;
            }

            if timer_suppression.missed.swap(false, Ordering::SeqCst)
            {
                consumer(WatchNotification::Reconcile);
                return;
            }

            let events = dedup_by_path(std::mem::take(&mut payload.events));
            if !events.is_empty()
            {
                consumer(WatchNotification::Changed(events));
            }
        }).map_err(WatchError::Thread)?;

        Ok(Self
        {
            root,
            watcher: None,
            timer,
            suppression,
        })
    }

    fn push_raw(trigger: &DebounceTrigger<WatchEvent>, suppression: &Suppression, path: PathBuf, kind: WatchEventKind)
    {
        if suppression.is_suppressed()
        {
            suppression.missed.store(true, Ordering::SeqCst);
        }
        trigger.trigger(Some(WatchEvent { path, kind }));
    }

    // Feed an event through the same path OS notifications take
    pub fn inject(&self, path: impl Into<PathBuf>, kind: WatchEventKind)
    {
        Self::push_raw(&self.timer.trigger_handle(), &self.suppression, path.into(), kind);
    }

    #[inline] #[must_use]
    pub fn root(&self) -> &Path { &self.root }

    // false if this source only receives injected events
    #[inline] #[must_use]
    pub fn is_os_backed(&self) -> bool { self.watcher.is_some() }

    // Reentrant; deliveries are held back until every suppress() has been matched by a resume()
    pub fn suppress(&self)
    {
        let depth = self.suppression.suppress();
        log::trace!("Suppressing change notifications for {:?} (depth {depth})", self.root);
    }

    pub fn resume(&self)
    {
        match self.suppression.resume()
        {
            Some(depth) => log::trace!("Resuming change notifications for {:?} (depth {depth})", self.root),
            None => log::warn!("Unbalanced resume() on the watch for {:?}", self.root),
        }
    }

    // suppress() until the returned guard is dropped
    pub fn suppress_scoped(&self) -> SuppressGuard
    {
        self.suppress();
        SuppressGuard { suppression: self.suppression.clone() }
    }

    #[inline] #[must_use]
    pub fn is_suppressed(&self) -> bool { self.suppression.is_suppressed() }
}
impl Drop for FileWatchSource
{
    fn drop(&mut self)
    {
        // unsubscribe first so nothing new reaches the timer, which then stops (and joins) as it drops
        if self.watcher.take().is_some()
        {
            log::debug!("Stopped watching {:?}", self.root);
        }
    }
}

// Keep the latest event per path, ordered by each path's first appearance
fn dedup_by_path(events: Vec<WatchEvent>) -> Box<[WatchEvent]>
{
    let mut index: HashMap<PathBuf, usize> = HashMap::with_capacity(events.len());
    let mut out: Vec<WatchEvent> = Vec::with_capacity(events.len());
    for event in events
    {
        match index.get(&event.path)
        {
            Some(&i) => out[i].kind = event.kind,
            None =>
            {
                index.insert(event.path.clone(), out.len());
                out.push(event);
            }
        }
    }
    out.into_boxed_slice()
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError};

    const WAIT: Duration = Duration::from_secs(5);

    fn manual_source(delay: Duration) -> (FileWatchSource, Receiver<WatchNotification>)
    {
        let (send, recv) = unbounded();
        let source = FileWatchSource::manual("/proj/content", delay, move |notification|
        {
            let _ = send.send(notification);
        }).unwrap();
        (source, recv)
    }

    fn assert_quiet(recv: &Receiver<WatchNotification>, for_duration: Duration)
    {
        match recv.recv_timeout(for_duration)
        {
            Err(RecvTimeoutError::Timeout) => {},
            other => panic!("Expected no notification, got {other:?}"),
        }
    }

    #[test]
    fn dedup_keeps_latest_kind()
    {
        let events = vec![
            WatchEvent { path: "a".into(), kind: WatchEventKind::Created },
            WatchEvent { path: "b".into(), kind: WatchEventKind::Created },
            WatchEvent { path: "a".into(), kind: WatchEventKind::Modified },
            WatchEvent { path: "a".into(), kind: WatchEventKind::Removed },
        ];
        let deduped = dedup_by_path(events);
        assert_eq!(&*deduped, &[
            WatchEvent { path: "a".into(), kind: WatchEventKind::Removed },
            WatchEvent { path: "b".into(), kind: WatchEventKind::Created },
        ]);
    }

    #[test]
    fn notify_kinds()
    {
        use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode};
        assert_eq!(Some(WatchEventKind::Created), WatchEventKind::from_notify(&EventKind::Create(CreateKind::File)));
        assert_eq!(Some(WatchEventKind::Modified), WatchEventKind::from_notify(&EventKind::Modify(ModifyKind::Data(DataChange::Content))));
        assert_eq!(Some(WatchEventKind::Renamed), WatchEventKind::from_notify(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))));
        assert_eq!(Some(WatchEventKind::Removed), WatchEventKind::from_notify(&EventKind::Remove(RemoveKind::File)));
        assert_eq!(None, WatchEventKind::from_notify(&EventKind::Access(AccessKind::Any)));
        assert_eq!(None, WatchEventKind::from_notify(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime))));
    }

    #[test]
    fn burst_is_one_notification()
    {
        let (source, notifications) = manual_source(DEFAULT_WATCH_DELAY);

        source.inject("/proj/content/a.asset", WatchEventKind::Created);
        source.inject("/proj/content/b.asset", WatchEventKind::Created);
        source.inject("/proj/content/a.asset", WatchEventKind::Modified);
        std::thread::sleep(Duration::from_millis(50));
        source.inject("/proj/content/a.asset", WatchEventKind::Modified);

        match notifications.recv_timeout(WAIT).unwrap()
        {
            WatchNotification::Changed(events) =>
            {
                assert_eq!(&*events, &[
                    WatchEvent { path: "/proj/content/a.asset".into(), kind: WatchEventKind::Modified },
                    WatchEvent { path: "/proj/content/b.asset".into(), kind: WatchEventKind::Created },
                ]);
            },
            other => panic!("Expected a change list, got {other:?}"),
        }
        assert_quiet(&notifications, DEFAULT_WATCH_DELAY * 2);
    }

    #[test]
    fn suppressed_changes_become_one_reconcile()
    {
        let delay = Duration::from_millis(50);
        let (source, notifications) = manual_source(delay);

        source.suppress();
        for i in 0..50
        {
            source.inject(format!("/proj/.cache/part{i}.tmp"), WatchEventKind::Modified);
        }
        assert_quiet(&notifications, delay * 6);

        source.resume();
        assert_eq!(WatchNotification::Reconcile, notifications.recv_timeout(WAIT).unwrap());
        assert_quiet(&notifications, delay * 4);
    }

    #[test]
    fn suppression_is_reentrant()
    {
        let delay = Duration::from_millis(50);
        let (source, notifications) = manual_source(delay);

        let outer = source.suppress_scoped();
        source.suppress();
        source.inject("/proj/content/a.asset", WatchEventKind::Modified);

        source.resume();
        assert!(source.is_suppressed());
        assert_quiet(&notifications, delay * 4);

        drop(outer);
        assert!(!source.is_suppressed());
        assert_eq!(WatchNotification::Reconcile, notifications.recv_timeout(WAIT).unwrap());
    }

    #[test]
    fn events_before_suppression_still_deliver()
    {
        let delay = Duration::from_millis(100);
        let (source, notifications) = manual_source(delay);

        source.inject("/proj/content/a.asset", WatchEventKind::Modified);
        let guard = source.suppress_scoped();
        assert_quiet(&notifications, delay * 3);
        drop(guard);

        match notifications.recv_timeout(WAIT).unwrap()
        {
            WatchNotification::Changed(events) => assert_eq!(1, events.len()),
            other => panic!("Expected a change list, got {other:?}"),
        }
    }

    #[test]
    fn unbalanced_resume_is_ignored()
    {
        let (source, _notifications) = manual_source(DEFAULT_WATCH_DELAY);
        source.resume();
        assert!(!source.is_suppressed());
        source.suppress();
        assert!(source.is_suppressed());
    }

    #[test]
    fn os_watch_of_missing_dir_fails()
    {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        match FileWatchSource::start(&missing, DEFAULT_WATCH_DELAY, |_| {})
        {
            Err(WatchError::Notify(_)) => {},
            Err(other) => panic!("Expected a notify error, got {other:?}"),
            Ok(_) => panic!("Expected watching a missing directory to fail"),
        }
    }
}
