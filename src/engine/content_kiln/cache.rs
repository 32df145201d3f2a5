use crate::binary::{BinaryRead, BinaryWrite};
use crate::header::AssetHeaderDecoder;
use crate::Ticks;
use nab_kiln::debug_panic;
use nab_kiln::utils::ByteSize;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::io;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// A persisted icon for one asset file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry
{
    pub path: PathBuf,
    pub icon: Box<[u8]>,
    pub date_modified: Ticks, // file mtime when the icon was decoded
}

#[derive(Debug)]
pub enum CacheError
{
    IOError(io::Error),
    Truncated,
    Corrupt(io::Error),
}
impl Error for CacheError { }
impl Display for CacheError
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { Debug::fmt(self, f) }
}
impl From<io::Error> for CacheError
{
    fn from(err: io::Error) -> Self
    {
        match err.kind()
        {
            io::ErrorKind::UnexpectedEof => Self::Truncated,
            io::ErrorKind::InvalidData => Self::Corrupt(err),
            _ => Self::IOError(err),
        }
    }
}

/* Icons keyed by asset path, persisted between runs so unchanged files are never decoded twice.
   Entries are recomputed whenever the file on disk is newer than what was cached */
pub struct MetadataCache
{
    file_path: PathBuf,
    decoder: Arc<dyn AssetHeaderDecoder>,
    entries: Mutex<HashMap<PathBuf, CacheEntry>>,

    // bumped (under the entries lock) on every change, compared against the last flushed value
    generation: AtomicUsize,
    saved_generation: AtomicUsize,
    flush_lock: Mutex<()>,
}
impl MetadataCache
{
    // An empty cache that persists to `file_path`
    #[must_use]
    pub fn new(file_path: impl Into<PathBuf>, decoder: Arc<dyn AssetHeaderDecoder>) -> Self
    {
        Self
        {
            file_path: file_path.into(),
            decoder,
            entries: Mutex::new(HashMap::new()),
            generation: AtomicUsize::new(0),
            saved_generation: AtomicUsize::new(0),
            flush_lock: Mutex::new(()),
        }
    }

    /* Read `file_path` if it exists. Entries for files that no longer exist are dropped.
       An unreadable or corrupt file is logged and leaves the cache empty */
    #[must_use]
    pub fn load(file_path: impl Into<PathBuf>, decoder: Arc<dyn AssetHeaderDecoder>) -> Self
    {
        let cache = Self::new(file_path, decoder);

        let file = match std::fs::File::open(&cache.file_path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound =>
            {
                log::debug!("No metadata cache at {:?}, starting empty", cache.file_path);
                return cache;
            },
            Err(err) =>
            {
                log::warn!("Failed to open metadata cache {:?} for reading: {err}", cache.file_path);
                return cache;
            },
        };

        let loaded = match Self::read_entries(&mut BufReader::new(file))
        {
            Ok(loaded) => loaded,
            Err(err) =>
            {
                log::warn!("Discarding corrupt metadata cache {:?}: {err}", cache.file_path);
                return cache;
            },
        };

        let total = loaded.len();
        let mut entries = cache.entries.lock();
        for entry in loaded
        {
            if !entry.path.exists() { continue; }
            entries.insert(entry.path.clone(), entry);
        }
        if entries.len() != total
        {
            // rewrite without the stale paths on the next flush
            cache.generation.fetch_add(1, Ordering::SeqCst);
        }
        log::debug!("Loaded {} metadata cache entries ({} stale) from {:?}", entries.len(), total - entries.len(), cache.file_path);
        drop(entries);

        cache
    }

    #[inline] #[must_use]
    pub fn file_path(&self) -> &Path { &self.file_path }

    /* The cached entry for `path`, recomputed through the decoder if missing or stale.
       Returns None (and forgets the path) if the file is gone or its header can't be decoded */
    pub fn get(&self, path: &Path) -> Option<CacheEntry>
    {
        let live_modified = match std::fs::metadata(path).and_then(|m| m.modified())
        {
            Ok(modified) => Ticks::from_system_time(modified),
            Err(err) =>
            {
                log::warn!("Failed to read the modified time of {path:?}: {err}");
                self.invalidate(path);
                return None;
            },
        };

        if let Some(cached) = self.entries.lock().get(path)
        {
            if cached.date_modified >= live_modified
            {
                return Some(cached.clone());
            }
        }

        // decode without holding the lock
        match self.decoder.decode_asset_header(path)
        {
            Ok(metadata) =>
            {
                let entry = CacheEntry
                {
                    path: path.to_path_buf(),
                    icon: metadata.icon,
                    date_modified: live_modified,
                };
                let mut entries = self.entries.lock();
                entries.insert(entry.path.clone(), entry.clone());
                self.generation.fetch_add(1, Ordering::SeqCst);
                Some(entry)
            },
            Err(err) =>
            {
                log::warn!("Failed to decode the header of {path:?}: {err}");
                self.invalidate(path);
                None
            },
        }
    }

    // Forget `path`, returns true if it was cached
    pub fn invalidate(&self, path: &Path) -> bool
    {
        let mut entries = self.entries.lock();
        let removed = entries.remove(path).is_some();
        if removed
        {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    // Drop every entry whose file no longer exists. Returns how many were dropped
    pub fn retain_existing(&self) -> usize
    {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|path, _| path.exists());
        let pruned = before - entries.len();
        if pruned > 0
        {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        pruned
    }

    #[must_use]
    pub fn len(&self) -> usize { self.entries.lock().len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.lock().is_empty() }

    #[must_use]
    pub fn is_dirty(&self) -> bool
    {
        self.generation.load(Ordering::SeqCst) != self.saved_generation.load(Ordering::SeqCst)
    }

    // Snapshot sorted by path
    #[must_use]
    pub fn entries(&self) -> Vec<CacheEntry>
    {
        let mut snapshot: Vec<CacheEntry> = self.entries.lock().values().cloned().collect();
        snapshot.sort_unstable_by(|a, b| a.path.cmp(&b.path));
        snapshot
    }

    /* Write the whole cache if anything changed since the last flush.
       Returns true if the file was written. The dirty state is only cleared on success */
    pub fn flush(&self) -> bool
    {
        let _flushing = self.flush_lock.lock();

        let (generation, bytes) =
        {
            let entries = self.entries.lock();
            let generation = self.generation.load(Ordering::SeqCst);
            if generation == self.saved_generation.load(Ordering::SeqCst) { return false; }

            match Self::serialize(&entries)
            {
                Ok(bytes) => (generation, bytes),
                Err(err) =>
                {
                    log::warn!("Failed to serialize the metadata cache: {err}");
                    return false;
                },
            }
        };

        if let Err(err) = self.write_file(&bytes)
        {
            log::warn!("Failed to write metadata cache {:?}: {err}", self.file_path);
            return false;
        }

        self.saved_generation.store(generation, Ordering::SeqCst);
        log::debug!("Flushed metadata cache to {:?} ({})", self.file_path, ByteSize::from(bytes.len()));
        true
    }

    fn write_file(&self, bytes: &[u8]) -> io::Result<()>
    {
        if let Some(parent) = self.file_path.parent()
        {
            std::fs::create_dir_all(parent)?;
        }

        // write a sibling then swap it in
        let mut temp_name = self.file_path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".tmp");
        let temp_path = self.file_path.with_file_name(temp_name);

        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&temp_path, &self.file_path)
    }

    fn serialize(entries: &HashMap<PathBuf, CacheEntry>) -> Result<Vec<u8>, CacheError>
    {
        // paths the file format can't hold are left out, they are decoded again next run
        let mut sorted: Vec<(&str, &CacheEntry)> = entries.values().filter_map(|entry| match entry.path.to_str()
        {
            Some(path) => Some((path, entry)),
            None =>
            {
                log::warn!("Not caching {:?}, the path is not valid UTF-8", entry.path);
                None
            },
        }).collect();
        sorted.sort_unstable_by(|a, b| a.1.path.cmp(&b.1.path));

        if i32::try_from(sorted.len()).is_err()
        {
            debug_panic!("Metadata cache has {} entries", sorted.len());
            return Err(CacheError::IOError(io::Error::new(io::ErrorKind::InvalidInput, "too many entries")));
        }

        let mut out = Vec::new();
        out.write_len_i32(sorted.len())?;
        for (path, entry) in sorted
        {
            out.write_prefixed_string(path)?;
            out.write_i64_le(entry.date_modified.to_binary())?;
            out.write_blob(&entry.icon)?;
        }
        Ok(out)
    }

    fn read_entries(reader: &mut impl Read) -> Result<Vec<CacheEntry>, CacheError>
    {
        let count = reader.read_len_i32()?;
        let mut entries = Vec::with_capacity(count.min(4096));
        for _ in 0..count
        {
            let path = PathBuf::from(reader.read_prefixed_string()?);
            let date_modified = Ticks::from_binary(reader.read_i64_le()?);
            let icon_len = reader.read_len_i32()?;
            let icon = reader.read_blob(icon_len)?;
            entries.push(CacheEntry { path, icon, date_modified });
        }
        Ok(entries)
    }
}
impl Drop for MetadataCache
{
    fn drop(&mut self)
    {
        self.flush();
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::header::{write_asset_header, AssetHeader, FileHeaderDecoder, HeaderError};
    use crate::{AssetGuid, AssetMetadata, AssetType};
    use std::time::{Duration, SystemTime};

    #[derive(Default)]
    struct CountingDecoder
    {
        calls: AtomicUsize,
    }
    impl CountingDecoder
    {
        fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
    }
    impl AssetHeaderDecoder for CountingDecoder
    {
        fn decode_asset_header(&self, file_path: &Path) -> Result<AssetMetadata, HeaderError>
        {
            self.calls.fetch_add(1, Ordering::SeqCst);
            FileHeaderDecoder.decode_asset_header(file_path)
        }
    }

    fn write_asset(path: &Path, icon: &[u8])
    {
        write_asset_header(path, &AssetHeader
        {
            asset_type: AssetType::Mesh,
            guid: AssetGuid::generate(),
            import_date: Ticks::now(),
            hash: None,
            source_path: None,
            icon: icon.into(),
        }).unwrap();
    }

    fn touch_future(path: &Path, secs: u64)
    {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(secs)).unwrap();
    }

    #[test]
    fn get_decodes_once()
    {
        let dir = tempfile::tempdir().unwrap();
        let asset = dir.path().join("a.asset");
        write_asset(&asset, &[7, 7, 7]);

        let decoder = Arc::new(CountingDecoder::default());
        let cache = MetadataCache::new(dir.path().join("cache.bin"), decoder.clone());
        assert!(!cache.is_dirty());

        let first = cache.get(&asset).unwrap();
        assert_eq!(first.icon.as_ref(), &[7, 7, 7]);
        assert!(cache.is_dirty());

        let second = cache.get(&asset).unwrap();
        assert_eq!(first, second);
        assert_eq!(1, decoder.calls());
    }

    #[test]
    fn stale_entry_is_recomputed()
    {
        let dir = tempfile::tempdir().unwrap();
        let asset = dir.path().join("a.asset");
        write_asset(&asset, &[1]);

        let decoder = Arc::new(CountingDecoder::default());
        let cache = MetadataCache::new(dir.path().join("cache.bin"), decoder.clone());
        assert_eq!(cache.get(&asset).unwrap().icon.as_ref(), &[1]);

        write_asset(&asset, &[2, 2]);
        touch_future(&asset, 60);

        let updated = cache.get(&asset).unwrap();
        assert_eq!(updated.icon.as_ref(), &[2, 2]);
        assert_eq!(2, decoder.calls());
    }

    #[test]
    fn missing_file()
    {
        let dir = tempfile::tempdir().unwrap();
        let asset = dir.path().join("a.asset");
        write_asset(&asset, &[1]);

        let cache = MetadataCache::new(dir.path().join("cache.bin"), Arc::new(FileHeaderDecoder));
        assert!(cache.get(&asset).is_some());
        std::fs::remove_file(&asset).unwrap();
        assert!(cache.get(&asset).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn corrupt_header()
    {
        let dir = tempfile::tempdir().unwrap();
        let asset = dir.path().join("bad.asset");
        std::fs::write(&asset, [1, 0, 0, 0, 3, 0]).unwrap();

        let cache = MetadataCache::new(dir.path().join("cache.bin"), Arc::new(FileHeaderDecoder));
        assert!(cache.get(&asset).is_none());
        assert!(cache.is_empty());
        assert!(!cache.is_dirty());
    }

    #[test]
    fn flush_only_when_dirty()
    {
        let dir = tempfile::tempdir().unwrap();
        let asset = dir.path().join("a.asset");
        write_asset(&asset, &[1]);

        let cache_path = dir.path().join(".cache/nested/cache.bin");
        let cache = MetadataCache::new(&cache_path, Arc::new(FileHeaderDecoder));
        assert!(!cache.flush());
        assert!(!cache_path.exists());

        cache.get(&asset);
        assert!(cache.flush());
        assert!(cache_path.exists());
        assert!(!cache.is_dirty());
        assert!(!cache.flush());
    }

    #[test]
    fn file_layout()
    {
        let dir = tempfile::tempdir().unwrap();
        let asset = dir.path().join("a.asset");
        write_asset(&asset, &[9, 8]);

        let cache_path = dir.path().join("cache.bin");
        let cache = MetadataCache::new(&cache_path, Arc::new(FileHeaderDecoder));
        let entry = cache.get(&asset).unwrap();
        cache.flush();

        let path_str = asset.to_str().unwrap();
        let mut expected = Vec::new();
        expected.write_i32_le(1).unwrap();
        expected.write_prefixed_string(path_str).unwrap();
        expected.write_i64_le(entry.date_modified.to_binary()).unwrap();
        expected.write_blob(&[9, 8]).unwrap();
        assert_eq!(expected, std::fs::read(&cache_path).unwrap());
    }

    #[test]
    fn reload_drops_deleted()
    {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept.asset");
        let deleted = dir.path().join("deleted.asset");
        write_asset(&kept, &[1, 2]);
        write_asset(&deleted, &[3, 4]);

        let cache_path = dir.path().join("cache.bin");
        let saved =
        {
            let cache = MetadataCache::new(&cache_path, Arc::new(FileHeaderDecoder));
            cache.get(&kept);
            cache.get(&deleted);
            assert_eq!(2, cache.len());
            cache.entries()
        }; // flushed on drop

        std::fs::remove_file(&deleted).unwrap();

        let decoder = Arc::new(CountingDecoder::default());
        let reloaded = MetadataCache::load(&cache_path, decoder.clone());
        let expected: Vec<CacheEntry> = saved.into_iter().filter(|e| e.path == kept).collect();
        assert_eq!(expected, reloaded.entries());
        assert_eq!(reloaded.get(&kept).unwrap().icon.as_ref(), &[1, 2]);
        assert_eq!(0, decoder.calls());
        assert!(reloaded.is_dirty());
    }

    #[test]
    fn reload_is_identical()
    {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = ["a.asset", "b.asset", "sub/c.asset"].iter().map(|p| dir.path().join(p)).collect();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        for (i, path) in paths.iter().enumerate()
        {
            write_asset(path, &vec![i as u8; i * 3]);
        }

        let cache_path = dir.path().join("cache.bin");
        let cache = MetadataCache::new(&cache_path, Arc::new(FileHeaderDecoder));
        for path in &paths
        {
            cache.get(path);
        }
        assert!(cache.flush());

        let reloaded = MetadataCache::load(&cache_path, Arc::new(FileHeaderDecoder));
        assert_eq!(cache.entries(), reloaded.entries());
        assert!(!reloaded.is_dirty());
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_path_is_skipped()
    {
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.asset");
        let bad = dir.path().join(std::ffi::OsStr::from_bytes(b"bad\xff.asset"));
        write_asset(&good, &[1]);
        write_asset(&bad, &[2]);

        let cache_path = dir.path().join("cache.bin");
        let cache = MetadataCache::new(&cache_path, Arc::new(FileHeaderDecoder));
        cache.get(&good);
        cache.get(&bad);
        assert_eq!(2, cache.len());

        assert!(cache.flush());
        assert!(!cache.is_dirty());

        let reloaded = MetadataCache::load(&cache_path, Arc::new(FileHeaderDecoder));
        assert_eq!(vec![good], reloaded.entries().into_iter().map(|e| e.path).collect::<Vec<_>>());
    }

    #[test]
    fn truncated_file_loads_empty()
    {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.asset");
        let b = dir.path().join("b.asset");
        write_asset(&a, &[1; 32]);
        write_asset(&b, &[2; 32]);

        let cache_path = dir.path().join("cache.bin");
        {
            let cache = MetadataCache::new(&cache_path, Arc::new(FileHeaderDecoder));
            cache.get(&a);
            cache.get(&b);
            assert!(cache.flush());
        }

        let bytes = std::fs::read(&cache_path).unwrap();
        std::fs::write(&cache_path, &bytes[..(bytes.len() - 10)]).unwrap();

        let decoder = Arc::new(CountingDecoder::default());
        let reloaded = MetadataCache::load(&cache_path, decoder.clone());
        assert!(reloaded.is_empty());
        assert_eq!(reloaded.get(&a).unwrap().icon.as_ref(), &[1; 32]);
        assert_eq!(1, decoder.calls());
    }

    #[test]
    fn garbage_file_loads_empty()
    {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cache.bin");
        std::fs::write(&cache_path, (-5i32).to_le_bytes()).unwrap();

        let cache = MetadataCache::load(&cache_path, Arc::new(FileHeaderDecoder));
        assert!(cache.is_empty());
        assert!(!cache.is_dirty());
    }

    #[test]
    fn retain_existing()
    {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.asset");
        let b = dir.path().join("b.asset");
        write_asset(&a, &[1]);
        write_asset(&b, &[2]);

        let cache = MetadataCache::new(dir.path().join("cache.bin"), Arc::new(FileHeaderDecoder));
        cache.get(&a);
        cache.get(&b);
        cache.flush();

        std::fs::remove_file(&b).unwrap();
        assert_eq!(1, cache.retain_existing());
        assert!(cache.is_dirty());
        assert_eq!(vec![a.clone()], cache.entries().into_iter().map(|e| e.path).collect::<Vec<_>>());
        assert_eq!(0, cache.retain_existing());
    }

    #[test]
    fn concurrent_gets()
    {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..16).map(|i| dir.path().join(format!("{i}.asset"))).collect();
        for (i, path) in paths.iter().enumerate()
        {
            write_asset(path, &[i as u8]);
        }

        let cache = Arc::new(MetadataCache::new(dir.path().join("cache.bin"), Arc::new(FileHeaderDecoder)));
        let threads: Vec<_> = (0..4).map(|_|
        {
            let cache = cache.clone();
            let paths = paths.clone();
            std::thread::spawn(move ||
            {
                for (i, path) in paths.iter().enumerate()
                {
                    assert_eq!(cache.get(path).unwrap().icon.as_ref(), &[i as u8]);
                }
            })
        }).collect();
        for thread in threads
        {
            thread.join().unwrap();
        }
        assert_eq!(16, cache.len());
    }
}
