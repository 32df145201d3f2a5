use crate::cache::MetadataCache;
use crate::config::ContentConfig;
use crate::header::{AssetHeaderDecoder, FileHeaderDecoder};
use crate::registry::{AssetRegistry, ContentError};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/* Everything kept for one open project: the registry over its content directory and the metadata cache behind it.
   Created on project open, the cache is flushed when the session closes */
pub struct ContentSession
{
    project_root: PathBuf,
    config: ContentConfig,
    registry: AssetRegistry,
    cache: Arc<MetadataCache>,
}
impl ContentSession
{
    // Open a project using the headers on disk
    pub fn open(project_root: impl AsRef<Path>) -> Result<Self, ContentError>
    {
        Self::open_with(project_root, Arc::new(FileHeaderDecoder))
    }

    pub fn open_with(project_root: impl AsRef<Path>, decoder: Arc<dyn AssetHeaderDecoder>) -> Result<Self, ContentError>
    {
        let project_root = std::path::absolute(project_root.as_ref())?;
        if !project_root.is_dir()
        {
            return Err(ContentError::RootNotFound(project_root));
        }

        let config = ContentConfig::load(&project_root);
        Self::open_with_config(project_root, config, decoder)
    }

    pub fn open_with_config(project_root: impl Into<PathBuf>, config: ContentConfig, decoder: Arc<dyn AssetHeaderDecoder>) -> Result<Self, ContentError>
    {
        let project_root = project_root.into();
        let content_root = config.content_root(&project_root);
        log::debug!("Opening project {project_root:?} (content in {content_root:?})");

        let cache = Arc::new(MetadataCache::load(config.cache_path(&project_root), decoder.clone()));
        let registry = AssetRegistry::new(&config, decoder, cache.clone());
        registry.reset(&content_root)?;

        Ok(Self
        {
            project_root,
            config,
            registry,
            cache,
        })
    }

    #[inline] #[must_use]
    pub fn project_root(&self) -> &Path { &self.project_root }

    #[inline] #[must_use]
    pub fn config(&self) -> &ContentConfig { &self.config }

    #[inline] #[must_use]
    pub fn registry(&self) -> &AssetRegistry { &self.registry }

    #[inline] #[must_use]
    pub fn cache(&self) -> &MetadataCache { &self.cache }

    // Writes the cache if dirty. The cache file's own changes are not reported back as content changes
    pub fn flush_cache(&self) -> bool
    {
        let _suppressed = self.registry.suppress_watch();
        self.cache.flush()
    }

    // Stop watching and write the cache
    pub fn close(self)
    {
        // Drop does the work
    }
}
impl Drop for ContentSession
{
    fn drop(&mut self)
    {
        self.registry.stop_watching();
        if self.cache.flush()
        {
            log::debug!("Saved metadata cache for {:?}", self.project_root);
        }
    }
}
