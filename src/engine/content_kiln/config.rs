use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "kiln.toml";

#[derive(Debug)]
pub enum ConfigError
{
    IOError(io::Error),
    ParseError(toml::de::Error),
}
impl Error for ConfigError { }
impl Display for ConfigError
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { Debug::fmt(self, f) }
}
impl From<io::Error> for ConfigError
{
    fn from(err: io::Error) -> Self { Self::IOError(err) }
}
impl From<toml::de::Error> for ConfigError
{
    fn from(err: toml::de::Error) -> Self { Self::ParseError(err) }
}

// Per-project settings, read from kiln.toml at the project root. Relative paths are relative to the project root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig
{
    pub content_dir: PathBuf,
    pub cache_file: PathBuf,
    pub asset_extension: String, // without the dot, case-insensitive
    pub debounce_delay_ms: u64,
    pub enable_fs_watcher: bool,
}
impl Default for ContentConfig
{
    fn default() -> Self
    {
        Self
        {
            content_dir: PathBuf::from("Content"),
            cache_file: PathBuf::from(".cache/ContentInfoCache.bin"),
            asset_extension: "asset".to_string(),
            debounce_delay_ms: 250,
            enable_fs_watcher: true,
        }
    }
}
impl ContentConfig
{
    // Missing file means defaults
    pub fn try_load(project_root: &Path) -> Result<Self, ConfigError>
    {
        let config_path = project_root.join(CONFIG_FILE_NAME);
        let text = match std::fs::read_to_string(&config_path)
        {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err.into()),
        };
        Ok(toml::from_str(&text)?)
    }

    // Like try_load() but never fails, problems are logged and defaults used
    #[must_use]
    pub fn load(project_root: &Path) -> Self
    {
        Self::try_load(project_root).unwrap_or_else(|err|
        {
            log::warn!("Failed to read {CONFIG_FILE_NAME} in {project_root:?}, using defaults: {err}");
            Self::default()
        })
    }

    #[inline] #[must_use]
    pub fn debounce_delay(&self) -> Duration { Duration::from_millis(self.debounce_delay_ms) }

    #[must_use]
    pub fn content_root(&self, project_root: &Path) -> PathBuf { project_root.join(&self.content_dir) }

    #[must_use]
    pub fn cache_path(&self, project_root: &Path) -> PathBuf { project_root.join(&self.cache_file) }

    // Extension without a leading dot, as walkdir/Path report it
    #[must_use]
    pub fn extension(&self) -> &str { self.asset_extension.trim_start_matches('.') }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn missing_file_is_default()
    {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ContentConfig::default(), ContentConfig::try_load(dir.path()).unwrap());
    }

    #[test]
    fn partial_override()
    {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "debounce_delay_ms = 50\nasset_extension = \".ASSET\"\n").unwrap();

        let config = ContentConfig::try_load(dir.path()).unwrap();
        assert_eq!(50, config.debounce_delay_ms);
        assert_eq!(Duration::from_millis(50), config.debounce_delay());
        assert_eq!("ASSET", config.extension());
        assert_eq!(PathBuf::from("Content"), config.content_dir);
        assert!(config.enable_fs_watcher);
    }

    #[test]
    fn malformed_falls_back()
    {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "debounce_delay_ms = \"soon\"").unwrap();

        match ContentConfig::try_load(dir.path())
        {
            Err(ConfigError::ParseError(_)) => {},
            other => panic!("Expected a parse error, got {other:?}"),
        }
        assert_eq!(ContentConfig::default(), ContentConfig::load(dir.path()));
    }

    #[test]
    fn paths_are_project_relative()
    {
        let config = ContentConfig::default();
        let root = Path::new("/proj");
        assert_eq!(PathBuf::from("/proj/Content"), config.content_root(root));
        assert_eq!(PathBuf::from("/proj/.cache/ContentInfoCache.bin"), config.cache_path(root));
    }
}
