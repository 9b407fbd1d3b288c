use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::table::PageLayout;
use crate::types::{page::DEFAULT_PAGE_SIZE, Result, StrataError};

/// Durability mode applied when a transaction finishes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Synchronous {
    /// Sync the page file and the metadata before returning.
    #[default]
    Full,
    /// Sync the page file only; the metadata rename is not synced.
    Normal,
    /// No explicit syncs.
    Off,
}

impl Synchronous {
    /// Returns the string representation of the synchronous mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Synchronous::Full => "full",
            Synchronous::Normal => "normal",
            Synchronous::Off => "off",
        }
    }

    /// Parses a synchronous mode from a string (case-insensitive).
    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "full" => Some(Synchronous::Full),
            "normal" => Some(Synchronous::Normal),
            "off" => Some(Synchronous::Off),
            _ => None,
        }
    }

    pub(crate) fn syncs_pages(self) -> bool {
        !matches!(self, Synchronous::Off)
    }

    pub(crate) fn syncs_meta(self) -> bool {
        matches!(self, Synchronous::Full)
    }
}

/// Options used when creating or opening a document.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentOptions {
    /// Page size in bytes for new documents. Existing documents keep the size
    /// they were created with.
    pub page_size: u32,
    /// Clean pages kept in memory.
    pub cache_pages: usize,
    /// Durability mode for `finish_update`.
    pub synchronous: Synchronous,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_pages: 128,
            synchronous: Synchronous::Full,
        }
    }
}

impl DocumentOptions {
    /// Sets the page size.
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sizes pages to hold exactly `records` node records.
    pub fn with_records_per_page(mut self, records: u32) -> Self {
        self.page_size = records
            .saturating_mul(crate::table::RECORD_LEN as u32)
            .saturating_add(crate::types::page::PAGE_HDR_LEN as u32);
        self
    }

    /// Sets the clean page cache capacity.
    pub fn cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    /// Sets the durability mode.
    pub fn synchronous(mut self, synchronous: Synchronous) -> Self {
        self.synchronous = synchronous;
        self
    }

    /// Checks that the options describe a usable table.
    pub fn validate(&self) -> Result<()> {
        self.layout()?;
        self.cache_capacity()?;
        Ok(())
    }

    pub(crate) fn layout(&self) -> Result<PageLayout> {
        PageLayout::new(self.page_size)
    }

    pub(crate) fn cache_capacity(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.cache_pages).ok_or(StrataError::Invalid("cache_pages must be positive"))
    }

    /// Parses options from TOML; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> std::result::Result<Self, ConfigError> {
        let options: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: None,
            source,
        })?;
        options.validate().map_err(ConfigError::Invalid)?;
        Ok(options)
    }

    /// Reads options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: Some(path.to_path_buf()),
                source,
            },
            other => other,
        })
    }

    /// Renders the options as TOML.
    pub fn to_toml_string(&self) -> std::result::Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })
    }
}

/// Errors raised while loading [`DocumentOptions`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The options file could not be read.
    #[error("failed to read options {}: {source}", .path.display())]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The options file is not valid TOML for [`DocumentOptions`].
    #[error("failed to parse options: {source}")]
    Parse {
        /// File that was parsed, if any.
        path: Option<PathBuf>,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },
    /// The options could not be rendered.
    #[error("failed to serialize options: {source}")]
    Serialize {
        /// Underlying error.
        #[source]
        source: toml::ser::Error,
    },
    /// The parsed options were rejected.
    #[error(transparent)]
    Invalid(StrataError),
}
