//! Data source descriptors accepted by a player.

use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// A pluggable random-access byte source.
///
/// Implementations must be safe to read from the engine thread.
pub trait MediaDataSource: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `position`.
    ///
    /// Returns the number of bytes read; `0` means end of data.
    fn read_at(&self, position: u64, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Total size in bytes, if known.
    fn size(&self) -> Option<u64>;
}

/// Where a track's bytes come from.
pub enum DataSource {
    /// A `file`, `http` or `https` URI, with optional request headers.
    Uri {
        uri: Url,
        headers: HashMap<String, String>,
    },
    /// A filesystem path.
    Path(PathBuf),
    /// An already-open file handle, read from its current position.
    File(File),
    /// A byte range of an open file handle.
    FileRange { file: File, offset: u64, length: u64 },
    /// A caller-supplied reader.
    Custom(Arc<dyn MediaDataSource>),
}

impl DataSource {
    /// Parse a URI source without extra headers.
    pub fn uri(uri: &str) -> Result<Self> {
        Self::uri_with_headers(uri, HashMap::new())
    }

    /// Parse a URI source with request headers.
    pub fn uri_with_headers(uri: &str, headers: HashMap<String, String>) -> Result<Self> {
        let uri = Url::parse(uri).map_err(|e| Error::InvalidArgument(format!("{uri}: {e}")))?;
        match uri.scheme() {
            "file" | "http" | "https" => Ok(Self::Uri { uri, headers }),
            other => Err(Error::UnsupportedSource(format!("URI scheme `{other}`"))),
        }
    }

    /// A byte range of `file`. The range must be non-empty and must not overflow.
    pub fn file_range(file: File, offset: u64, length: u64) -> Result<Self> {
        if length == 0 {
            return Err(Error::InvalidArgument("file range length is zero".into()));
        }
        if offset.checked_add(length).is_none() {
            return Err(Error::InvalidArgument(format!(
                "file range {offset}+{length} overflows"
            )));
        }
        Ok(Self::FileRange {
            file,
            offset,
            length,
        })
    }

    /// Short name of the variant, for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Uri { .. } => "uri",
            Self::Path(_) => "path",
            Self::File(_) => "file",
            Self::FileRange { .. } => "file-range",
            Self::Custom(_) => "custom",
        }
    }

    /// A file extension usable as a format hint, if the source carries one.
    pub fn extension_hint(&self) -> Option<String> {
        let from_str = |s: &str| {
            let name = s.rsplit('/').next()?;
            let (_, ext) = name.rsplit_once('.')?;
            (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
        };
        match self {
            Self::Uri { uri, .. } => from_str(uri.path()),
            Self::Path(path) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase),
            _ => None,
        }
    }
}

impl From<PathBuf> for DataSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<File> for DataSource {
    fn from(file: File) -> Self {
        Self::File(file)
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uri { uri, headers } => f
                .debug_struct("Uri")
                .field("uri", &uri.as_str())
                .field("headers", &headers.len())
                .finish(),
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::File(file) => f.debug_tuple("File").field(file).finish(),
            Self::FileRange {
                file,
                offset,
                length,
            } => f
                .debug_struct("FileRange")
                .field("file", file)
                .field("offset", offset)
                .field("length", length)
                .finish(),
            Self::Custom(source) => f
                .debug_struct("Custom")
                .field("size", &source.size())
                .finish(),
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uri { uri, .. } => write!(f, "{uri}"),
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::File(_) => f.write_str("<file handle>"),
            Self::FileRange { offset, length, .. } => {
                write!(f, "<file handle {offset}+{length}>")
            }
            Self::Custom(_) => f.write_str("<custom source>"),
        }
    }
}
