//! Reads a [`DataSource`] fully into memory for decoding.

use crate::config::EngineConfig;
use bytes::Bytes;
use std::io::{Read, Seek, SeekFrom};
use tempo_core::{DataSource, Error, MediaDataSource, Result};
use tracing::debug;

/// Encoded bytes of a source plus a container hint for the prober.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub data: Bytes,
    pub extension: Option<String>,
}

/// Check that a source can be attached at all. Runs on the caller's thread.
pub fn validate(source: &DataSource) -> Result<()> {
    match source {
        DataSource::Path(path) => {
            let meta = std::fs::metadata(path)?;
            if meta.is_dir() {
                return Err(Error::InvalidArgument(format!(
                    "{} is a directory",
                    path.display()
                )));
            }
            Ok(())
        }
        DataSource::Uri { uri, .. } if uri.scheme() == "file" => {
            let path = uri
                .to_file_path()
                .map_err(|()| Error::InvalidArgument(format!("{uri} has no local path")))?;
            std::fs::metadata(path)?;
            Ok(())
        }
        DataSource::Custom(custom) if custom.size() == Some(0) => {
            Err(Error::InvalidArgument("custom source is empty".into()))
        }
        _ => Ok(()),
    }
}

/// Load every byte of `source`.
pub fn load(source: &DataSource, config: &EngineConfig) -> Result<LoadedSource> {
    let extension = source.extension_hint();
    let (data, extension) = match source {
        DataSource::Path(path) => (std::fs::read(path)?, extension),
        DataSource::Uri { uri, .. } if uri.scheme() == "file" => {
            let path = uri
                .to_file_path()
                .map_err(|()| Error::InvalidArgument(format!("{uri} has no local path")))?;
            (std::fs::read(path)?, extension)
        }
        DataSource::Uri { uri, headers } => {
            let (data, mime) = fetch(uri.as_str(), headers, config)?;
            (data, extension.or_else(|| mime.as_deref().and_then(mime_extension)))
        }
        DataSource::File(file) => {
            let mut data = Vec::new();
            let mut reader = file;
            reader.read_to_end(&mut data)?;
            (data, None)
        }
        DataSource::FileRange {
            file,
            offset,
            length,
        } => {
            let mut reader = file;
            reader.seek(SeekFrom::Start(*offset))?;
            let mut data = Vec::new();
            reader.take(*length).read_to_end(&mut data)?;
            (data, None)
        }
        DataSource::Custom(custom) => (read_custom(custom.as_ref())?, None),
    };

    if data.is_empty() {
        return Err(Error::AudioDecode(format!("{source} contains no data")));
    }

    debug!("Loaded {} bytes from {} source", data.len(), source.kind());
    Ok(LoadedSource {
        data: Bytes::from(data),
        extension,
    })
}

fn fetch(
    url: &str,
    headers: &std::collections::HashMap<String, String>,
    config: &EngineConfig,
) -> Result<(Vec<u8>, Option<String>)> {
    let mut request = ureq::get(url);

    let has_agent = headers
        .keys()
        .any(|key| key.eq_ignore_ascii_case("user-agent"));
    if !has_agent {
        request = request.header("User-Agent", config.user_agent.as_str());
    }
    for (key, value) in headers {
        request = request.header(key, value);
    }

    let mut body = request
        .call()
        .map_err(|e| Error::Network(format!("HTTP request failed: {e}")))?
        .into_body();

    let mime_type = body.mime_type().map(String::from);
    let data = body
        .with_config()
        .limit(config.max_download_bytes)
        .read_to_vec()
        .map_err(|e| Error::Network(format!("Failed to read response: {e}")))?;

    debug!("Fetched {} bytes, mime: {:?}", data.len(), mime_type);
    Ok((data, mime_type))
}

fn read_custom(source: &dyn MediaDataSource) -> Result<Vec<u8>> {
    let capacity = source
        .size()
        .and_then(|size| usize::try_from(size).ok())
        .unwrap_or(0);
    let mut data = Vec::with_capacity(capacity);
    let mut chunk = vec![0u8; 64 * 1024];

    loop {
        let read = source.read_at(data.len() as u64, &mut chunk)?;
        if read == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..read]);
    }

    Ok(data)
}

/// Map a MIME type to the container extension symphonia probes by.
pub fn mime_extension(mime: &str) -> Option<String> {
    let ext = if mime.contains("webm") || mime.contains("opus") {
        "webm"
    } else if mime.contains("mp4") || mime.contains("m4a") || mime.contains("aac") {
        "m4a"
    } else if mime.contains("mp3") || mime.contains("mpeg") {
        "mp3"
    } else if mime.contains("ogg") || mime.contains("vorbis") {
        "ogg"
    } else if mime.contains("flac") {
        "flac"
    } else if mime.contains("wav") {
        "wav"
    } else {
        return None;
    };
    Some(ext.to_string())
}
