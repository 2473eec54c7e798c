//! Opening extractor sources: local files or HTTP(S) downloads, optionally gzipped

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::error::ExtractionError;

/// Default timeout for downloading a remote source.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;

pub type SourceReader = Box<dyn Read + Send>;

/// Open `uri` for reading
///
/// `http://` and `https://` URIs are downloaded in full, `file://` URIs and
/// bare paths are opened on the blocking pool. A name ending in `.gz` is
/// decompressed on the fly. The returned reader is synchronous: extractors
/// read from it inside `pop`, on the task that drives the run.
pub async fn open_source(uri: &str, timeout: Duration) -> Result<SourceReader, ExtractionError> {
    let (reader, gzipped): (SourceReader, bool) = match Url::parse(uri) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            let gzipped = url.path().ends_with(".gz");
            (Box::new(fetch(uri, timeout).await?), gzipped)
        }
        Ok(url) if url.scheme() == "file" => {
            let path = url.to_file_path().map_err(|_| ExtractionError::Open {
                uri: uri.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a local path"),
            })?;
            (Box::new(open_file(uri, &path).await?), is_gz(&path))
        }
        // Anything else, including Windows drive letters parsed as schemes, is a path
        _ => {
            let path = Path::new(uri);
            (Box::new(open_file(uri, path).await?), is_gz(path))
        }
    };

    if gzipped {
        debug!(uri, "Decompressing gzip source");
        Ok(Box::new(MultiGzDecoder::new(reader)))
    } else {
        Ok(reader)
    }
}

fn is_gz(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

async fn open_file(uri: &str, path: &Path) -> Result<File, ExtractionError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|source| ExtractionError::Open {
            uri: uri.to_string(),
            source,
        })?;
    Ok(file.into_std().await)
}

async fn fetch(uri: &str, timeout: Duration) -> Result<Cursor<Vec<u8>>, ExtractionError> {
    let fetch_err = |source| ExtractionError::Fetch {
        uri: uri.to_string(),
        source,
    };

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(fetch_err)?;

    let response = client.get(uri).send().await.map_err(fetch_err)?;
    let status = response.status();
    if !status.is_success() {
        return Err(ExtractionError::HttpStatus {
            uri: uri.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.bytes().await.map_err(fetch_err)?;
    info!(uri, bytes = body.len(), "Downloaded source");

    Ok(Cursor::new(body.to_vec()))
}
