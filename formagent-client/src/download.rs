//! Binary downloads (exports, invoices) and saving them to disk.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),
}

/// Extract the file name from a `Content-Disposition` header value.
/// `filename*=UTF-8''...` is preferred over plain `filename=`.
pub fn file_name_from_disposition(header: &str) -> Option<String> {
    let mut plain = None;
    for param in header.split(';').map(str::trim) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if key == "filename*" {
            if let Some((_, encoded)) = value.split_once("''") {
                if let Ok(decoded) = urlencoding::decode(encoded) {
                    return Some(decoded.into_owned());
                }
            }
        } else if key == "filename" {
            plain = Some(value.trim_matches('"').to_string());
        }
    }
    plain.filter(|name| !name.is_empty())
}

/// Strip path components and characters that are unsafe in file names.
pub fn sanitize_file_name(name: &str) -> Result<String, DownloadError> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || ":*?\"<>|".contains(c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        return Err(DownloadError::InvalidFileName(name.to_string()));
    }
    Ok(cleaned)
}

/// Write `download` into `dir`, never overwriting: a clash gets a
/// ` (n)` suffix before the extension. Returns the written path.
pub async fn save_download(dir: &Path, download: &Download) -> Result<PathBuf, DownloadError> {
    tokio::fs::create_dir_all(dir).await?;
    let file_name = sanitize_file_name(&download.file_name)?;
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), Some(ext.to_string())),
        _ => (file_name.clone(), None),
    };

    let mut candidate = dir.join(&file_name);
    let mut n = 1;
    while tokio::fs::try_exists(&candidate).await? {
        let name = match &ext {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        candidate = dir.join(name);
        n += 1;
    }

    tokio::fs::write(&candidate, &download.bytes).await?;
    tracing::info!(path = %candidate.display(), bytes = download.bytes.len(), "download saved");
    Ok(candidate)
}
