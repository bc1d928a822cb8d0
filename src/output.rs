use std::io::{BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::info;

use crate::error::ScrapeError;
use crate::listing::AdCollection;

/// Writes the collection as a pretty-printed JSON array.
///
/// The bytes go to a temporary file next to `path` which is then renamed over
/// it, so a failed run never leaves a truncated file behind.
pub fn write_ads(path: &Path, ads: &AdCollection) -> Result<(), ScrapeError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| ScrapeError::output(dir, e))?;

    let tmp = NamedTempFile::new_in(dir).map_err(|e| ScrapeError::output(dir, e))?;
    {
        let mut w = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut w, ads)
            .map_err(|e| ScrapeError::output(path, e.into()))?;
        w.write_all(b"\n").map_err(|e| ScrapeError::output(path, e))?;
        w.flush().map_err(|e| ScrapeError::output(path, e))?;
    }
    tmp.persist(path)
        .map_err(|e| ScrapeError::output(path, e.error))?;

    info!(path = %path.display(), ads = ads.len(), "output written");
    Ok(())
}
