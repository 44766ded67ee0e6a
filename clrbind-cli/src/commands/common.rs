use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use clrbind::image::{CatalogImageReader, ImageReader, PeImageReader};

/// The reader for `--manifests` runs, or the PE reader.
pub fn image_reader(manifests: bool) -> Arc<dyn ImageReader> {
    if manifests {
        Arc::new(CatalogImageReader::new())
    } else {
        Arc::new(PeImageReader::new())
    }
}

/// Collect all `.dll` files directly inside a directory, sorted.
pub fn collect_platform_assemblies(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && is_library(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_library(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("dll"))
}
