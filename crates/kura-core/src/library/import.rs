use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::LibraryManager;
use crate::error::{KuraError, Result};
use crate::types::{ImportReport, NewAsset};

/// File extensions recognised as 2D source images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// File extensions recognised as 3D meshes.
pub const MESH_EXTENSIONS: &[&str] = &["obj", "fbx", "stl", "ply", "glb"];

const DESCRIPTION_EXTENSION: &str = "txt";

impl LibraryManager {
    /// Import every sub-directory of `root` as one asset.
    ///
    /// The directory name becomes the asset name. Inside it, an image file
    /// sets `image_path`, a mesh file sets `mesh_path` and a `.txt` file's
    /// trimmed contents become the description. Paths are stored absolute.
    /// Directories whose name is already taken are skipped; per-asset
    /// failures are logged and counted.
    ///
    /// # Errors
    ///
    /// `Validation` if `root` is not a directory, `StoreIo` if it cannot be
    /// listed.
    pub async fn import_directory(&self, root: impl AsRef<Path>) -> Result<ImportReport> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(KuraError::Validation(format!(
                "import path is not a directory: {}",
                root.display()
            )));
        }

        let mut folders: Vec<PathBuf> = fs::read_dir(root)
            .map_err(KuraError::store)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        folders.sort();

        let mut report = ImportReport::default();
        for folder in folders {
            let asset = match scan_folder(&folder) {
                Ok(Some(asset)) => asset,
                Ok(None) => continue,
                Err(err) => {
                    warn!(folder = %folder.display(), error = %err, "import: unreadable folder");
                    report.failed += 1;
                    continue;
                }
            };

            if self.get_asset_by_name(&asset.name)?.is_some() {
                debug!(name = %asset.name, "import: name exists, skipping");
                report.skipped += 1;
                continue;
            }

            let name = asset.name.clone();
            match self.add_asset(asset).await {
                Ok(id) => {
                    debug!(id, %name, "import: asset added");
                    report.imported += 1;
                }
                Err(err) => {
                    warn!(%name, error = %err, "import: failed to add asset");
                    report.failed += 1;
                }
            }
        }

        info!(root = %root.display(), %report, "import finished");
        Ok(report)
    }
}

/// Builds the asset described by one folder. Returns `None` for folders
/// whose name is not valid UTF-8.
fn scan_folder(folder: &Path) -> Result<Option<NewAsset>> {
    let Some(name) = folder.file_name().and_then(|n| n.to_str()) else {
        return Ok(None);
    };
    let mut asset = NewAsset::new(name);

    let mut files: Vec<PathBuf> = fs::read_dir(folder)
        .map_err(KuraError::store)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    for file in files {
        let Some(ext) = file.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let ext = ext.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            asset.image_path = Some(absolute(&file)?);
        } else if MESH_EXTENSIONS.contains(&ext.as_str()) {
            asset.mesh_path = Some(absolute(&file)?);
        } else if ext == DESCRIPTION_EXTENSION {
            let text = fs::read_to_string(&file).map_err(KuraError::store)?;
            let text = text.trim();
            if !text.is_empty() {
                asset.description = Some(text.to_string());
            }
        }
    }
    Ok(Some(asset))
}

fn absolute(path: &Path) -> Result<String> {
    let path = std::path::absolute(path).map_err(KuraError::store)?;
    Ok(path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::library::tests::{assert_consistent, manager_with};
    use crate::testing::FakeEmbedder;

    fn write_asset(root: &Path, name: &str, files: &[(&str, &str)]) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        for (file, contents) in files {
            fs::write(dir.join(file), contents).unwrap();
        }
    }

    #[tokio::test]
    async fn imports_each_subdirectory() {
        let root = tempfile::tempdir().unwrap();
        write_asset(
            root.path(),
            "cube1",
            &[("front.PNG", ""), ("cube.glb", ""), ("about.txt", "  a red cube\n")],
        );
        write_asset(root.path(), "lamp", &[("notes.md", "ignored")]);
        fs::write(root.path().join("stray.txt"), "not an asset").unwrap();

        let library = manager_with(Arc::new(FakeEmbedder::new(16)));
        let report = library.import_directory(root.path()).await.unwrap();
        assert_eq!(report, ImportReport { imported: 2, skipped: 0, failed: 0 });

        let cube = library.get_asset_by_name("cube1").unwrap().unwrap();
        assert_eq!(cube.description.as_deref(), Some("a red cube"));
        let image = cube.image_path.unwrap();
        assert!(Path::new(&image).is_absolute());
        assert!(image.ends_with("front.PNG"));
        assert!(cube.mesh_path.unwrap().ends_with("cube.glb"));

        let lamp = library.get_asset_by_name("lamp").unwrap().unwrap();
        assert_eq!(lamp.description, None);
        assert_eq!(lamp.image_path, None);
        assert_consistent(&library);
    }

    #[tokio::test]
    async fn second_import_skips_existing_names() {
        let root = tempfile::tempdir().unwrap();
        write_asset(root.path(), "cube1", &[("about.txt", "a red cube")]);
        write_asset(root.path(), "ball", &[("about.txt", "a blue sphere")]);

        let library = manager_with(Arc::new(FakeEmbedder::new(16)));
        library.import_directory(root.path()).await.unwrap();
        let report = library.import_directory(root.path()).await.unwrap();
        assert_eq!(report, ImportReport { imported: 0, skipped: 2, failed: 0 });
        assert_eq!(library.list_assets().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn embedding_outage_counts_failures() {
        let root = tempfile::tempdir().unwrap();
        write_asset(root.path(), "cube1", &[("about.txt", "a red cube")]);

        let embedder = Arc::new(FakeEmbedder::new(16));
        embedder.set_failing(true);
        let library = manager_with(embedder);
        let report = library.import_directory(root.path()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(library.list_assets().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_non_directory_root() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("file.txt");
        fs::write(&file, "x").unwrap();

        let library = manager_with(Arc::new(FakeEmbedder::new(16)));
        let err = library.import_directory(&file).await.unwrap_err();
        assert!(matches!(err, KuraError::Validation(_)));
        let err = library.import_directory(root.path().join("missing")).await.unwrap_err();
        assert!(matches!(err, KuraError::Validation(_)));
    }
}
