//! Class-per-subfolder image trees.
//!
//! Two layouts are recognized:
//! - `root/train/<class>/<image>` with an optional `root/test/<class>/<image>`
//! - `root/<class>/<image>`
//!
//! Class ids follow the lexical order of class folder names. Test samples
//! use the training class mapping; a test folder naming an unseen class is
//! kept with `class_id: None`.

use crate::data::dataset::{Dataset, Sample};
use crate::error::{AutoClassError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "webp", "tif", "tiff"];

/// Train set plus optional held-out test set from one image tree.
#[derive(Debug, Clone)]
pub struct DatasetSplits {
    pub train: Arc<Dataset>,
    pub test: Option<Arc<Dataset>>,
}

/// Loader for class-folder image trees.
pub struct ImageFolder;

impl ImageFolder {
    /// Load `root`, detecting the `train/` + `test/` layout.
    pub fn load(root: &Path) -> Result<DatasetSplits> {
        if !root.is_dir() {
            return Err(AutoClassError::data_format(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let train_dir = root.join("train");
        if !train_dir.is_dir() {
            let train = Self::scan(root)?;
            return Ok(DatasetSplits {
                train: Arc::new(train),
                test: None,
            });
        }

        let train = Self::scan(&train_dir)?;
        let test_dir = root.join("test");
        let test = if test_dir.is_dir() {
            let samples = labelled_samples(&test_dir, train.classes())?;
            if samples.is_empty() {
                tracing::warn!(dir = %test_dir.display(), "Ignoring test folder with no images");
                None
            } else {
                let classes = train.classes().to_vec();
                Some(Arc::new(Dataset::new(&test_dir, classes, samples)?))
            }
        } else {
            None
        };
        tracing::info!(
            root = %root.display(),
            classes = train.num_classes(),
            train = train.len(),
            test = test.as_ref().map(|t| t.len()).unwrap_or(0),
            "Loaded image folder dataset"
        );
        Ok(DatasetSplits {
            train: Arc::new(train),
            test,
        })
    }

    /// Scan a class-folder tree, deriving the class set from its subfolders.
    ///
    /// Class folders without any image are skipped.
    pub fn scan(root: &Path) -> Result<Dataset> {
        let mut classes = Vec::new();
        let mut samples = Vec::new();
        for (name, dir) in class_dirs(root)? {
            let files = image_files(&dir);
            if files.is_empty() {
                tracing::warn!(class = %name, "Skipping class folder with no images");
                continue;
            }
            let id = classes.len();
            samples.extend(files.into_iter().map(|path| Sample {
                path,
                label: name.clone(),
                class_id: Some(id),
            }));
            classes.push(name);
        }

        if classes.is_empty() {
            return Err(AutoClassError::data_format(format!(
                "no class subfolders with images under {}",
                root.display()
            )));
        }
        Dataset::new(root, classes, samples)
    }

    /// Scan a tree against an existing class mapping.
    pub fn scan_with_classes(root: &Path, classes: &[String]) -> Result<Dataset> {
        let samples = labelled_samples(root, classes)?;
        if samples.is_empty() {
            return Err(AutoClassError::data_format(format!(
                "no images under {}",
                root.display()
            )));
        }
        Dataset::new(root, classes.to_vec(), samples)
    }
}

/// Samples of every class folder under `root`, with ids from `classes`.
fn labelled_samples(root: &Path, classes: &[String]) -> Result<Vec<Sample>> {
    let mut samples = Vec::new();
    for (name, dir) in class_dirs(root)? {
        let class_id = classes.iter().position(|c| *c == name);
        let files = image_files(&dir);
        if class_id.is_none() && !files.is_empty() {
            tracing::warn!(class = %name, "Folder is not a known class; samples tagged unknown");
        }
        samples.extend(files.into_iter().map(|path| Sample {
            path,
            label: name.clone(),
            class_id,
        }));
    }
    Ok(samples)
}

/// Whether `path` has a recognized image extension (case-insensitive).
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Visible subdirectories of `root`, sorted by name.
fn class_dirs(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_hidden(&name) || !path.is_dir() {
            continue;
        }
        dirs.push((name, path));
    }
    dirs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(dirs)
}

/// Image files below `dir`, recursively, sorted by path.
fn image_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(&e.file_name().to_string_lossy()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_image_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_scan_assigns_lexical_ids() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "zebra/1.png");
        touch(dir.path(), "apple/2.jpg");
        touch(dir.path(), "apple/1.JPEG");
        touch(dir.path(), "mango/a.bmp");
        touch(dir.path(), "mango/notes.txt");

        let ds = ImageFolder::scan(dir.path()).unwrap();
        assert_eq!(ds.classes(), &["apple", "mango", "zebra"]);
        assert_eq!(ds.len(), 4);
        assert_eq!(ds.samples()[0].class_id, Some(0));
        assert!(ds.samples()[0].path.ends_with("apple/1.JPEG"));
        assert_eq!(ds.samples()[3].label, "zebra");
        assert_eq!(ds.samples()[3].class_id, Some(2));
    }

    #[test]
    fn test_scan_skips_hidden_and_empty() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), ".cache/1.png");
        touch(dir.path(), "cat/.hidden.png");
        touch(dir.path(), "cat/1.png");
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();

        let ds = ImageFolder::scan(dir.path()).unwrap();
        assert_eq!(ds.classes(), &["cat"]);
        assert_eq!(ds.len(), 1);
    }

    #[test]
    fn test_scan_without_classes_is_data_format_error() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "loose.png");
        let err = ImageFolder::scan(dir.path()).unwrap_err();
        assert!(matches!(err, AutoClassError::DataFormat(_)));
    }

    #[test]
    fn test_load_missing_root() {
        let err = ImageFolder::load(Path::new("/nonexistent/images")).unwrap_err();
        assert!(matches!(err, AutoClassError::DataFormat(_)));
    }

    #[test]
    fn test_load_train_test_layout_tags_unknown() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "train/cat/1.png");
        touch(dir.path(), "train/dog/1.png");
        touch(dir.path(), "test/cat/9.png");
        touch(dir.path(), "test/fox/9.png");

        let splits = ImageFolder::load(dir.path()).unwrap();
        assert_eq!(splits.train.classes(), &["cat", "dog"]);
        let test = splits.test.unwrap();
        assert_eq!(test.classes(), splits.train.classes());
        assert_eq!(test.samples()[0].class_id, Some(0));
        assert_eq!(test.samples()[1].label, "fox");
        assert!(!test.samples()[1].is_known());
    }

    #[test]
    fn test_load_with_empty_test_folder_has_no_test() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "train/cat/1.png");
        touch(dir.path(), "train/dog/1.png");
        touch(dir.path(), "test/cat/readme.txt");
        std::fs::create_dir_all(dir.path().join("test/dog")).unwrap();

        let splits = ImageFolder::load(dir.path()).unwrap();
        assert_eq!(splits.train.len(), 2);
        assert!(splits.test.is_none());

        let err = ImageFolder::scan_with_classes(&dir.path().join("test"), splits.train.classes())
            .unwrap_err();
        assert!(matches!(err, AutoClassError::DataFormat(_)));
    }

    #[test]
    fn test_load_flat_layout_has_no_test() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a/1.png");
        touch(dir.path(), "b/1.png");
        let splits = ImageFolder::load(dir.path()).unwrap();
        assert_eq!(splits.train.num_classes(), 2);
        assert!(splits.test.is_none());
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("x/y.PNG")));
        assert!(is_image_file(Path::new("y.tiff")));
        assert!(!is_image_file(Path::new("y.txt")));
        assert!(!is_image_file(Path::new("noext")));
    }
}
