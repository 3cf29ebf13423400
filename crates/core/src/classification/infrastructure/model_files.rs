use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::constants::{INPUT_SIZE_FILE_NAME, VALID_MODEL_INPUT_SIZES};

#[derive(Error, Debug)]
pub enum ModelFilesError {
    #[error("model file not found: {0}")]
    MissingModel(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} must contain a supported input size (224 or 299), found {found:?}")]
    InvalidInputSize { path: PathBuf, found: String },
    #[error("{path}:{line}: expected `id:name`, found {content:?}")]
    InvalidClassLine {
        path: PathBuf,
        line: usize,
        content: String,
    },
    #[error("{path}: class id {id} listed more than once")]
    DuplicateClassId { path: PathBuf, id: u32 },
    #[error("{0} lists no classes")]
    NoClasses(PathBuf),
}

/// Everything needed to build a classifier for one named model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub model_path: PathBuf,
    pub input_size: u32,
    pub class_names: Vec<String>,
}

/// Resolve `<models_dir>/<model_name>/<model_file>` plus its input size and
/// the class names listed in `class_names_path`.
pub fn load(
    models_dir: &Path,
    model_name: &str,
    model_file: &str,
    class_names_path: &Path,
) -> Result<ModelFiles, ModelFilesError> {
    let model_dir = models_dir.join(model_name);
    let model_path = model_dir.join(model_file);
    if !model_path.is_file() {
        return Err(ModelFilesError::MissingModel(model_path));
    }

    let input_size = read_input_size(&model_dir.join(INPUT_SIZE_FILE_NAME))?;
    let class_names = read_class_names(class_names_path)?;
    log::info!(
        "model {} expects {input_size}x{input_size} input with {} classes",
        model_path.display(),
        class_names.len()
    );

    Ok(ModelFiles {
        model_path,
        input_size,
        class_names,
    })
}

pub fn read_input_size(path: &Path) -> Result<u32, ModelFilesError> {
    let content = read(path)?;
    let first = content.lines().next().unwrap_or("").trim();
    first
        .parse::<u32>()
        .ok()
        .filter(|size| VALID_MODEL_INPUT_SIZES.contains(size))
        .ok_or_else(|| ModelFilesError::InvalidInputSize {
            path: path.to_path_buf(),
            found: first.to_string(),
        })
}

/// Parse `id:name` lines, returning names ordered by id.
pub fn read_class_names(path: &Path) -> Result<Vec<String>, ModelFilesError> {
    let content = read(path)?;
    let mut entries: Vec<(u32, String)> = Vec::new();

    for (i, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let invalid = || ModelFilesError::InvalidClassLine {
            path: path.to_path_buf(),
            line: i + 1,
            content: line.to_string(),
        };
        let (id, name) = line.split_once(':').ok_or_else(invalid)?;
        let id = id.trim().parse::<u32>().map_err(|_| invalid())?;
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid());
        }
        if entries.iter().any(|(existing, _)| *existing == id) {
            return Err(ModelFilesError::DuplicateClassId {
                path: path.to_path_buf(),
                id,
            });
        }
        entries.push((id, name.to_string()));
    }

    if entries.is_empty() {
        return Err(ModelFilesError::NoClasses(path.to_path_buf()));
    }
    entries.sort_by_key(|(id, _)| *id);
    Ok(entries.into_iter().map(|(_, name)| name).collect())
}

fn read(path: &Path) -> Result<String, ModelFilesError> {
    fs::read_to_string(path).map_err(|source| ModelFilesError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[rstest]
    #[case("224\n", Some(224))]
    #[case("299", Some(299))]
    #[case(" 299 \nextra", Some(299))]
    #[case("256", None)]
    #[case("abc", None)]
    #[case("", None)]
    fn test_read_input_size(#[case] content: &str, #[case] expected: Option<u32>) {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "input_size.txt", content);
        assert_eq!(read_input_size(&path).ok(), expected);
    }

    #[test]
    fn test_class_names_sorted_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "classes.txt", "2:work_zone\n0:background\n\n1:ramp\n");
        assert_eq!(
            read_class_names(&path).unwrap(),
            vec!["background", "ramp", "work_zone"]
        );
    }

    #[rstest]
    #[case("background\n")]
    #[case("x:background\n")]
    #[case("0:\n")]
    fn test_malformed_class_line(#[case] content: &str) {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "classes.txt", content);
        assert!(matches!(
            read_class_names(&path),
            Err(ModelFilesError::InvalidClassLine { line: 1, .. })
        ));
    }

    #[test]
    fn test_duplicate_class_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "classes.txt", "0:a\n0:b\n");
        assert!(matches!(
            read_class_names(&path),
            Err(ModelFilesError::DuplicateClassId { id: 0, .. })
        ));
    }

    #[test]
    fn test_empty_class_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "classes.txt", "\n\n");
        assert!(matches!(
            read_class_names(&path),
            Err(ModelFilesError::NoClasses(_))
        ));
    }

    #[test]
    fn test_load_resolves_layout() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("mobilenet_v2");
        fs::create_dir(&model_dir).unwrap();
        write(&model_dir, "model.onnx", "");
        write(&model_dir, "input_size.txt", "224\n");
        let classes = write(dir.path(), "class_names.txt", "0:no\n1:yes\n");

        let files = load(dir.path(), "mobilenet_v2", "model.onnx", &classes).unwrap();
        assert_eq!(files.model_path, model_dir.join("model.onnx"));
        assert_eq!(files.input_size, 224);
        assert_eq!(files.class_names, vec!["no", "yes"]);
    }

    #[test]
    fn test_load_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let classes = write(dir.path(), "class_names.txt", "0:no\n");
        assert!(matches!(
            load(dir.path(), "absent", "model.onnx", &classes),
            Err(ModelFilesError::MissingModel(_))
        ));
    }
}
