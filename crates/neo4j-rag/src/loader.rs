//! Loading text files into documents

use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::Result;
use crate::types::{Document, FILE_PATH_KEY};

/// File extensions picked up when walking directories
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map_or(false, |ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
}

/// Expand files and directories into the files to load, in path order
///
/// Files named directly are always taken; inside directories only `.txt`/`.md`
/// files are. A path that cannot be read is an error.
pub fn collect_text_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for root in paths {
        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            let path = entry.path();
            if entry.file_type().is_file() && (entry.depth() == 0 || is_text_file(path)) {
                files.push(path.to_path_buf());
            }
        }
    }
    Ok(files)
}

/// Read a text file into a document with `file_path` metadata
pub async fn load_text_file(path: &Path) -> Result<Document> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(Document::from_text(content).with_meta(FILE_PATH_KEY, path.to_string_lossy().to_string()))
}

/// Load the given files and every `.txt`/`.md` file under the given directories
///
/// Empty files are skipped.
pub async fn load_documents(paths: &[PathBuf]) -> Result<Vec<Document>> {
    let files = collect_text_files(paths)?;
    let loaded = try_join_all(files.iter().map(|path| load_text_file(path))).await?;

    let documents: Vec<Document> = loaded
        .into_iter()
        .filter(|document| {
            let empty = document.content.trim().is_empty();
            if empty {
                tracing::debug!("Skipping empty file {}", document.file_path().unwrap_or_default());
            }
            !empty
        })
        .collect();

    tracing::info!("Loaded {} documents", documents.len());
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_documents_from_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.md"), "# Valyrian").unwrap();
        std::fs::write(dir.path().join("a.txt"), "Dothraki").unwrap();
        std::fs::write(dir.path().join("empty.txt"), "  \n").unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("c.TXT"), "High Valyrian").unwrap();

        let documents = load_documents(&[dir.path().to_path_buf()]).await.unwrap();
        let contents: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, ["Dothraki", "# Valyrian", "High Valyrian"]);

        let expected = dir.path().join("a.txt");
        assert_eq!(documents[0].file_path(), Some(expected.to_string_lossy().as_ref()));
    }

    #[tokio::test]
    async fn test_single_file_path() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("notes.md");
        std::fs::write(&file, "Peterson").unwrap();

        let documents = load_documents(&[file]).await.unwrap();
        assert_eq!(documents.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("typo.txt");

        let result = load_documents(&[missing.clone()]).await;
        assert!(matches!(result, Err(Error::Io(_))));
        assert!(collect_text_files(&[dir.path().to_path_buf(), missing]).is_err());
    }

    #[tokio::test]
    async fn test_named_file_ignores_extension() {
        let dir = TempDir::new().unwrap();
        let notes = dir.path().join("notes.rst");
        std::fs::write(&notes, "Dothraki has no word for 'thank you'").unwrap();

        let documents = load_documents(&[notes.clone()]).await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].file_path(), Some(notes.to_string_lossy().as_ref()));

        // Inside a directory the extension still decides
        let documents = load_documents(&[dir.path().to_path_buf()]).await.unwrap();
        assert!(documents.is_empty());
    }
}
