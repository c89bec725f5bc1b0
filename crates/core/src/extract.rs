use crate::chunking::PAGE_BREAK;
use crate::error::IngestError;
use crate::models::PolicyMetadata;
use lopdf::Document;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const TEXT_EXTENSIONS: [&str; 4] = ["txt", "md", "markdown", "pdf"];

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

/// A policy file read from disk, ready for ingestion.
#[derive(Debug, Clone)]
pub struct PolicySource {
    pub title: String,
    pub filename: String,
    /// Extracted text. PDF pages are separated by form feeds.
    pub text: String,
    pub size_bytes: u64,
    pub checksum: String,
}

impl PolicySource {
    pub fn metadata(&self) -> PolicyMetadata {
        PolicyMetadata {
            source_filename: Some(self.filename.clone()),
            size_bytes: Some(self.size_bytes),
            checksum: Some(self.checksum.clone()),
            tags: Vec::new(),
        }
    }
}

pub fn load_policy_file(path: &Path) -> Result<PolicySource, IngestError> {
    load_policy_file_with(path, &LopdfExtractor)
}

pub fn load_policy_file_with(
    path: &Path,
    extractor: &dyn PdfExtractor,
) -> Result<PolicySource, IngestError> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
        .to_string();
    let extension = extension_of(path)
        .filter(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
        .ok_or_else(|| IngestError::UnsupportedFile(filename.clone()))?;

    let bytes = fs::read(path)?;
    let text = if extension == "pdf" {
        extractor
            .extract_pages(path)?
            .into_iter()
            .map(|page| page.text.trim_end().to_string())
            .collect::<Vec<_>>()
            .join(&PAGE_BREAK.to_string())
    } else {
        String::from_utf8(bytes.clone()).map_err(|error| {
            IngestError::InvalidArgument(format!("{filename} is not UTF-8: {error}"))
        })?
    };

    Ok(PolicySource {
        title: title_from_filename(path),
        size_bytes: bytes.len() as u64,
        checksum: digest_bytes(&bytes),
        filename,
        text,
    })
}

/// Policy files under `folder`, recursively, in path order.
pub fn discover_policy_files(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            extension_of(entry.path()).is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
        })
        .map(|entry| entry.path().to_path_buf())
        .collect();

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

fn title_from_filename(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    stem.replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    struct FixedPages;

    impl PdfExtractor for FixedPages {
        fn extract_pages(&self, _path: &Path) -> Result<Vec<PageText>, IngestError> {
            Ok(vec![
                PageText {
                    number: 1,
                    text: "1. Purpose\nFirst page.\n".to_string(),
                },
                PageText {
                    number: 2,
                    text: "Second page.".to_string(),
                },
            ])
        }
    }

    #[test]
    fn discovery_is_recursive_and_skips_other_formats() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;

        fs::write(dir.path().join("b.md"), "# Leave")?;
        fs::write(nested.join("a.PDF"), b"%PDF-1.4\n%fake")?;
        fs::write(dir.path().join("notes.docx"), b"zip")?;
        File::create(dir.path().join("a.txt")).and_then(|mut file| file.write_all(b"text"))?;

        let files = discover_policy_files(dir.path());
        let names: Vec<_> = files
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .collect();
        assert_eq!(names, vec!["a.txt", "b.md", "a.PDF"]);
        Ok(())
    }

    #[test]
    fn text_files_carry_checksum_and_title() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("remote_work-policy.txt");
        fs::write(&path, "Employees may work remotely.")?;

        let source = load_policy_file(&path)?;
        assert_eq!(source.title, "remote work policy");
        assert_eq!(source.text, "Employees may work remotely.");
        assert_eq!(source.size_bytes, 28);
        assert_eq!(source.checksum, digest_bytes(b"Employees may work remotely."));
        assert_eq!(source.metadata().source_filename.as_deref(), Some("remote_work-policy.txt"));
        Ok(())
    }

    #[test]
    fn pdf_pages_are_joined_with_form_feeds() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("handbook.pdf");
        fs::write(&path, b"%PDF-1.4")?;

        let source = load_policy_file_with(&path, &FixedPages)?;
        assert_eq!(source.text, "1. Purpose\nFirst page.\u{000c}Second page.");
        Ok(())
    }

    #[test]
    fn unreadable_pdf_and_unknown_extension_fail() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let broken = dir.path().join("broken.pdf");
        fs::write(&broken, b"%PDF-1.4\n%broken")?;
        assert!(matches!(load_policy_file(&broken), Err(IngestError::PdfParse(_))));

        let docx = dir.path().join("policy.docx");
        fs::write(&docx, b"zip")?;
        assert!(matches!(load_policy_file(&docx), Err(IngestError::UnsupportedFile(_))));
        Ok(())
    }
}
