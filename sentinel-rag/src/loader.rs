//! Loading documents from files.
//!
//! Plain text and Markdown are read as UTF-8. PDF and Word (`.docx`) files
//! are converted to text when the `pdf` and `docx` features are enabled.
//! Any other extension is rejected before the file is opened.
//!
//! A loaded document's id is derived from its canonical path, so loading the
//! same file again yields the same id and the same chunk ids.

use std::fmt;
use std::path::Path;

use tracing::info;
use uuid::Uuid;

use crate::document::{Document, DocumentSource};
use crate::error::{RagError, Result};

/// Extensions accepted by [`load_document`], lowercase and without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "md", "markdown", "docx"];

/// The formats [`load_document`] understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Text,
    Markdown,
    Docx,
}

impl FileKind {
    /// Classify `path` by its extension, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidInput`] for a missing or unsupported
    /// extension, including legacy `.doc` files.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "pdf" => Ok(Self::Pdf),
            "txt" => Ok(Self::Text),
            "md" | "markdown" => Ok(Self::Markdown),
            "docx" => Ok(Self::Docx),
            "doc" => Err(RagError::InvalidInput(format!(
                "{}: legacy .doc files are not supported, save it as .docx",
                path.display()
            ))),
            other => Err(RagError::InvalidInput(format!(
                "{}: unsupported file type '{other}', supported: {}",
                path.display(),
                SUPPORTED_EXTENSIONS.join(", ")
            ))),
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Text => "text/plain",
            Self::Markdown => "text/markdown",
            Self::Docx => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pdf => "pdf",
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Docx => "docx",
        };
        f.write_str(name)
    }
}

/// The stable document id for a file at `canonical_path`.
pub fn document_id(canonical_path: &Path) -> String {
    let url = format!("file://{}", canonical_path.display());
    Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes()).to_string()
}

/// Read `path` into a [`Document`] ready for ingestion.
///
/// # Errors
///
/// Returns [`RagError::InvalidInput`] if the extension is unsupported, the
/// path is not a readable file, the file exceeds `max_bytes`, or its content
/// cannot be turned into text. Returns [`RagError::InvalidConfig`] for a PDF
/// or `.docx` file when the matching feature is not compiled in.
pub async fn load_document(path: &Path, max_bytes: usize) -> Result<Document> {
    let kind = FileKind::from_path(path)?;
    let unreadable = |e: std::io::Error| RagError::InvalidInput(format!("{}: {e}", path.display()));

    let canonical = tokio::fs::canonicalize(path).await.map_err(unreadable)?;
    let metadata = tokio::fs::metadata(&canonical).await.map_err(unreadable)?;
    if !metadata.is_file() {
        return Err(RagError::InvalidInput(format!("{} is not a file", path.display())));
    }
    if metadata.len() > max_bytes as u64 {
        return Err(RagError::InvalidInput(format!(
            "{} is {} bytes, larger than the {max_bytes} byte limit",
            path.display(),
            metadata.len()
        )));
    }

    let data = tokio::fs::read(&canonical).await.map_err(unreadable)?;
    let text = extract_text(kind, &data)
        .map_err(|e| match e {
            RagError::InvalidInput(message) => {
                RagError::InvalidInput(format!("{}: {message}", path.display()))
            }
            other => other,
        })?;

    let filename = canonical
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| canonical.display().to_string());
    let id = document_id(&canonical);
    info!(document.id = %id, %filename, %kind, bytes = data.len(), chars = text.chars().count(), "loaded document");

    Ok(Document::with_id(id, text, DocumentSource::new(filename, kind.mime_type())))
}

/// Convert raw file content of the given kind to text.
pub fn extract_text(kind: FileKind, data: &[u8]) -> Result<String> {
    match kind {
        FileKind::Text | FileKind::Markdown => String::from_utf8(data.to_vec())
            .map_err(|e| RagError::InvalidInput(format!("not valid UTF-8: {e}"))),
        FileKind::Pdf => extract_pdf(data),
        FileKind::Docx => extract_docx(data),
    }
}

#[cfg(feature = "pdf")]
fn extract_pdf(data: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(data)
        .map_err(|e| RagError::InvalidInput(format!("unreadable PDF: {e}")))
}

#[cfg(not(feature = "pdf"))]
fn extract_pdf(_data: &[u8]) -> Result<String> {
    Err(RagError::InvalidConfig("PDF files require the `pdf` feature".into()))
}

/// Paragraph text, one paragraph per block separated by a blank line.
#[cfg(feature = "docx")]
fn extract_docx(data: &[u8]) -> Result<String> {
    let docx = docx_rs::read_docx(data)
        .map_err(|e| RagError::InvalidInput(format!("unreadable .docx: {e}")))?;

    let mut paragraphs = Vec::new();
    for child in docx.document.children {
        if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
            let mut text = String::new();
            for child in paragraph.children {
                if let docx_rs::ParagraphChild::Run(run) = child {
                    for child in run.children {
                        if let docx_rs::RunChild::Text(t) = child {
                            text.push_str(&t.text);
                        }
                    }
                }
            }
            if !text.trim().is_empty() {
                paragraphs.push(text);
            }
        }
    }
    Ok(paragraphs.join("\n\n"))
}

#[cfg(not(feature = "docx"))]
fn extract_docx(_data: &[u8]) -> Result<String> {
    Err(RagError::InvalidConfig(".docx files require the `docx` feature".into()))
}
