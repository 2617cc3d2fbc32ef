use anyhow::{anyhow, bail, Context, Result};
use log::{debug, error, info, warn};
use mime_guess::from_path;
use pdf_extract::extract_text;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Where a document's text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Pdf,
    Webpage,
}

/// Bookkeeping record for an ingested document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// File name for PDFs, URL for web pages
    pub source: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// The extracted text file this document was written to
    pub path: PathBuf,
}

/// Represents a document with its content and metadata
#[derive(Debug, Clone)]
pub struct Document {
    /// The actual text content of the document
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Check whether a path looks like a PDF based on its extension
pub fn is_pdf<P: AsRef<Path>>(path: P) -> bool {
    from_path(path.as_ref())
        .first()
        .is_some_and(|mime| mime.essence_str() == "application/pdf")
}

/// Extract every PDF in `input_dir` into a text file under `output_dir`.
///
/// Files that cannot be read, have no pages or contain no text are logged and
/// skipped, so the returned list only covers successfully processed PDFs.
pub async fn extract_pdf_directory<P, Q>(input_dir: P, output_dir: Q) -> Result<Vec<DocumentMetadata>>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let input_dir = input_dir.as_ref();
    let output_dir = output_dir.as_ref();

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    let mut pdfs: Vec<PathBuf> = fs::read_dir(input_dir)
        .with_context(|| format!("Failed to read PDF directory {}", input_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_pdf(path))
        .collect();
    pdfs.sort();

    let mut metadata_list = Vec::new();
    for input_path in pdfs {
        let Some(file_name) = input_path.file_name().and_then(|n| n.to_str()) else {
            warn!("Skipping PDF with non UTF-8 name: {}", input_path.display());
            continue;
        };
        let file_name = file_name.to_string();
        let stem = input_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&file_name);
        let output_path = output_dir.join(format!("{}.txt", stem));

        match extract_pdf_to_file(&input_path, &output_path).await {
            Ok(()) => {
                info!("Processed {}", file_name);
                metadata_list.push(DocumentMetadata {
                    source: file_name,
                    source_type: SourceType::Pdf,
                    path: output_path,
                });
            }
            Err(e) => error!("Error processing {}: {:#}", file_name, e),
        }
    }

    Ok(metadata_list)
}

async fn extract_pdf_to_file(input_path: &Path, output_path: &Path) -> Result<()> {
    let path = input_path.to_path_buf();
    // pdf-extract is synchronous and can panic on malformed input
    let text = tokio::task::spawn_blocking(move || read_pdf_text(&path))
        .await
        .map_err(|e| anyhow!("PDF extraction task failed: {}", e))??;

    tokio::fs::write(output_path, text)
        .await
        .with_context(|| format!("Failed to write {}", output_path.display()))?;
    Ok(())
}

/// Extract the text of a PDF, page by page in page order
pub fn read_pdf_text<P: AsRef<Path>>(file_path: P) -> Result<String> {
    let path = file_path.as_ref();
    debug!("Extracting text from PDF: {}", path.display());

    let content = extract_text(path)
        .with_context(|| format!("Failed to extract text from PDF: {}", path.display()))?;

    // PDF extraction can sometimes include excessive whitespace
    let cleaned_content = normalize_whitespace(&content);
    if cleaned_content.is_empty() {
        bail!("PDF contains no extractable text: {}", path.display());
    }

    Ok(cleaned_content)
}

/// Load the text files behind a set of metadata records.
///
/// Missing, unreadable or empty files are logged and left out.
pub fn load_documents(records: &[DocumentMetadata]) -> Vec<Document> {
    let mut documents = Vec::with_capacity(records.len());

    for record in records {
        match fs::read_to_string(&record.path) {
            Ok(content) if content.trim().is_empty() => {
                error!("Error loading {}: document is empty", record.path.display());
            }
            Ok(content) => documents.push(Document {
                content,
                metadata: record.clone(),
            }),
            Err(e) => error!("Error loading {}: {}", record.path.display(), e),
        }
    }

    documents
}

/// Normalize whitespace in text (remove multiple consecutive spaces, newlines, etc.)
fn normalize_whitespace(text: &str) -> String {
    let result = text.replace('\r', "");

    let mut prev_char = ' ';
    let mut newline_count = 0;
    let mut normalized = String::with_capacity(result.len());

    for c in result.chars() {
        if c == '\n' {
            newline_count += 1;
        } else {
            if newline_count > 0 {
                // Add at most two newlines (paragraph break)
                if newline_count >= 2 {
                    normalized.push_str("\n\n");
                } else {
                    normalized.push('\n');
                }
                newline_count = 0;
            }

            if !(c == ' ' && prev_char == ' ') {
                normalized.push(c);
            }

            prev_char = c;
        }
    }

    normalized.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_whitespace() {
        let text = "This  has   multiple    spaces.\n\n\nAnd multiple newlines.\r\nAnd Windows line endings.";
        let expected =
            "This has multiple spaces.\n\nAnd multiple newlines.\nAnd Windows line endings.";
        assert_eq!(normalize_whitespace(text), expected);
    }

    #[test]
    fn test_is_pdf() {
        assert!(is_pdf("policy.pdf"));
        assert!(is_pdf("POLICY.PDF"));
        assert!(!is_pdf("notes.txt"));
        assert!(!is_pdf("no_extension"));
    }

    #[test]
    fn test_metadata_serialization() {
        let metadata = DocumentMetadata {
            source: "https://support.example.com/faq".to_string(),
            source_type: SourceType::Webpage,
            path: PathBuf::from("out/0000.txt"),
        };
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["type"], "webpage");
        assert_eq!(value["source"], "https://support.example.com/faq");
        assert_eq!(value["path"], "out/0000.txt");
    }

    /// Single-page PDF showing `text` in Helvetica, with a valid xref table
    fn single_page_pdf(text: &str) -> Vec<u8> {
        let content = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text);
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 4 0 R >> >> /Contents 5 0 R >>"
                .to_string(),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
                .to_string(),
            format!(
                "<< /Length {} >>\nstream\n{}\nendstream",
                content.len(),
                content
            ),
        ];

        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (idx, object) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend(format!("{} 0 obj\n{}\nendobj\n", idx + 1, object).into_bytes());
        }

        let xref_offset = pdf.len();
        pdf.extend(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).into_bytes());
        for offset in offsets {
            pdf.extend(format!("{:010} 00000 n \n", offset).into_bytes());
        }
        pdf.extend(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_offset
            )
            .into_bytes(),
        );
        pdf
    }

    #[tokio::test]
    async fn test_readable_pdf_is_extracted() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        let output_dir = output.path().join("texts");

        fs::write(
            input.path().join("refunds.pdf"),
            single_page_pdf("Refunds take 5 days."),
        )
        .unwrap();
        fs::write(input.path().join("broken.pdf"), b"%PDF-1.4 truncated").unwrap();

        let metadata = extract_pdf_directory(input.path(), &output_dir).await.unwrap();

        assert_eq!(metadata.len(), 1);
        assert_eq!(
            metadata[0],
            DocumentMetadata {
                source: "refunds.pdf".to_string(),
                source_type: SourceType::Pdf,
                path: output_dir.join("refunds.txt"),
            }
        );
        let text = fs::read_to_string(output_dir.join("refunds.txt")).unwrap();
        assert!(text.contains("Refunds take 5 days."), "extracted: {text:?}");
        assert!(!output_dir.join("broken.txt").exists());
    }

    #[tokio::test]
    async fn test_unreadable_pdfs_are_skipped() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        let output_dir = output.path().join("texts");

        fs::write(input.path().join("broken.pdf"), b"this is not a pdf").unwrap();
        fs::write(input.path().join("empty.pdf"), b"").unwrap();
        fs::write(input.path().join("readme.txt"), b"ignored").unwrap();

        let metadata = extract_pdf_directory(input.path(), &output_dir).await.unwrap();

        assert!(metadata.is_empty());
        assert!(output_dir.is_dir());
        assert!(!output_dir.join("readme.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_input_directory_fails() {
        let output = tempdir().unwrap();
        let result = extract_pdf_directory(output.path().join("missing"), output.path()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_load_documents_skips_bad_files() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("0000.txt");
        let empty = dir.path().join("0001.txt");
        let binary = dir.path().join("0002.txt");
        fs::write(&good, "Refunds take 5 days.").unwrap();
        fs::write(&empty, "   \n").unwrap();
        fs::write(&binary, [0xff, 0xfe, 0x00, 0xc3]).unwrap();

        let record = |path: &Path| DocumentMetadata {
            source: path.display().to_string(),
            source_type: SourceType::Pdf,
            path: path.to_path_buf(),
        };
        let records = vec![
            record(&good),
            record(&empty),
            record(&binary),
            record(&dir.path().join("missing.txt")),
        ];

        let documents = load_documents(&records);
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].content, "Refunds take 5 days.");
        assert_eq!(documents[0].metadata, records[0]);
    }
}
