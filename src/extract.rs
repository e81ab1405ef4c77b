use std::fmt;
use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;
use zip::ZipArchive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Txt,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::Txt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Txt => "txt",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0:?}")]
    UnsupportedFormat(String),
    #[error("failed to read {format} file: {reason}")]
    CorruptFile {
        format: DocumentFormat,
        reason: String,
    },
    #[error("text file is not valid UTF-8")]
    Encoding,
}

/// Determine the document format from the filename extension,
/// case-insensitively.
pub fn format_from_filename(filename: &str) -> Result<DocumentFormat, ExtractError> {
    let ext = filename.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    DocumentFormat::from_extension(ext)
        .ok_or_else(|| ExtractError::UnsupportedFormat(ext.to_string()))
}

/// Extract plain text from raw document bytes. No OCR, no layout
/// preservation.
pub fn extract(bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractError> {
    match format {
        DocumentFormat::Pdf => extract_pdf(bytes),
        DocumentFormat::Docx => extract_docx(bytes),
        DocumentFormat::Txt => {
            String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::Encoding)
        }
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract walks every page; a failure on any page propagates instead
    // of being dropped from the output.
    pdf_extract::extract_text_from_mem(bytes).map_err(|err| ExtractError::CorruptFile {
        format: DocumentFormat::Pdf,
        reason: err.to_string(),
    })
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let corrupt = |reason: String| ExtractError::CorruptFile {
        format: DocumentFormat::Docx,
        reason,
    };

    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|err| corrupt(err.to_string()))?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|err| corrupt(err.to_string()))?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|err| corrupt(err.to_string()))?;

    paragraphs_from_document_xml(&xml).map_err(|err| corrupt(err.to_string()))
}

/// Collect the text runs (`w:t`) of each paragraph (`w:p`) in document order,
/// newline-joined.
fn paragraphs_from_document_xml(xml: &str) -> Result<String, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event()? {
            Event::Start(start) if start.local_name().as_ref() == b"t" => in_text_run = true,
            Event::End(end) => match end.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Text(text) if in_text_run => current.push_str(&text.unescape()?),
            Event::Eof => break,
            _ => {}
        }
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs.join("\n"))
}
