//! PDF inspection: page count plus title/author from the Info dictionary.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lopdf::{Dictionary, Document, Object};
use std::sync::Arc;

/// What the worker needs to know about an uploaded document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentInfo {
    pub page_count: u32,
    pub title: Option<String>,
    pub author: Option<String>,
}

#[async_trait]
pub trait DocumentInspector: Send + Sync {
    async fn inspect(&self, data: Arc<Vec<u8>>) -> Result<DocumentInfo>;
}

/// lopdf-backed inspector. Parsing runs on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct PdfInspector;

impl PdfInspector {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous inspection; falls back to a byte scan when lopdf cannot
    /// parse the file (truncated xref tables are common in scanned scores).
    pub fn inspect_bytes(data: &[u8]) -> Result<DocumentInfo> {
        if !data.starts_with(b"%PDF") {
            return Err(anyhow!("Document is not a PDF"));
        }

        match Document::load_mem(data) {
            Ok(doc) => {
                let mut page_count = doc.get_pages().len() as u32;
                if page_count == 0 {
                    page_count = scan_page_count(data).unwrap_or(0);
                }
                let info = info_dictionary(&doc);
                let text = |name: &[u8]| {
                    info.and_then(|dict| dict.get(name).ok())
                        .and_then(|obj| obj.as_str().ok())
                        .map(decode_pdf_text)
                        .filter(|s| !s.is_empty())
                };
                Ok(DocumentInfo {
                    page_count,
                    title: text(b"Title"),
                    author: text(b"Author"),
                })
            }
            Err(e) => {
                tracing::debug!(error = %e, "lopdf could not parse document, scanning bytes");
                let page_count = scan_page_count(data)
                    .with_context(|| format!("Failed to read PDF page count: {}", e))?;
                Ok(DocumentInfo {
                    page_count,
                    title: None,
                    author: None,
                })
            }
        }
    }
}

#[async_trait]
impl DocumentInspector for PdfInspector {
    async fn inspect(&self, data: Arc<Vec<u8>>) -> Result<DocumentInfo> {
        tokio::task::spawn_blocking(move || Self::inspect_bytes(&data))
            .await
            .context("PDF inspection task panicked")?
    }
}

fn info_dictionary(doc: &Document) -> Option<&Dictionary> {
    match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

/// PDF text strings are either UTF-16BE with a BOM or a single-byte encoding.
fn decode_pdf_text(bytes: &[u8]) -> String {
    let text = if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => bytes.iter().map(|&b| b as char).collect(),
        }
    };
    text.trim_matches(char::from(0)).trim().to_string()
}

/// Largest `/Count n` in the file; the root page tree carries the total.
fn scan_page_count(data: &[u8]) -> Result<u32> {
    let text = String::from_utf8_lossy(data);
    text.split("/Count")
        .skip(1)
        .filter_map(|rest| {
            rest.trim_start()
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse::<u32>()
                .ok()
        })
        .max()
        .filter(|count| *count > 0)
        .ok_or_else(|| anyhow!("No page tree found"))
}
