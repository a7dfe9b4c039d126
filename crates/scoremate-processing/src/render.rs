//! Page rendering through poppler's `pdftoppm`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;

use crate::thumbnail::ThumbnailSpec;

#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render `page` (1-based) of `pdf` into a JPEG thumbnail.
    async fn render_thumbnail(&self, pdf: Arc<Vec<u8>>, page: u32) -> Result<Vec<u8>>;
}

/// Renders with the `pdftoppm` binary, then fits the page with [`ThumbnailSpec`].
#[derive(Debug, Clone)]
pub struct PdftoppmRenderer {
    binary: PathBuf,
    dpi: u32,
    spec: ThumbnailSpec,
}

impl PdftoppmRenderer {
    /// Resolution pdftoppm renders at before the page is scaled down.
    pub const DEFAULT_DPI: u32 = 72;

    pub fn new(binary: impl Into<PathBuf>, spec: ThumbnailSpec) -> Self {
        Self {
            binary: binary.into(),
            dpi: Self::DEFAULT_DPI,
            spec,
        }
    }

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi.max(1);
        self
    }

    async fn rasterise(&self, pdf: &[u8], page: u32) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir().context("Failed to create render directory")?;
        let input = dir.path().join("score.pdf");
        let prefix = dir.path().join("page");

        tokio::fs::write(&input, pdf)
            .await
            .context("Failed to write PDF for rendering")?;

        let page_arg = page.to_string();
        let output = Command::new(&self.binary)
            .arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-f")
            .arg(&page_arg)
            .arg("-l")
            .arg(&page_arg)
            .arg("-singlefile")
            .arg(&input)
            .arg(&prefix)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "pdftoppm exited with {} rendering page {}: {}",
                output.status,
                page,
                stderr.trim()
            ));
        }

        let rendered = prefix.with_extension("png");
        tokio::fs::read(&rendered)
            .await
            .with_context(|| format!("pdftoppm produced no image for page {}", page))
    }
}

#[async_trait]
impl PageRenderer for PdftoppmRenderer {
    #[tracing::instrument(skip(self, pdf), fields(size_bytes = pdf.len()))]
    async fn render_thumbnail(&self, pdf: Arc<Vec<u8>>, page: u32) -> Result<Vec<u8>> {
        if page == 0 {
            return Err(anyhow!("Pages are numbered from 1"));
        }

        let start = std::time::Instant::now();
        let png = self.rasterise(&pdf, page).await?;

        let spec = self.spec;
        let jpeg = tokio::task::spawn_blocking(move || spec.fit_to_jpeg(&png))
            .await
            .context("Thumbnail encoding task panicked")??;

        tracing::debug!(
            page,
            size_bytes = jpeg.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Page rendered"
        );
        Ok(jpeg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn page_zero_is_rejected() {
        let renderer = PdftoppmRenderer::new("pdftoppm", ThumbnailSpec::default());
        let err = renderer
            .render_thumbnail(Arc::new(b"%PDF-1.4".to_vec()), 0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("numbered from 1"));
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let renderer = PdftoppmRenderer::new(
            "/nonexistent/pdftoppm-for-tests",
            ThumbnailSpec::default(),
        );
        let err = renderer
            .render_thumbnail(Arc::new(b"%PDF-1.4".to_vec()), 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to run"));
    }
}
