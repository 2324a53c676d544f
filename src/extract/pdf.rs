//! PDF text extraction: concatenated page text via `pdf-extract`.

use tracing::warn;

/// Extract the text of every page. Decoding runs on a blocking thread; the
/// pages are concatenated in order.
pub async fn extract_text(bytes: Vec<u8>) -> Result<String, String> {
    tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem(&bytes).map_err(|e| {
            warn!("PDF extraction failed: {}", e);
            format!("PDF extraction failed: {e}")
        })
    })
    .await
    .map_err(|e| format!("PDF task failed: {e}"))?
}
