use crate::error::ScanError;
use crate::image_prep::prepare_image;
use crate::vertex::VertexClient;

/// Run one upload through the preprocessor and a single model call. The
/// seam both the server and the CLI dispatch through.
pub async fn scan_image(
    client: &VertexClient,
    bytes: &[u8],
    mime_type: &str,
    language: &str,
) -> Result<String, ScanError> {
    let prepared = prepare_image(bytes, mime_type)?;
    client
        .extract_text(&prepared.bytes, &prepared.mime_type, language)
        .await
}
