use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

use scanlens::common::init_logger_exe;
use scanlens::credentials;
use scanlens::scan::scan_image;
use scanlens::vertex::{VertexClient, VertexConfig};

#[derive(Parser)]
#[command(version, about = "One-shot OCR of a local image via the hosted model", long_about = None)]
struct Cli {
    #[arg(
        long,
        help = "input file in image (png, jpeg, gif, webp, tiff, bmp, etc) format"
    )]
    image: PathBuf,
    #[arg(long, help = "language the text is mainly in")]
    language: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logger_exe();

    let cli = Cli::parse();

    let bytes = std::fs::read(&cli.image)
        .with_context(|| format!("failed to read {}", cli.image.display()))?;

    let config = VertexConfig::from_env().ok_or_else(|| anyhow!("GOOGLE_PROJECT_ID is not set"))?;
    let key = credentials::assemble_from_env()
        .ok_or_else(|| anyhow!("service account credentials are missing or incomplete"))?;
    let client = VertexClient::create(config, key)
        .ok_or_else(|| anyhow!("failed to construct the model client"))?;

    let language = cli
        .language
        .unwrap_or_else(|| client.default_language().to_string());
    let mime_type = mime_for_path(&cli.image);

    log::info!("scanning {} ({})", cli.image.display(), mime_type);

    let text = scan_image(&client, &bytes, mime_type, &language).await?;
    println!("{}", text);

    Ok(())
}

fn mime_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .map(str::to_lowercase);

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("tif") | Some("tiff") => "image/tiff",
        // The upstream endpoint treats untagged uploads as JPEG anyway
        _ => "image/jpeg",
    }
}
