use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "imgs2pdf-rust",
    version,
    about = "Turn a folder or archive of page scans into a searchable PDF"
)]
struct Cli {
    /// Directory of images, or a .zip/.cbz archive
    input: PathBuf,

    /// Physical page height in inches (default from settings: 10.25)
    #[arg(short = 'H', long = "single-page-height")]
    single_page_height: Option<f64>,

    /// Draw the text layer in red instead of invisible
    #[arg(long = "visible")]
    visible: bool,

    /// Keep the img/json/hocr work directories
    #[arg(short = 'k', long = "keep-workdir")]
    keep_workdir: bool,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Use existing annotation JSON only; no OCR requests
    #[arg(long = "skip-ocr")]
    skip_ocr: bool,

    /// Write a PNG of the hOCR boxes next to each hOCR file (implies keeping them)
    #[arg(long = "debug-preview")]
    debug_preview: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    imgs2pdf_rust::logging::init(cli.verbose)?;

    let config = imgs2pdf_rust::Config {
        input: cli.input,
        single_page_height: cli.single_page_height,
        visible: cli.visible,
        keep_workdir: cli.keep_workdir || cli.debug_preview,
        settings_path: cli.read_settings,
        skip_ocr: cli.skip_ocr,
        debug_preview: cli.debug_preview,
    };
    let summary = imgs2pdf_rust::run(config).await?;
    println!("{}", summary.pdf_path.display());
    Ok(())
}
