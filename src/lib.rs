use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use tracing::info;

pub mod annotation;
pub mod book;
pub mod error;
pub mod hocr;
pub mod logging;
pub mod pdf;
pub mod preview;
pub mod settings;
pub mod source;
pub mod usage;
pub mod vision;

#[cfg(test)]
mod test_util;

pub use book::{Book, BookOptions, Workspace};
pub use error::Error;
pub use settings::Settings;

const RECOMPRESSED_MARKER: &str = ".recompressed";

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub input: PathBuf,
    pub single_page_height: Option<f64>,
    pub visible: bool,
    pub keep_workdir: bool,
    pub settings_path: Option<String>,
    pub skip_ocr: bool,
    pub debug_preview: bool,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub pdf_path: PathBuf,
    pub pages: usize,
    pub annotated: u64,
    pub markup_written: usize,
    pub pdf_written: bool,
}

pub async fn run(config: Config) -> Result<RunSummary> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;
    if let Some(height) = config.single_page_height {
        if height <= 0.0 {
            return Err(anyhow!("single page height must be positive: {}", height));
        }
        settings.single_page_height = height;
    }
    if config.visible {
        settings.text_layer.invisible = false;
    }
    if !config.input.exists() {
        return Err(anyhow!("input not found: {}", config.input.display()));
    }

    let workspace = Workspace::for_input(&config.input);
    workspace.create()?;
    let filter = source::JunkFilter::new(&settings.ignore)?;
    let images = source::open_source(&config.input, filter, workspace.work_dirs())?
        .stage(&workspace.img_dir)?;
    if images.is_empty() {
        return Err(anyhow!("no images found in {}", config.input.display()));
    }
    info!("{} images in {}", images.len(), workspace.img_dir.display());

    if settings.recompress {
        let marker = workspace.img_dir.join(RECOMPRESSED_MARKER);
        if !marker.exists() {
            source::recompress_jpegs(&workspace.img_dir, settings.jpeg_quality)?;
            std::fs::write(&marker, b"")
                .with_context(|| format!("failed to write {}", marker.display()))?;
        }
    }

    let book = Book::new(
        workspace.clone(),
        BookOptions {
            line_tolerance: settings.line_tolerance,
            single_page_height: settings.single_page_height,
            text_layer: settings.text_layer.clone(),
            language_hints: settings.language_hints.clone(),
            debug_preview: config.debug_preview,
        },
    );

    let annotated = if config.skip_ocr {
        0
    } else {
        let tracker = build_tracker(&settings)?;
        let detector = vision::VisionClient::from_env(&settings.api_key_env)?;
        book.make_annotations(&images, &detector, tracker.as_ref())
            .await?
    };
    let markup_written = book.make_markup(&images)?;

    let font = pdf::resolve_text_font(
        settings.font_path.as_deref().map(Path::new),
        settings.font_family.as_deref(),
        pdf::FALLBACK_FAMILIES,
    )?;
    info!("text layer font: {}", font.family);
    let pdf_written = book.to_pdf(&images, font.metrics)?;

    if !config.keep_workdir {
        workspace.cleanup()?;
    }
    info!("done {}", workspace.stem);

    Ok(RunSummary {
        pdf_path: workspace.pdf_path,
        pages: images.len(),
        annotated,
        markup_written,
        pdf_written,
    })
}

fn build_tracker(settings: &Settings) -> Result<Box<dyn usage::UsageTracker>> {
    if let Some(url) = settings.ledger_url.as_deref() {
        let account = settings
            .usage_account
            .as_deref()
            .ok_or_else(|| anyhow!("[usage] account is required with ledger_url"))?;
        return Ok(Box::new(usage::RemoteLedger::new(
            url,
            account,
            settings.monthly_max,
        )?));
    }
    if let Some(path) = settings.ledger_path.as_deref() {
        return Ok(Box::new(usage::FileLedger::new(
            expand_home(path),
            settings.monthly_max,
        )?));
    }
    Ok(Box::new(usage::Unmetered))
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) if !home.trim().is_empty() => Path::new(home.trim()).join(rest),
        _ => PathBuf::from(path),
    }
}
