//! One book: images → annotation JSON → hOCR → PDF, with every intermediate
//! kept on disk so an interrupted run resumes where it stopped.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::hocr::{self, HocrOutcome};
use crate::pdf::{FontMetrics, PdfBook, TextLayerOptions};
use crate::preview;
use crate::source::stem_filename;
use crate::usage::{UsageTracker, check_batch};
use crate::vision::TextDetector;

/// Output and work paths derived from the input path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub input: PathBuf,
    pub stem: String,
    pub pdf_path: PathBuf,
    pub root: PathBuf,
    pub img_dir: PathBuf,
    pub json_dir: PathBuf,
    pub hocr_dir: PathBuf,
}

impl Workspace {
    /// `<parent>/<stem>.pdf` beside the input, work dirs under `<parent>/<stem>/`.
    pub fn for_input(input: &Path) -> Self {
        let parent = input
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let stem = stem_filename(input);
        let root = parent.join(&stem);
        Self {
            input: input.to_path_buf(),
            pdf_path: parent.join(format!("{}.pdf", stem)),
            img_dir: root.join("img"),
            json_dir: root.join("json"),
            hocr_dir: root.join("hocr"),
            root,
            stem,
        }
    }

    pub fn work_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.img_dir.clone(),
            self.json_dir.clone(),
            self.hocr_dir.clone(),
        ]
    }

    pub fn create(&self) -> Result<()> {
        for dir in self.work_dirs() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Removes the work dirs; the whole `<stem>/` dir too unless it is the
    /// input directory itself.
    pub fn cleanup(&self) -> Result<()> {
        if self.root == self.input {
            for dir in self.work_dirs() {
                remove_dir_if_exists(&dir)?;
            }
        } else {
            remove_dir_if_exists(&self.root)?;
        }
        Ok(())
    }

    pub fn json_path(&self, image: &Path) -> PathBuf {
        self.json_dir.join(self.page_key(image, ".json"))
    }

    pub fn hocr_path(&self, image: &Path) -> PathBuf {
        self.hocr_dir.join(self.page_key(image, ".hocr"))
    }

    pub fn preview_path(&self, image: &Path) -> PathBuf {
        self.hocr_dir.join(self.page_key(image, ".preview.png"))
    }

    /// Path of `image` below `img_dir` with its extension replaced by
    /// `suffix`, so `ch1/001.jpg` and `ch2/001.jpg` stay apart. Images outside
    /// `img_dir` are keyed on their file stem alone.
    fn page_key(&self, image: &Path, suffix: &str) -> PathBuf {
        let mut name = OsString::from(stem_filename(image));
        name.push(suffix);
        match image.strip_prefix(&self.img_dir).ok().and_then(Path::parent) {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    /// Pairs of images that would share one annotation file, e.g. `001.jpg`
    /// and `001.png` in the same directory.
    pub fn shared_keys<'a>(&self, images: &'a [PathBuf]) -> Vec<(&'a Path, &'a Path)> {
        let mut seen: HashMap<PathBuf, &'a Path> = HashMap::new();
        let mut shared = Vec::new();
        for image in images {
            match seen.entry(self.json_path(image)) {
                Entry::Occupied(first) => shared.push((*first.get(), image.as_path())),
                Entry::Vacant(slot) => {
                    slot.insert(image.as_path());
                }
            }
        }
        shared
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) => fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display())),
        None => Ok(()),
    }
}

fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("failed to remove {}", dir.display()))?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct BookOptions {
    pub line_tolerance: u32,
    pub single_page_height: f64,
    pub text_layer: TextLayerOptions,
    pub language_hints: Vec<String>,
    pub debug_preview: bool,
}

pub struct Book {
    workspace: Workspace,
    options: BookOptions,
}

impl Book {
    pub fn new(workspace: Workspace, options: BookOptions) -> Self {
        Self { workspace, options }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Runs OCR for every image that has no annotation JSON yet. The quota is
    /// checked for the whole batch up front; whatever was issued is recorded,
    /// even when a request fails midway.
    pub async fn make_annotations(
        &self,
        images: &[PathBuf],
        detector: &dyn TextDetector,
        tracker: &dyn UsageTracker,
    ) -> Result<u64> {
        let shared = self.workspace.shared_keys(images);
        for (first, second) in &shared {
            warn!(
                "{} and {} share {}; only the first is annotated",
                first.display(),
                second.display(),
                self.workspace.json_path(first).display()
            );
        }
        let pending: Vec<&PathBuf> = images
            .iter()
            .filter(|image| !shared.iter().any(|(_, second)| *second == image.as_path()))
            .filter(|image| {
                let exists = self.workspace.json_path(image).exists();
                if exists {
                    info!("{} exists", self.workspace.json_path(image).display());
                }
                !exists
            })
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }
        check_batch(tracker, pending.len() as u64).await?;

        let total = pending.len();
        let mut issued = 0u64;
        let mut outcome = Ok(());
        for (index, image) in pending.into_iter().enumerate() {
            let json_path = self.workspace.json_path(image);
            let result = async {
                let bytes = fs::read(image)
                    .with_context(|| format!("failed to read image: {}", image.display()))?;
                issued += 1;
                let json = detector
                    .detect(&bytes, &self.options.language_hints)
                    .await
                    .with_context(|| format!("OCR failed for {}", image.display()))?;
                ensure_parent(&json_path)?;
                fs::write(&json_path, json)
                    .with_context(|| format!("failed to write {}", json_path.display()))
            }
            .await;
            if let Err(err) = result {
                outcome = Err(err);
                break;
            }
            info!("create {} {}/{}", json_path.display(), index + 1, total);
        }

        if issued > 0 {
            tracker.record(issued).await?;
        }
        outcome.map(|_| issued)
    }

    /// Converts the annotation JSON of each image into hOCR unless the hOCR
    /// file is already there; returns how many files were written.
    pub fn make_markup(&self, images: &[PathBuf]) -> Result<usize> {
        let mut written = 0usize;
        for image in images {
            let json_path = self.workspace.json_path(image);
            if !json_path.exists() {
                debug!("no annotation for {}", image.display());
                continue;
            }
            let hocr_path = self.workspace.hocr_path(image);
            if hocr_path.exists() {
                info!("{} exists", hocr_path.display());
                continue;
            }
            ensure_parent(&hocr_path)?;
            if let HocrOutcome::Written =
                hocr::convert_annotation_file(&json_path, &hocr_path, self.options.line_tolerance)?
            {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Writes the PDF unless a non-empty one is already there. Returns
    /// whether a PDF was written.
    pub fn to_pdf(&self, images: &[PathBuf], font: FontMetrics) -> Result<bool> {
        let pdf_path = &self.workspace.pdf_path;
        if fs::metadata(pdf_path).is_ok_and(|meta| meta.len() > 0) {
            info!("{} exists", pdf_path.display());
            return Ok(false);
        }

        let title = pdf_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.workspace.stem.clone());
        let mut pdf = PdfBook::new(
            title,
            font,
            self.options.text_layer.clone(),
            self.options.single_page_height,
        );
        for image in images {
            let hocr_path = self.workspace.hocr_path(image);
            let markup = hocr::load_markup(&hocr_path)?;
            if self.options.debug_preview {
                if let Some(markup) = markup.as_ref() {
                    let preview_path = self.workspace.preview_path(image);
                    ensure_parent(&preview_path)?;
                    preview::write_preview(image, markup, &preview_path)?;
                }
            }
            pdf.add_page(image, markup.as_ref())?;
            info!("{}", stem_filename(image));
        }
        pdf.finish(pdf_path)?;
        Ok(true)
    }
}
