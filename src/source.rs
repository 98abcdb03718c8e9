//! Where page images come from: a directory of scans or a zip/cbz archive,
//! staged into the work directory before anything touches them.

use anyhow::{Context, Result, anyhow};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs::{self, File};
use std::io::{BufWriter, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

/// Scanner tags and OS droppings found in comic scan archives.
pub const DEFAULT_IGNORES: &[&str] = &[
    "zWater.jpg",
    "zzzzRacerXtag20086a.jpg",
    "zzZone2.jpg",
    "zzZone.jpg",
    "zSoU-Nerd.jpg",
    "zzTLK.jpg",
    "xBluntmanx.jpg",
    "Thumb.db",
    "Thumbs.db",
    "zzz_UberSoldierDCPDigital.jpg",
    "xsou5b.jpg",
    "zz.jpg",
    "zzzMarika-Empire.jpg",
    ".DS_Store",
    "__MACOSX",
];

pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "cbz"];

pub trait ImageSource {
    /// Copies or extracts the images into `img_dir` and returns the staged
    /// files ordered by file name.
    fn stage(&self, img_dir: &Path) -> Result<Vec<PathBuf>>;
}

/// File-name patterns of files that are never pages.
#[derive(Debug, Clone)]
pub struct JunkFilter {
    set: GlobSet,
}

impl JunkFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            builder.add(
                Glob::new(pattern)
                    .with_context(|| format!("invalid ignore pattern: {}", pattern))?,
            );
        }
        let set = builder
            .build()
            .with_context(|| "failed to build ignore patterns")?;
        Ok(Self { set })
    }

    /// Junk when the file name, or any directory above it, matches.
    pub fn is_junk(&self, path: &Path) -> bool {
        path.components().any(|component| {
            component
                .as_os_str()
                .to_str()
                .is_some_and(|name| self.set.is_match(name))
        })
    }
}

impl Default for JunkFilter {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORES).unwrap_or_else(|_| Self {
            set: GlobSet::empty(),
        })
    }
}

pub struct DirImageSource {
    root: PathBuf,
    filter: JunkFilter,
    exclude: Vec<PathBuf>,
}

impl DirImageSource {
    pub fn new(root: impl Into<PathBuf>, filter: JunkFilter) -> Self {
        Self {
            root: root.into(),
            filter,
            exclude: Vec::new(),
        }
    }

    /// Directories under the root that are never walked (the work dirs when
    /// they live inside the input).
    pub fn excluding(mut self, dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.exclude.extend(dirs);
        self
    }
}

impl ImageSource for DirImageSource {
    fn stage(&self, img_dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(img_dir)
            .with_context(|| format!("failed to create {}", img_dir.display()))?;
        let mut exclude = self.exclude.clone();
        exclude.push(img_dir.to_path_buf());
        let mut copied = 0usize;
        for source in list_images(&self.root, &self.filter, &exclude)? {
            let relative = source.strip_prefix(&self.root).unwrap_or(&source);
            let target = img_dir.join(relative);
            if target.exists() {
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::copy(&source, &target).with_context(|| {
                format!("failed to copy {} to {}", source.display(), target.display())
            })?;
            copied += 1;
        }
        info!("staged {} images from {}", copied, self.root.display());
        list_images(img_dir, &self.filter, &[])
    }
}

pub struct ArchiveImageSource {
    archive: PathBuf,
    filter: JunkFilter,
}

impl ArchiveImageSource {
    pub fn new(archive: impl Into<PathBuf>, filter: JunkFilter) -> Self {
        Self {
            archive: archive.into(),
            filter,
        }
    }
}

impl ImageSource for ArchiveImageSource {
    fn stage(&self, img_dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(img_dir)
            .with_context(|| format!("failed to create {}", img_dir.display()))?;
        let file = File::open(&self.archive)
            .with_context(|| format!("failed to open archive: {}", self.archive.display()))?;
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("failed to read zip archive: {}", self.archive.display()))?;

        let mut extracted = 0usize;
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .with_context(|| "failed to read zip entry")?;
            let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
                debug!("skip unsafe zip entry {}", entry.name());
                continue;
            };
            if entry.is_dir() || self.filter.is_junk(&relative) {
                continue;
            }
            let target = img_dir.join(&relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .with_context(|| format!("failed to read zip entry: {}", relative.display()))?;
            fs::write(&target, data)
                .with_context(|| format!("failed to write {}", target.display()))?;
            extracted += 1;
        }
        info!("extracted {} entries from {}", extracted, self.archive.display());
        list_images(img_dir, &self.filter, &[])
    }
}

/// Picks the source for a directory or an archive path.
pub fn open_source(
    input: &Path,
    filter: JunkFilter,
    work_dirs: Vec<PathBuf>,
) -> Result<Box<dyn ImageSource>> {
    if input.is_dir() {
        return Ok(Box::new(
            DirImageSource::new(input, filter).excluding(work_dirs),
        ));
    }
    if is_archive(input) {
        return Ok(Box::new(ArchiveImageSource::new(input, filter)));
    }
    Err(anyhow!(
        "unsupported input: {} (expected a directory or a {} archive)",
        input.display(),
        ARCHIVE_EXTENSIONS.join("/")
    ))
}

pub fn is_archive(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                ARCHIVE_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
}

/// Every image file under `root`, recursively, sorted by file name. Content
/// is sniffed, so extensions do not matter.
pub fn list_images(root: &Path, filter: &JunkFilter, exclude: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries =
            fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))?;
        for entry in entries {
            let path = entry
                .with_context(|| format!("failed to read {}", dir.display()))?
                .path();
            let relative = path.strip_prefix(root).unwrap_or(&path);
            if filter.is_junk(relative) {
                debug!("skip junk {}", path.display());
                continue;
            }
            if path.is_dir() {
                if exclude.iter().any(|excluded| *excluded == path) {
                    continue;
                }
                pending.push(path);
            } else if is_image(&path) {
                found.push(path);
            }
        }
    }
    found.sort_by(|a, b| a.file_name().cmp(&b.file_name()).then_with(|| a.cmp(b)));
    Ok(found)
}

fn is_image(path: &Path) -> bool {
    matches!(infer::get_from_path(path), Ok(Some(kind)) if kind.mime_type().starts_with("image/"))
}

/// File name without its final extension.
pub fn stem_filename(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}

/// Re-encodes every `.jpg`/`.jpeg` under `dir` at `quality`; returns how many
/// files were rewritten.
pub fn recompress_jpegs(dir: &Path, quality: u8) -> Result<usize> {
    let mut rewritten = 0usize;
    for path in list_images(dir, &JunkFilter::new::<&str>(&[])?, &[])? {
        let is_jpeg = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
        if !is_jpeg {
            continue;
        }
        recompress_jpeg(&path, quality)?;
        rewritten += 1;
    }
    info!("recompressed {} jpeg files at quality {}", rewritten, quality);
    Ok(rewritten)
}

fn recompress_jpeg(path: &Path, quality: u8) -> Result<()> {
    use image::codecs::jpeg::JpegEncoder;

    let decoded = image::open(path)
        .with_context(|| format!("failed to decode image: {}", path.display()))?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality);
        let result = if decoded.color().has_color() {
            encoder.encode_image(&decoded.to_rgb8())
        } else {
            encoder.encode_image(&decoded.to_luma8())
        };
        result.with_context(|| format!("failed to encode jpeg: {}", path.display()))?;
    }
    temp.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
