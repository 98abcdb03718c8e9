use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::hocr::DEFAULT_LINE_TOLERANCE;
use crate::pdf::TextLayerOptions;
use crate::source::DEFAULT_IGNORES;
use crate::usage::DEFAULT_MONTHLY_MAX;
use crate::vision::DEFAULT_API_KEY_ENV;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

/// Comic book trim height in inches.
pub const DEFAULT_SINGLE_PAGE_HEIGHT: f64 = 10.25;

#[derive(Debug, Clone)]
pub struct Settings {
    pub single_page_height: f64,
    pub line_tolerance: u32,
    pub text_layer: TextLayerOptions,
    pub font_path: Option<String>,
    pub font_family: Option<String>,
    pub ignore: Vec<String>,
    pub language_hints: Vec<String>,
    pub api_key_env: String,
    pub usage_account: Option<String>,
    pub ledger_url: Option<String>,
    pub ledger_path: Option<String>,
    pub monthly_max: u64,
    pub recompress: bool,
    pub jpeg_quality: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            single_page_height: DEFAULT_SINGLE_PAGE_HEIGHT,
            line_tolerance: DEFAULT_LINE_TOLERANCE,
            text_layer: TextLayerOptions::default(),
            font_path: None,
            font_family: None,
            ignore: DEFAULT_IGNORES.iter().map(|name| name.to_string()).collect(),
            language_hints: vec!["en".to_string()],
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            usage_account: None,
            ledger_url: None,
            ledger_path: None,
            monthly_max: DEFAULT_MONTHLY_MAX,
            recompress: false,
            jpeg_quality: 75,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    page: Option<PageSettings>,
    layout: Option<LayoutSettings>,
    text_layer: Option<TextLayerSettings>,
    source: Option<SourceSettings>,
    vision: Option<VisionSettings>,
    usage: Option<UsageSettings>,
    images: Option<ImageSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct PageSettings {
    single_page_height: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct LayoutSettings {
    line_tolerance: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct TextLayerSettings {
    font_size_ratio: Option<f64>,
    width_ratio: Option<f64>,
    skip_single_char: Option<bool>,
    invisible: Option<bool>,
    font_path: Option<String>,
    font_family: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SourceSettings {
    ignore: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct VisionSettings {
    language_hints: Option<Vec<String>>,
    api_key_env: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UsageSettings {
    account: Option<String>,
    ledger_url: Option<String>,
    ledger_path: Option<String>,
    monthly_max: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageSettings {
    recompress: Option<bool>,
    jpeg_quality: Option<u8>,
}

/// Merges every settings layer that exists, lowest priority first.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    install_home_defaults()?;
    let mut settings = Settings::default();
    for layer in settings_layers(extra_path)? {
        if !layer.exists() {
            continue;
        }
        let content = fs::read_to_string(&layer)
            .with_context(|| format!("failed to read settings: {}", layer.display()))?;
        let parsed: SettingsFile = toml::from_str(&content)
            .with_context(|| format!("failed to parse settings: {}", layer.display()))?;
        settings.merge(parsed);
    }
    Ok(settings)
}

fn settings_layers(extra_path: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut layers = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(home) = home_dir() {
        layers.extend([home.join("settings.toml"), home.join("settings.local.toml")]);
    }
    if let Some(extra) = extra_path {
        if !extra.is_file() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        layers.push(extra.to_path_buf());
    }
    Ok(layers)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(height) = incoming.page.and_then(|page| page.single_page_height) {
            if height > 0.0 {
                self.single_page_height = height;
            }
        }
        if let Some(tolerance) = incoming.layout.and_then(|layout| layout.line_tolerance) {
            self.line_tolerance = tolerance;
        }
        if let Some(text_layer) = incoming.text_layer {
            if let Some(ratio) = text_layer.font_size_ratio.filter(|ratio| *ratio > 0.0) {
                self.text_layer.font_size_ratio = ratio;
            }
            if let Some(ratio) = text_layer.width_ratio.filter(|ratio| *ratio > 0.0) {
                self.text_layer.width_ratio = ratio;
            }
            if let Some(skip) = text_layer.skip_single_char {
                self.text_layer.skip_single_char = skip;
            }
            if let Some(invisible) = text_layer.invisible {
                self.text_layer.invisible = invisible;
            }
            if let Some(path) = non_empty(text_layer.font_path) {
                self.font_path = Some(path);
            }
            if let Some(family) = non_empty(text_layer.font_family) {
                self.font_family = Some(family);
            }
        }
        if let Some(ignore) = incoming.source.and_then(|source| source.ignore) {
            self.ignore = ignore;
        }
        if let Some(vision) = incoming.vision {
            if let Some(hints) = vision.language_hints {
                self.language_hints = hints;
            }
            if let Some(var) = non_empty(vision.api_key_env) {
                self.api_key_env = var;
            }
        }
        if let Some(usage) = incoming.usage {
            if let Some(account) = non_empty(usage.account) {
                self.usage_account = Some(account);
            }
            if let Some(url) = non_empty(usage.ledger_url) {
                self.ledger_url = Some(url);
            }
            if let Some(path) = non_empty(usage.ledger_path) {
                self.ledger_path = Some(path);
            }
            if let Some(max) = usage.monthly_max.filter(|max| *max > 0) {
                self.monthly_max = max;
            }
        }
        if let Some(images) = incoming.images {
            if let Some(recompress) = images.recompress {
                self.recompress = recompress;
            }
            if let Some(quality) = images.jpeg_quality.filter(|q| (1..=100).contains(q)) {
                self.jpeg_quality = quality;
            }
        }
    }
}

/// First run: drop the commented defaults into the home directory.
fn install_home_defaults() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    let target = home.join("settings.toml");
    if target.exists() {
        return Ok(());
    }
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    fs::write(&target, DEFAULT_SETTINGS_TOML)
        .with_context(|| format!("failed to write settings: {}", target.display()))
}

fn home_dir() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    if home.is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".imgs2pdf-rust"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn embedded_defaults_parse() {
        let parsed: SettingsFile = toml::from_str(DEFAULT_SETTINGS_TOML).expect("defaults");
        let mut settings = Settings::default();
        settings.merge(parsed);
        assert_eq!(settings.single_page_height, DEFAULT_SINGLE_PAGE_HEIGHT);
        assert_eq!(settings.line_tolerance, DEFAULT_LINE_TOLERANCE);
        assert_eq!(settings.text_layer, TextLayerOptions::default());
        assert_eq!(settings.monthly_max, DEFAULT_MONTHLY_MAX);
        assert!(settings.ignore.iter().any(|name| name == "Thumbs.db"));
    }

    #[test]
    fn first_run_writes_home_settings() {
        with_temp_home(|home| {
            load_settings(None).expect("load");
            let written = home.join(".imgs2pdf-rust").join("settings.toml");
            assert_eq!(
                fs::read_to_string(written).expect("home settings"),
                DEFAULT_SETTINGS_TOML
            );
        });
    }

    #[test]
    fn explicit_file_overrides_and_invalid_values_are_ignored() {
        with_temp_home(|home| {
            let extra = home.join("book.toml");
            fs::write(
                &extra,
                r#"
[page]
single_page_height = -1.0

[layout]
line_tolerance = 12

[text_layer]
width_ratio = 80.0
invisible = false
font_family = "  "

[usage]
account = "scanner"
monthly_max = 0

[images]
jpeg_quality = 0
"#,
            )
            .expect("write");
            let settings = load_settings(Some(&extra)).expect("load");
            assert_eq!(settings.single_page_height, DEFAULT_SINGLE_PAGE_HEIGHT);
            assert_eq!(settings.line_tolerance, 12);
            assert_eq!(settings.text_layer.width_ratio, 80.0);
            assert!(!settings.text_layer.invisible);
            assert_eq!(settings.font_family, None);
            assert_eq!(settings.usage_account.as_deref(), Some("scanner"));
            assert_eq!(settings.monthly_max, DEFAULT_MONTHLY_MAX);
            assert_eq!(settings.jpeg_quality, 75);
        });
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        with_temp_home(|home| {
            let err = load_settings(Some(&home.join("absent.toml"))).expect_err("missing");
            assert!(err.to_string().contains("settings file not found"));
        });
    }
}
