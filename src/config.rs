//! Configuration management with serde serialization/deserialization
//!
//! This module provides all configuration structures for the snapshot exporter,
//! including layout dimensions, fonts, theme palettes, the region table and
//! delivery settings.

use crate::ExportError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for the snapshot exporter
///
/// Defaults reproduce the stock branded layout.
///
/// # Examples
///
/// ```rust
/// use snapshot_export::ExportConfig;
///
/// let config = ExportConfig::default();
/// assert_eq!(config.dimensions.padding, 12.0);
///
/// let config = ExportConfig {
///     viewport_width: 1920,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Header/footer/padding geometry in logical (scale 1.0) pixels
    pub dimensions: Dimensions,

    /// Font specs for the header, section title and footer
    pub fonts: FontSettings,

    /// Colors for the dark and light themes
    pub palette: Palette,

    /// Theme-selected footer logo assets
    pub logos: LogoSettings,

    /// Footer branding line
    pub branding: Branding,

    /// Leading word of every downloaded filename (default: "Liquipedia")
    pub filename_prefix: String,

    /// Exportable region patterns, in priority order
    pub regions: Vec<RegionPattern>,

    /// Heading text extraction settings
    pub headings: HeadingSettings,

    /// Rules deciding whether a region is currently visible
    pub visibility: VisibilitySettings,

    /// Selectors hidden in the rasterization working copy only
    ///
    /// The live document is never modified for these.
    pub capture_hidden_selectors: Vec<String>,

    /// Timeout for loading a brand asset (default: 5 seconds)
    pub image_load_timeout: Duration,

    /// Logical viewport width used for rasterization (default: 1280)
    pub viewport_width: u32,

    /// Device pixel ratio at page load (default: 1.0)
    pub device_scale_factor: f64,

    /// Zoom change detection settings
    pub zoom: ZoomSettings,

    /// Download delivery settings
    pub download: DownloadSettings,

    /// Root element class signalling the dark theme (default: "theme--dark")
    pub dark_theme_class: String,

    /// Custom property holding the page background color
    pub background_property: String,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dimensions: Dimensions::default(),
            fonts: FontSettings::default(),
            palette: Palette::default(),
            logos: LogoSettings::default(),
            branding: Branding::default(),
            filename_prefix: "Liquipedia".to_string(),
            regions: RegionPattern::defaults(),
            headings: HeadingSettings::default(),
            visibility: VisibilitySettings::default(),
            capture_hidden_selectors: vec![
                ".dropdown-widget".to_string(),
                ".brkts-match-info-icon".to_string(),
            ],
            image_load_timeout: Duration::from_millis(5000),
            viewport_width: 1280,
            device_scale_factor: 1.0,
            zoom: ZoomSettings::default(),
            download: DownloadSettings::default(),
            dark_theme_class: "theme--dark".to_string(),
            background_property: "--clr-background".to_string(),
            chrome_path: None,
        }
    }
}

impl ExportConfig {
    /// Load a JSON configuration file; missing fields fall back to defaults.
    pub fn from_json(content: &str) -> Result<Self, ExportError> {
        let config: ExportConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ExportError> {
        let d = &self.dimensions;
        let positive = [
            ("header_height", d.header_height),
            ("footer_height", d.footer_height),
            ("min_width", d.min_width),
            ("line_height", d.line_height),
        ];
        for (name, value) in positive {
            if value <= 0.0 {
                return Err(ExportError::ConfigurationError(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if d.padding < 0.0 || d.border_radius < 0.0 {
            return Err(ExportError::ConfigurationError(
                "Padding and border radius must not be negative".to_string(),
            ));
        }

        if self.regions.is_empty() {
            return Err(ExportError::ConfigurationError(
                "At least one region pattern is required".to_string(),
            ));
        }

        if self.image_load_timeout.is_zero() {
            return Err(ExportError::ConfigurationError(
                "Image load timeout must be greater than 0".to_string(),
            ));
        }

        if self.viewport_width == 0 {
            return Err(ExportError::ConfigurationError(
                "Viewport width must be greater than 0".to_string(),
            ));
        }

        if self.device_scale_factor <= 0.0 {
            return Err(ExportError::ConfigurationError(
                "Device scale factor must be greater than 0".to_string(),
            ));
        }

        if self.download.max_filename_len == 0 {
            return Err(ExportError::ConfigurationError(
                "Maximum filename length must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Layout geometry, multiplied by the capture scale at compose time
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Dimensions {
    pub header_height: f32,
    pub footer_height: f32,
    pub padding: f32,
    pub border_radius: f32,
    pub logo_width: f32,
    pub logo_height: f32,
    pub logo_offset_x: f32,
    /// Horizontal offset of the footer branding text
    pub text_offset_x: f32,
    /// Horizontal inset of header titles inside the header band
    pub header_text_offset: f32,
    pub min_width: f32,
    /// Line height of stacked header titles
    pub line_height: f32,
    /// Extra height added around stacked header titles
    pub stacked_padding: f32,
}

impl Default for Dimensions {
    fn default() -> Self {
        Self {
            header_height: 43.0,
            footer_height: 33.0,
            padding: 12.0,
            border_radius: 4.0,
            logo_width: 22.0,
            logo_height: 16.0,
            logo_offset_x: 12.0,
            text_offset_x: 40.0,
            header_text_offset: 16.0,
            min_width: 300.0,
            line_height: 18.0,
            stacked_padding: 12.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FontSettings {
    pub header: String,
    pub subheader: String,
    pub footer: String,
    /// Font file used for regular weights
    pub regular_path: Option<PathBuf>,
    /// Font file used for weights of 600 and above
    pub bold_path: Option<PathBuf>,
}

impl Default for FontSettings {
    fn default() -> Self {
        Self {
            header: "bold 14px Open Sans, sans-serif".to_string(),
            subheader: "500 14px Open Sans, sans-serif".to_string(),
            footer: "bold 9px Open Sans, sans-serif".to_string(),
            regular_path: None,
            bold_path: None,
        }
    }
}

/// CSS color strings for one theme
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThemeColors {
    pub background: String,
    pub header_start: String,
    pub header_end: String,
    pub footer_start: String,
    pub footer_end: String,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Palette {
    pub dark: ThemeColors,
    pub light: ThemeColors,
    /// Header title color, shared by both themes
    pub header_text: String,
}

impl Palette {
    pub fn for_theme(&self, dark: bool) -> &ThemeColors {
        if dark {
            &self.dark
        } else {
            &self.light
        }
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            dark: ThemeColors {
                background: "#181818".to_string(),
                header_start: "#1b63a3".to_string(),
                header_end: "#0a253d".to_string(),
                footer_start: "rgba(255,255,255,0.08)".to_string(),
                footer_end: "rgba(255,255,255,0)".to_string(),
                text: "#ffffff".to_string(),
            },
            light: ThemeColors {
                background: "#fdfcff".to_string(),
                header_start: "#0a253d".to_string(),
                header_end: "#1b63a3".to_string(),
                footer_start: "rgba(0,0,0,0.1)".to_string(),
                footer_end: "rgba(0,0,0,0)".to_string(),
                text: "#181818".to_string(),
            },
            header_text: "#ffffff".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogoSettings {
    pub dark_url: String,
    pub light_url: String,
    pub dark_key: String,
    pub light_key: String,
}

impl LogoSettings {
    /// URL and cache key of the logo for a theme
    pub fn for_theme(&self, dark: bool) -> (&str, &str) {
        if dark {
            (&self.dark_url, &self.dark_key)
        } else {
            (&self.light_url, &self.light_key)
        }
    }
}

impl Default for LogoSettings {
    fn default() -> Self {
        Self {
            dark_url: "https://liquipedia.net/commons/images/f/ff/Liquipedia_default_darkmode_export.png"
                .to_string(),
            light_url: "https://liquipedia.net/commons/images/9/9a/Liquipedia_default_lightmode_export.png"
                .to_string(),
            dark_key: "dark".to_string(),
            light_key: "light".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Branding {
    pub text: String,
    /// Extra advance after each character, in logical pixels
    pub letter_spacing: f32,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            text: "POWERED BY LIQUIPEDIA".to_string(),
            letter_spacing: 1.8,
        }
    }
}

/// Kind of exportable region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum RegionType {
    Bracket,
    GroupTable,
    Crosstable,
    MatchList,
}

impl RegionType {
    pub fn label(&self) -> &'static str {
        match self {
            RegionType::Bracket => "Bracket",
            RegionType::GroupTable => "Group Table",
            RegionType::Crosstable => "Crosstable",
            RegionType::MatchList => "Match List",
        }
    }
}

/// One row of the region table
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegionPattern {
    /// Selector of the region container
    pub selector: String,
    /// Descendant of the container that is actually captured
    pub target_selector: Option<String>,
    pub region_type: RegionType,
    /// Descendant of the container holding the region's own title
    pub title_selector: Option<String>,
}

impl RegionPattern {
    pub fn defaults() -> Vec<Self> {
        vec![
            RegionPattern {
                selector: ".brkts-bracket-wrapper".to_string(),
                target_selector: Some(".brkts-bracket".to_string()),
                region_type: RegionType::Bracket,
                title_selector: None,
            },
            RegionPattern {
                selector: ".group-table".to_string(),
                target_selector: None,
                region_type: RegionType::GroupTable,
                title_selector: Some(".group-table-title".to_string()),
            },
            RegionPattern {
                selector: ".crosstable".to_string(),
                target_selector: Some("tbody".to_string()),
                region_type: RegionType::Crosstable,
                title_selector: None,
            },
            RegionPattern {
                selector: ".brkts-matchlist".to_string(),
                target_selector: Some(".brkts-matchlist-collapse-area".to_string()),
                region_type: RegionType::MatchList,
                title_selector: None,
            },
        ]
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeadingSettings {
    /// Edit affordances stripped before reading heading text
    pub edit_affordance_selector: String,
    /// Preferred text-bearing child of a heading
    pub headline_selector: String,
}

impl Default for HeadingSettings {
    fn default() -> Self {
        Self {
            edit_affordance_selector: ".mw-editsection".to_string(),
            headline_selector: ".mw-headline".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VisibilitySettings {
    pub collapsed_classes: Vec<String>,
    /// Data attribute whose value "collapsed" hides descendants
    pub collapsible_state_attr: String,
    /// Matches tab panels that are not the active one
    pub inactive_tab_selector: String,
}

impl Default for VisibilitySettings {
    fn default() -> Self {
        Self {
            collapsed_classes: vec!["collapsed".to_string(), "is--collapsed".to_string()],
            collapsible_state_attr: "data-collapsible-state".to_string(),
            inactive_tab_selector: ".tabs-content > div:not(.active)".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ZoomSettings {
    /// Quiet period after the last resize before the scale is re-read
    pub debounce: Duration,
    /// Scale difference treated as a zoom change
    pub epsilon: f64,
}

impl Default for ZoomSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
            epsilon: 0.01,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Directory receiving downloaded images (default: current directory)
    pub directory: PathBuf,
    /// Delay before a temporary object URL is revoked
    pub revoke_grace: Duration,
    /// Maximum filename length before the extension
    pub max_filename_len: usize,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            revoke_grace: Duration::from_millis(100),
            max_filename_len: 215,
        }
    }
}
