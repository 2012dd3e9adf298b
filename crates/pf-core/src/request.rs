//! Conversion request vocabulary: target formats, modes, and the 0-100 setting.
//!
//! All enums serialize in lowercase (via `serde(rename_all = "lowercase")`) and
//! implement `Display`/`FromStr` manually so the same spelling is used in URL
//! paths, file names, and encoder flags.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Source file extensions accepted for upload (lowercase, with leading dot).
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".avif", ".heif", ".heic", ".bmp", ".tiff", ".tif",
];

/// Source extensions whose containers can carry more than one frame.
const ANIMATION_CAPABLE_EXTENSIONS: &[&str] = &[".gif", ".webp", ".apng", ".png"];

// ---------------------------------------------------------------------------
// TargetFormat
// ---------------------------------------------------------------------------

/// Output formats the service can produce.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Avif,
    Webp,
    Jpeg,
    Png,
    Gif,
    Heif,
}

impl TargetFormat {
    /// Every target format, in API order.
    pub const ALL: [TargetFormat; 6] = [
        Self::Avif,
        Self::Webp,
        Self::Jpeg,
        Self::Png,
        Self::Gif,
        Self::Heif,
    ];

    /// Lowercase name, also used as the output file extension.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Avif => "avif",
            Self::Webp => "webp",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Heif => "heif",
        }
    }

    /// MIME type of the encoded output.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Avif => "image/avif",
            Self::Webp => "image/webp",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Heif => "image/heif",
        }
    }

    /// Whether encoding needs the optional AV1/HEIF encoder plugin.
    pub fn requires_plugin(self) -> bool {
        matches!(self, Self::Avif | Self::Heif)
    }

    /// Whether the format can hold an animation.
    pub fn is_animated(self) -> bool {
        matches!(self, Self::Gif | Self::Webp)
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| {
                let allowed: Vec<&str> = Self::ALL.iter().map(|f| f.as_str()).collect();
                Error::InvalidParameter(format!(
                    "Unsupported target format '{s}'. Expected one of: {}",
                    allowed.join(", ")
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// ConversionMode
// ---------------------------------------------------------------------------

/// Whether the setting tunes compression effort or visual quality.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMode {
    /// Pixel-exact output; the setting is compression speed (0 = slowest/best).
    Lossless,
    /// The setting is visual quality (0 = worst, 100 = best).
    Lossy,
}

impl ConversionMode {
    pub const ALL: [ConversionMode; 2] = [Self::Lossless, Self::Lossy];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lossless => "lossless",
            Self::Lossy => "lossy",
        }
    }
}

impl fmt::Display for ConversionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lossless" => Ok(Self::Lossless),
            "lossy" => Ok(Self::Lossy),
            other => Err(Error::InvalidParameter(format!(
                "Unsupported mode '{other}'. Expected one of: lossless, lossy"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Setting
// ---------------------------------------------------------------------------

/// The single 0-100 knob of the API. Quality in lossy mode, compression
/// effort in lossless mode. Can only be constructed in range.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, utoipa::ToSchema,
)]
#[serde(transparent)]
pub struct Setting(u8);

impl Setting {
    pub const MIN: Setting = Setting(0);
    pub const MAX: Setting = Setting(100);

    pub fn new(value: u32) -> Result<Self> {
        if value > 100 {
            return Err(Error::InvalidParameter(format!(
                "setting must be between 0 and 100, got {value}"
            )));
        }
        Ok(Self(value as u8))
    }

    pub fn value(self) -> u32 {
        u32::from(self.0)
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Setting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value: u32 = s.parse().map_err(|_| {
            Error::InvalidParameter(format!(
                "setting must be an integer between 0 and 100, got '{s}'"
            ))
        })?;
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for Setting {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = u32::deserialize(deserializer)?;
        Setting::new(value).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Source file names
// ---------------------------------------------------------------------------

/// Strip any client-supplied directory components (`/` or `\`).
fn base_name(filename: &str) -> &str {
    filename.rsplit(['/', '\\']).next().unwrap_or(filename)
}

/// Lowercased extension of `filename` including the leading dot, or an empty
/// string when there is none. Dotfiles like `.png` have no extension.
pub fn source_extension(filename: &str) -> String {
    Path::new(base_name(filename))
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Check that an upload has a name and an allowed extension, returning the
/// normalized extension.
pub fn validate_source_filename(filename: Option<&str>) -> Result<String> {
    let filename = match filename {
        Some(name) if !name.trim().is_empty() => name,
        _ => return Err(Error::Validation("Filename is required.".into())),
    };

    let ext = source_extension(filename);
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        let shown = if ext.is_empty() { "(none)" } else { ext.as_str() };
        return Err(Error::Validation(format!(
            "Unsupported file format: {shown}. Allowed formats: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }

    Ok(ext)
}

/// Whether a source with this extension may be animated.
pub fn is_animation_capable_extension(ext: &str) -> bool {
    ANIMATION_CAPABLE_EXTENSIONS.contains(&ext)
}

/// Reject uploads strictly larger than `max_mb` mebibytes.
pub fn check_upload_size(len: u64, max_mb: u64) -> Result<()> {
    if len > max_mb.saturating_mul(1024 * 1024) {
        return Err(Error::Validation(format!(
            "File too large. Max size is {max_mb}MB."
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ConversionRequest
// ---------------------------------------------------------------------------

/// A fully validated conversion request. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    target: TargetFormat,
    mode: ConversionMode,
    setting: Setting,
    source_filename: String,
    source_extension: String,
    source_bytes: Bytes,
}

impl ConversionRequest {
    /// Build a request, validating the source file name.
    pub fn new(
        target: TargetFormat,
        mode: ConversionMode,
        setting: Setting,
        source_filename: impl Into<String>,
        source_bytes: Bytes,
    ) -> Result<Self> {
        let source_filename = source_filename.into();
        let source_extension = validate_source_filename(Some(&source_filename))?;
        Ok(Self {
            target,
            mode,
            setting,
            source_filename,
            source_extension,
            source_bytes,
        })
    }

    pub fn target(&self) -> TargetFormat {
        self.target
    }

    pub fn mode(&self) -> ConversionMode {
        self.mode
    }

    pub fn setting(&self) -> Setting {
        self.setting
    }

    pub fn source_filename(&self) -> &str {
        &self.source_filename
    }

    /// Normalized source extension, e.g. `.png`.
    pub fn source_extension(&self) -> &str {
        &self.source_extension
    }

    pub fn source_bytes(&self) -> &Bytes {
        &self.source_bytes
    }

    /// Move the upload out, leaving the request empty-bodied.
    pub fn take_source(&mut self) -> Bytes {
        std::mem::take(&mut self.source_bytes)
    }

    /// Name offered to the client for the converted file:
    /// `{original_basename}_{mode}_{setting}.{target_format}`.
    pub fn download_filename(&self) -> String {
        let base = base_name(&self.source_filename);
        let stem = Path::new(base)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| base.to_string());
        format!("{stem}_{}_{}.{}", self.mode, self.setting, self.target)
    }
}
