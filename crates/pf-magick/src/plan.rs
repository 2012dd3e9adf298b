//! Translation of `(format, mode, setting)` into engine arguments.
//!
//! Each `(format, mode)` pair maps to one small strategy function. All
//! arithmetic is integer-only; `round` means round-half-up.

use std::path::{Path, PathBuf};

use pf_core::{is_animation_capable_extension, ConversionMode, Setting, TargetFormat};

/// Ordered argument list under construction.
#[derive(Debug, Default)]
struct Flags(Vec<String>);

impl Flags {
    fn define(mut self, key: &str, value: impl ToString) -> Self {
        self.0.push("-define".into());
        self.0.push(format!("{key}={}", value.to_string()));
        self
    }

    fn opt(mut self, name: &str, value: impl ToString) -> Self {
        self.0.push(name.into());
        self.0.push(value.to_string());
        self
    }

    fn flag(mut self, name: &str) -> Self {
        self.0.push(name.into());
        self
    }
}

type Strategy = fn(u32) -> Flags;

fn strategy(format: TargetFormat, mode: ConversionMode) -> Strategy {
    use ConversionMode::{Lossless, Lossy};
    use TargetFormat::*;

    match (format, mode) {
        (Avif, Lossless) => avif_lossless,
        (Avif, Lossy) => avif_lossy,
        (Heif, Lossless) => heif_lossless,
        (Heif, Lossy) => quality,
        (Webp, Lossless) => webp_lossless,
        (Webp, Lossy) => webp_lossy,
        (Jpeg, Lossless) => |_| Flags::default().opt("-quality", 100),
        (Jpeg, Lossy) => quality,
        (Png, Lossless) => png_lossless,
        (Png, Lossy) => quantize,
        (Gif, Lossless) => |_| Flags::default().opt("-layers", "optimize"),
        (Gif, Lossy) => |s| quantize(s).opt("-layers", "optimize"),
    }
}

/// Encoder speed 0..=10 from a 0..=100 effort setting.
fn encoder_speed(s: u32) -> u32 {
    (s / 10).min(10)
}

fn avif_lossless(s: u32) -> Flags {
    Flags::default()
        .define("avif:lossless", "true")
        .define("avif:speed", encoder_speed(s))
}

fn avif_lossy(s: u32) -> Flags {
    // cq = round(63 * (1 - s/100)); 0 is best quality.
    let cq = ((63 * (100 - s) + 50) / 100).min(63);
    Flags::default()
        .define("avif:cq-level", cq)
        .define("avif:speed", 4)
}

fn heif_lossless(s: u32) -> Flags {
    Flags::default()
        .define("heif:lossless", "true")
        .define("heif:speed", encoder_speed(s))
}

fn webp_lossless(s: u32) -> Flags {
    // method = round(6 - s*6/100); 6 is slowest.
    let method = (6 * (100 - s) + 50) / 100;
    Flags::default()
        .define("webp:lossless", "true")
        .define("webp:method", method)
        .opt("-quality", 100)
}

fn webp_lossy(s: u32) -> Flags {
    quality(s).define("webp:method", 4)
}

fn png_lossless(s: u32) -> Flags {
    // zlib level 0..=9 in the tens digit of -quality, filter 1 in the units.
    let level = ((100 - s) * 9 / 100).min(9);
    Flags::default().opt("-quality", 91 + level)
}

fn quality(s: u32) -> Flags {
    Flags::default().opt("-quality", s)
}

fn quantize(s: u32) -> Flags {
    let colors = (256 * s / 100).max(2);
    Flags::default().opt("-colors", colors).flag("+dither")
}

/// Per-format encoder flags, without frame handling.
pub fn translate(format: TargetFormat, mode: ConversionMode, setting: Setting) -> Vec<String> {
    strategy(format, mode)(setting.value()).0
}

/// Whether frames must be coalesced before encoding.
pub fn needs_coalesce(source_extension: &str, format: TargetFormat) -> bool {
    is_animation_capable_extension(source_extension) || format.is_animated()
}

/// Full flag list: optional `-coalesce` followed by the per-format flags.
pub fn encoder_flags(
    format: TargetFormat,
    mode: ConversionMode,
    setting: Setting,
    source_extension: &str,
) -> Vec<String> {
    let mut flags = Vec::new();
    if needs_coalesce(source_extension, format) {
        flags.push("-coalesce".to_string());
    }
    flags.extend(translate(format, mode, setting));
    flags
}

/// Everything needed to run the engine once. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingPlan {
    input: PathBuf,
    output: PathBuf,
    flags: Vec<String>,
}

impl EncodingPlan {
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        format: TargetFormat,
        mode: ConversionMode,
        setting: Setting,
    ) -> Self {
        let input = input.into();
        let source_extension = input
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        Self {
            flags: encoder_flags(format, mode, setting, &source_extension),
            input,
            output: output.into(),
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Engine arguments: `<input> [flags...] <output>`.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.flags.len() + 2);
        args.push(self.input.display().to_string());
        args.extend(self.flags.iter().cloned());
        args.push(self.output.display().to_string());
        args
    }

    /// Shell-style rendering for logs and dry runs.
    pub fn command_line(&self, program: &Path) -> String {
        std::iter::once(program.display().to_string())
            .chain(self.args())
            .map(|a| {
                if a.is_empty() || a.contains(char::is_whitespace) {
                    format!("'{}'", a.replace('\'', r"'\''"))
                } else {
                    a
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
