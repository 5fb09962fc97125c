//! Startup configuration, validated before the frame loop starts.

use std::path::PathBuf;

use crate::error::ConfigError;
use crate::palette::Palette;

pub const DEFAULT_WIDTH: i32 = 128;
pub const DEFAULT_HEIGHT: i32 = 128;
pub const DEFAULT_SCALE: i32 = 1;
pub const DEFAULT_FPS: f64 = 30.0;
pub const DEFAULT_TITLE: &str = "ember";
/// Largest canvas side; frames are handed to the window as 16-bit sized images.
pub const MAX_DIMENSION: i32 = u16::MAX as i32;

/// An image to load and bind to a script global.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageSpec {
    pub name: String,
    pub path: PathBuf,
    pub transparent: u8,
}

/// A sound to load and bind to a script global.
#[derive(Clone, Debug, PartialEq)]
pub struct SoundSpec {
    pub name: String,
    pub path: PathBuf,
    /// 0.0..=1.0
    pub volume: f64,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub debug: bool,
    pub width: i32,
    pub height: i32,
    pub scale: i32,
    pub fps: f64,
    pub title: String,
    pub palette: Palette,
    pub images: Vec<ImageSpec>,
    pub sounds: Vec<SoundSpec>,
}

impl Config {
    /// Reject values the frame loop can't run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |name: &'static str, v: f64| {
            if v > 0.0 && v.is_finite() {
                Ok(())
            } else {
                Err(ConfigError::invalid(name, format!("must be > 0, got {v}")))
            }
        };
        positive("WIDTH", self.width as f64)?;
        positive("HEIGHT", self.height as f64)?;
        positive("SCALE", self.scale as f64)?;
        positive("FPS", self.fps)?;

        let fits = |name: &'static str, v: i32| {
            if v <= MAX_DIMENSION {
                Ok(())
            } else {
                Err(ConfigError::invalid(name, format!("must be <= {MAX_DIMENSION}, got {v}")))
            }
        };
        fits("WIDTH", self.width)?;
        fits("HEIGHT", self.height)?;
        self.window_size()?;

        for image in &self.images {
            if image.transparent as usize >= self.palette.len() {
                log::warn!(
                    "image `{}` uses transparent index {} outside the {}-color palette",
                    image.name,
                    image.transparent,
                    self.palette.len()
                );
            }
        }
        Ok(())
    }

    /// Window size in pixels, `WIDTH`/`HEIGHT` times `SCALE`.
    pub fn window_size(&self) -> Result<(i32, i32), ConfigError> {
        let scaled = |side: i32| {
            side.checked_mul(self.scale).ok_or_else(|| {
                ConfigError::invalid(
                    "SCALE",
                    format!("{side} x {} overflows the window size", self.scale),
                )
            })
        };
        Ok((scaled(self.width)?, scaled(self.height)?))
    }
}
