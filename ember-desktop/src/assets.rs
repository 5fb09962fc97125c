//! Image and sound loading.
//!
//! Images are decoded with `image` and converted to palette indices by
//! nearest colour; fully transparent pixels map to the image's transparent
//! index. Sounds are decoded with `hound` and converted to the mixer's
//! device format (interleaved stereo `i16` at 44.1 kHz).

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use mlua::Lua;

use ember_core::audio::{Sound, CHANNELS, SAMPLE_RATE};
use ember_core::config::Config;
use ember_core::error::ResourceError;
use ember_core::{Bitmap, Palette};

use crate::lua_api::{script_error, Image, SoundHandle};

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Load `path` as a stack of square frames indexed against `palette`.
pub fn load_bitmap(path: &Path, palette: &Palette, transparent: u8) -> Result<Bitmap, ResourceError> {
    let img = image::open(path)
        .map_err(|e| match e {
            image::ImageError::IoError(io) => ResourceError::io(path, io),
            other => ResourceError::decode(path, other),
        })?
        .to_rgba8();
    let (width, height) = img.dimensions();

    let pixels = img
        .pixels()
        .map(|p| {
            let [r, g, b, a] = p.0;
            if a < 128 {
                transparent
            } else {
                palette.nearest(r, g, b)
            }
        })
        .collect();

    let bitmap = Bitmap::new(width, height, pixels, transparent).ok_or_else(|| {
        ResourceError::BadDimensions {
            path: path.to_path_buf(),
            width,
            height,
        }
    })?;
    log::debug!(
        "loaded image {} ({}x{}, {} frames)",
        path.display(),
        width,
        height,
        bitmap.frame_count()
    );
    Ok(bitmap)
}

// ---------------------------------------------------------------------------
// Sounds
// ---------------------------------------------------------------------------

/// Load a WAV file and convert it to mixer format at `volume` (0..=1).
pub fn load_sound(path: &Path, volume: f64) -> Result<Sound, ResourceError> {
    let reader = hound::WavReader::open(path).map_err(|e| wav_error(path, e))?;
    let spec = reader.spec();

    let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => reader
            .into_samples::<i32>()
            .map(|s| s.map(|s| rescale_int(s, bits)))
            .collect::<Result<_, _>>()
            .map_err(|e| wav_error(path, e))?,
        (hound::SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .map(|s| s.map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<_, _>>()
            .map_err(|e| wav_error(path, e))?,
        (format, bits) => {
            return Err(ResourceError::UnsupportedAudio {
                path: path.to_path_buf(),
                reason: format!("{bits}-bit {format:?} samples"),
            })
        }
    };

    let stereo = match spec.channels {
        1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => samples,
        n => {
            return Err(ResourceError::UnsupportedAudio {
                path: path.to_path_buf(),
                reason: format!("{n} channels"),
            })
        }
    };
    let pcm = resample(&stereo, spec.sample_rate, SAMPLE_RATE);

    log::debug!(
        "loaded sound {} ({} Hz, {} ch -> {} samples)",
        path.display(),
        spec.sample_rate,
        spec.channels,
        pcm.len()
    );
    Ok(Sound::new(pcm, Sound::volume_from_f64(volume)))
}

fn wav_error(path: &Path, e: hound::Error) -> ResourceError {
    match e {
        hound::Error::IoError(io) => ResourceError::io(path, io),
        other => ResourceError::decode(path, other),
    }
}

/// Scale a `bits`-wide signed sample to 16 bits.
fn rescale_int(sample: i32, bits: u16) -> i16 {
    if bits <= 16 {
        (sample << (16 - bits)) as i16
    } else {
        (sample >> (bits - 16)) as i16
    }
}

/// Nearest-neighbour rate conversion of interleaved stereo frames.
fn resample(samples: &[i16], from: u32, to: u32) -> Vec<i16> {
    let channels = CHANNELS as usize;
    if from == to || from == 0 {
        return samples.to_vec();
    }
    let frames = samples.len() / channels;
    let out_frames = (frames as u64 * to as u64 / from as u64) as usize;
    let mut out = Vec::with_capacity(out_frames * channels);
    for i in 0..out_frames {
        let src = (i as u64 * from as u64 / to as u64) as usize;
        out.extend_from_slice(&samples[src * channels..src * channels + channels]);
    }
    out
}

// ---------------------------------------------------------------------------
// Script binding
// ---------------------------------------------------------------------------

/// Load every configured image and sound and bind each to a global of the
/// same name.
pub fn install(lua: &Lua, config: &Config) -> anyhow::Result<()> {
    let globals = lua.globals();
    for spec in &config.images {
        let bitmap = load_bitmap(&spec.path, &config.palette, spec.transparent)
            .with_context(|| format!("loading image `{}`", spec.name))?;
        globals
            .set(spec.name.as_str(), Image(bitmap))
            .map_err(script_error)?;
    }
    for spec in &config.sounds {
        let sound = load_sound(&spec.path, spec.volume)
            .with_context(|| format!("loading sound `{}`", spec.name))?;
        globals
            .set(spec.name.as_str(), SoundHandle(Arc::new(sound)))
            .map_err(script_error)?;
    }
    log::info!(
        "loaded {} images and {} sounds",
        config.images.len(),
        config.sounds.len()
    );
    Ok(())
}
