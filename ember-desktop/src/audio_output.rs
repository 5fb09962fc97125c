// audio_output.rs: platform side of the ember mixer
//
// The mixer itself lives in an `AudioRenderer` that is moved onto whichever
// thread pulls audio. With the `audio` feature that is rodio's output
// callback: the renderer is wrapped in a `Source` that renders one buffer at a
// time as rodio asks for samples. Without the feature (or when no device can
// be opened) a pump thread renders buffers at the real-time rate and throws
// them away, so one-shots still finish and `stop`/`pause` behave the same.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ember_core::audio::{CHANNELS, SAMPLE_RATE};
use ember_core::audio_queue::AudioRenderer;

/// Stereo frames rendered per callback buffer.
pub const BUFFER_FRAMES: usize = 1024;

/// Keeps audio flowing until dropped.
pub struct AudioOutput {
    #[cfg(feature = "audio")]
    _stream: Option<rodio::OutputStream>,
    pump: Option<Pump>,
}

impl AudioOutput {
    /// Start pulling PCM from `renderer`.
    pub fn start(renderer: AudioRenderer) -> std::io::Result<Self> {
        #[cfg(feature = "audio")]
        let output = match device::open(renderer) {
            Ok(stream) => {
                log::info!("audio: {SAMPLE_RATE} Hz stereo via default output device");
                AudioOutput {
                    _stream: Some(stream),
                    pump: None,
                }
            }
            Err(device::OpenError::NoDevice(renderer, err)) => {
                log::warn!("audio: no output device ({err}); running silent");
                AudioOutput {
                    _stream: None,
                    pump: Some(Pump::spawn(renderer)?),
                }
            }
            Err(device::OpenError::Play(err)) => return Err(std::io::Error::other(err)),
        };

        #[cfg(not(feature = "audio"))]
        let output = {
            log::info!("audio: built without the `audio` feature; running silent");
            AudioOutput {
                pump: Some(Pump::spawn(renderer)?),
            }
        };

        Ok(output)
    }

    pub fn is_silent(&self) -> bool {
        self.pump.is_some()
    }
}

// ---------------------------------------------------------------------------
// Silent pump
// ---------------------------------------------------------------------------

struct Pump {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Pump {
    fn spawn(mut renderer: AudioRenderer) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let period = Duration::from_secs_f64(BUFFER_FRAMES as f64 / SAMPLE_RATE as f64);
        let thread = std::thread::Builder::new()
            .name("ember-audio".into())
            .spawn(move || {
                let mut buf = vec![0i16; BUFFER_FRAMES * CHANNELS as usize];
                while flag.load(Ordering::Relaxed) {
                    renderer.render(&mut buf);
                    std::thread::sleep(period);
                }
            })?;
        Ok(Pump {
            running,
            thread: Some(thread),
        })
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("audio pump thread panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// rodio device
// ---------------------------------------------------------------------------

#[cfg(feature = "audio")]
mod device {
    use super::*;
    use rodio::{OutputStream, Source};

    /// Streams the renderer's output one buffer at a time.
    pub(super) struct RendererSource {
        renderer: AudioRenderer,
        buf: Vec<i16>,
        pos: usize,
    }

    impl RendererSource {
        pub(super) fn new(renderer: AudioRenderer) -> Self {
            let len = BUFFER_FRAMES * CHANNELS as usize;
            RendererSource {
                renderer,
                buf: vec![0; len],
                pos: len,
            }
        }
    }

    impl Iterator for RendererSource {
        type Item = i16;

        fn next(&mut self) -> Option<i16> {
            if self.pos == self.buf.len() {
                self.renderer.render(&mut self.buf);
                self.pos = 0;
            }
            let sample = self.buf[self.pos];
            self.pos += 1;
            Some(sample)
        }
    }

    impl Source for RendererSource {
        fn current_frame_len(&self) -> Option<usize> {
            None
        }

        fn channels(&self) -> u16 {
            CHANNELS
        }

        fn sample_rate(&self) -> u32 {
            SAMPLE_RATE
        }

        fn total_duration(&self) -> Option<Duration> {
            None
        }
    }

    pub(super) enum OpenError {
        /// No device; the renderer is handed back for the pump.
        NoDevice(AudioRenderer, String),
        Play(String),
    }

    pub(super) fn open(renderer: AudioRenderer) -> Result<OutputStream, OpenError> {
        let (stream, handle) = match OutputStream::try_default() {
            Ok(pair) => pair,
            Err(e) => return Err(OpenError::NoDevice(renderer, e.to_string())),
        };
        handle
            .play_raw(RendererSource::new(renderer).convert_samples())
            .map_err(|e| OpenError::Play(format!("failed to start playback: {e}")))?;
        Ok(stream)
    }

}
