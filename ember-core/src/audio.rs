// audio.rs: sound resources and the slot mixer for Ember
//
// Sounds are pre-decoded device-format PCM (interleaved stereo i16). The mixer
// owns a growable arena of playback slots; each slot references a sound and
// tracks its own offset, loop tag and pause tag. Mixing is additive with
// saturation, scaled by the sound's fixed volume.

use std::collections::VecDeque;
use std::sync::Arc;

/// Output sample rate the mixer is driven at.
pub const SAMPLE_RATE: u32 = 44100;
/// Interleaved output channels.
pub const CHANNELS: u16 = 2;
/// Full volume; a sound at this volume mixes unscaled.
pub const MAX_VOLUME: u8 = 128;
/// Slots allocated up front.
pub const DEFAULT_SLOTS: usize = 64;

// ---------------------------------------------------------------------------
// Sound
// ---------------------------------------------------------------------------

/// An immutable decoded sound.
#[derive(Debug)]
pub struct Sound {
    samples: Vec<i16>,
    volume: u8,
}

impl Sound {
    /// `volume` is clamped to `MAX_VOLUME`.
    pub fn new(samples: Vec<i16>, volume: u8) -> Self {
        Sound {
            samples,
            volume: volume.min(MAX_VOLUME),
        }
    }

    /// Convert a 0.0..=1.0 script volume to mixer units.
    pub fn volume_from_f64(volume: f64) -> u8 {
        (volume.clamp(0.0, 1.0) * MAX_VOLUME as f64).round() as u8
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }
}

/// Add `src` scaled by `volume` into `dst`, saturating.
pub fn mix_into(dst: &mut [i16], src: &[i16], volume: u8) {
    let volume = volume as i32;
    for (d, &s) in dst.iter_mut().zip(src) {
        let scaled = s as i32 * volume / MAX_VOLUME as i32;
        *d = (*d as i32 + scaled).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// One playing (or paused) sound.
#[derive(Clone, Debug)]
pub struct Slot {
    sound: Arc<Sound>,
    offset: usize,
    looping: bool,
    paused: bool,
}

impl Slot {
    pub fn sound(&self) -> &Arc<Sound> {
        &self.sound
    }

    /// Next sample to be mixed.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn holds(&self, sound: &Arc<Sound>) -> bool {
        Arc::ptr_eq(&self.sound, sound)
    }
}

// ---------------------------------------------------------------------------
// Mixer
// ---------------------------------------------------------------------------

pub struct SoundMixer {
    slots: Vec<Option<Slot>>,
    /// Indices of empty slots, in the order they will be handed out.
    free: VecDeque<usize>,
}

impl Default for SoundMixer {
    fn default() -> Self {
        Self::new(DEFAULT_SLOTS)
    }
}

impl SoundMixer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        SoundMixer {
            slots: vec![None; capacity],
            free: (0..capacity).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of non-empty slots, paused ones included.
    pub fn active(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Non-empty slots with their indices.
    pub fn slots(&self) -> impl Iterator<Item = (usize, &Slot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
    }

    /// Start `sound`, or resume it in place if it already holds a music or
    /// paused slot. Returns the slot index that was started or resumed first.
    pub fn play(&mut self, sound: Arc<Sound>, looping: bool) -> usize {
        let mut resumed = None;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if let Some(slot) = slot {
                if slot.holds(&sound) && (slot.looping || slot.paused) {
                    slot.paused = false;
                    resumed.get_or_insert(i);
                }
            }
        }
        if let Some(i) = resumed {
            return i;
        }

        let index = self.allocate();
        self.slots[index] = Some(Slot {
            sound,
            offset: 0,
            looping,
            paused: false,
        });
        index
    }

    /// Resume every paused slot.
    pub fn resume_all(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            slot.paused = false;
        }
    }

    /// Stop every slot playing `sound`, or everything when `None`.
    pub fn stop(&mut self, sound: Option<&Arc<Sound>>) {
        for i in 0..self.slots.len() {
            let matches = match (&self.slots[i], sound) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(slot), Some(sound)) => slot.holds(sound),
            };
            if matches {
                self.release(i);
            }
        }
    }

    /// Pause every slot playing `sound`, or everything when `None`.
    pub fn pause(&mut self, sound: Option<&Arc<Sound>>) {
        for slot in self.slots.iter_mut().flatten() {
            if sound.map_or(true, |s| slot.holds(s)) {
                slot.paused = true;
            }
        }
    }

    /// Render the next `out.len()` samples.
    pub fn mix(&mut self, out: &mut [i16]) {
        out.fill(0);
        let len = out.len();
        for i in 0..self.slots.len() {
            let Some(slot) = self.slots[i].as_mut() else {
                continue;
            };
            if slot.paused {
                continue;
            }
            let samples = slot.sound.samples();
            let volume = slot.sound.volume();
            let remaining = samples.len().saturating_sub(slot.offset);

            if len < remaining {
                mix_into(out, &samples[slot.offset..slot.offset + len], volume);
                slot.offset += len;
                continue;
            }

            mix_into(&mut out[..remaining], &samples[slot.offset..], volume);
            if !slot.looping || samples.is_empty() {
                self.release(i);
                continue;
            }

            // Wrap to the start and keep filling this buffer.
            let mut pos = remaining;
            slot.offset = 0;
            while pos < len {
                let n = (len - pos).min(samples.len());
                mix_into(&mut out[pos..pos + n], &samples[..n], volume);
                slot.offset = n % samples.len();
                pos += n;
            }
        }
    }

    fn allocate(&mut self) -> usize {
        if self.free.is_empty() {
            self.grow();
        }
        self.free.pop_front().unwrap_or_else(|| {
            // grow() always adds at least one slot
            self.slots.push(None);
            self.slots.len() - 1
        })
    }

    /// Grow by a quarter of the current capacity, rounded up.
    fn grow(&mut self) {
        let old = self.slots.len();
        let extra = old.div_ceil(4).max(1);
        self.slots.resize(old + extra, None);
        self.free.extend(old..old + extra);
        log::debug!("sound mixer grew from {old} to {} slots", old + extra);
    }

    fn release(&mut self, index: usize) {
        if self.slots[index].take().is_some() {
            self.free.push_back(index);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
