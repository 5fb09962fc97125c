//! Lock-free link between the script thread and the audio callback.
//!
//! The main thread never touches mixer slots directly. It pushes commands into
//! a single-producer/single-consumer ring; the audio callback drains the ring
//! at the start of every buffer and then mixes. A stop or pause therefore
//! takes effect on the next callback.

use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};

use crate::audio::{Sound, SoundMixer};

/// Commands in flight from the main thread to the audio callback.
#[derive(Debug)]
pub enum MixerCommand {
    Play { sound: Arc<Sound>, looping: bool },
    Resume,
    Stop(Option<Arc<Sound>>),
    Pause(Option<Arc<Sound>>),
    Mute(bool),
}

/// Create a connected handle/renderer pair.
pub fn channel(capacity: usize, slots: usize) -> (MixerHandle, AudioRenderer) {
    let (producer, consumer) = RingBuffer::new(capacity.max(1));
    (
        MixerHandle { producer },
        AudioRenderer {
            commands: consumer,
            mixer: SoundMixer::new(slots),
            muted: false,
        },
    )
}

/// Main-thread side: queues playback commands.
pub struct MixerHandle {
    producer: Producer<MixerCommand>,
}

impl MixerHandle {
    pub fn play(&mut self, sound: Arc<Sound>, looping: bool) {
        self.send(MixerCommand::Play { sound, looping });
    }

    pub fn resume(&mut self) {
        self.send(MixerCommand::Resume);
    }

    pub fn stop(&mut self, sound: Option<Arc<Sound>>) {
        self.send(MixerCommand::Stop(sound));
    }

    pub fn pause(&mut self, sound: Option<Arc<Sound>>) {
        self.send(MixerCommand::Pause(sound));
    }

    pub fn mute(&mut self, muted: bool) {
        self.send(MixerCommand::Mute(muted));
    }

    /// Commands not yet picked up by the renderer.
    pub fn queued(&self) -> usize {
        self.producer.buffer().capacity() - self.producer.slots()
    }

    /// Drops the command if the audio thread has fallen behind.
    fn send(&mut self, command: MixerCommand) {
        if let Err(rtrb::PushError::Full(command)) = self.producer.push(command) {
            log::warn!("audio command queue full; dropping {command:?}");
        }
    }
}

/// Audio-thread side: owns the mixer and renders PCM on demand.
pub struct AudioRenderer {
    commands: Consumer<MixerCommand>,
    mixer: SoundMixer,
    muted: bool,
}

impl AudioRenderer {
    /// Apply queued commands, then fill `out` with the next samples.
    /// While muted the output is silent and playback does not advance.
    pub fn render(&mut self, out: &mut [i16]) {
        self.apply_pending();
        if self.muted {
            out.fill(0);
        } else {
            self.mixer.mix(out);
        }
    }

    pub fn apply_pending(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                MixerCommand::Play { sound, looping } => {
                    self.mixer.play(sound, looping);
                }
                MixerCommand::Resume => self.mixer.resume_all(),
                MixerCommand::Stop(sound) => self.mixer.stop(sound.as_ref()),
                MixerCommand::Pause(sound) => self.mixer.pause(sound.as_ref()),
                MixerCommand::Mute(muted) => self.muted = muted,
            }
        }
    }

    pub fn mixer(&self) -> &SoundMixer {
        &self.mixer
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }
}
