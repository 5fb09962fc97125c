//! Platform-independent core of the ember fantasy console: an indexed
//! framebuffer with a clipped blitter, tile grids, and a slot-based sound
//! mixer fed through a lock-free command queue.

pub mod audio;
pub mod audio_queue;
pub mod bitmap;
pub mod canvas;
pub mod clip;
pub mod config;
pub mod error;
pub mod game_state;
pub mod input;
pub mod pacing;
pub mod palette;
pub mod tilemap;

pub use audio::{Sound, SoundMixer};
pub use audio_queue::{AudioRenderer, MixerHandle};
pub use bitmap::Bitmap;
pub use canvas::Canvas;
pub use config::Config;
pub use error::{ConfigError, ResourceError};
pub use game_state::GameState;
pub use input::{InputState, MouseButton, Viewport};
pub use palette::Palette;
pub use tilemap::TileGrid;
