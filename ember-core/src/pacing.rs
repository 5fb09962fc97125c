//! Fixed-rate frame pacing.

use std::time::{Duration, Instant};

/// How long to sleep after a frame that took `elapsed` out of a `budget`.
/// `None` means the frame ran late and the schedule should restart from now.
pub fn frame_delay(budget: Duration, elapsed: Duration) -> Option<Duration> {
    budget.checked_sub(elapsed)
}

/// Sleeps out the remainder of each frame and counts frames per second.
pub struct FramePacer {
    step: Duration,
    prev: Instant,
    window_start: Instant,
    window_frames: u32,
    fps: f64,
}

impl FramePacer {
    pub fn new(fps: f64) -> Self {
        let now = Instant::now();
        FramePacer {
            step: Duration::from_secs_f64(1.0 / fps.max(1e-3)),
            prev: now,
            window_start: now,
            window_frames: 0,
            fps: 0.0,
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Frames counted over the last whole second.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Block until the current frame's budget is used up.
    /// Returns `true` once per second when a new FPS reading is ready.
    pub fn wait(&mut self) -> bool {
        match frame_delay(self.step, self.prev.elapsed()) {
            Some(delay) => {
                std::thread::sleep(delay);
                self.prev += self.step;
            }
            None => self.prev = Instant::now(),
        }
        self.tick(self.prev)
    }

    fn tick(&mut self, now: Instant) -> bool {
        self.window_frames += 1;
        let span = now.saturating_duration_since(self.window_start);
        if span < Duration::from_secs(1) {
            return false;
        }
        self.fps = self.window_frames as f64 / span.as_secs_f64();
        self.window_frames = 0;
        self.window_start = now;
        true
    }
}
