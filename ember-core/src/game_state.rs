use std::time::{Duration, Instant};

/// Per-instance bookkeeping the script can observe: random numbers, the
/// clock and a pending quit request.
pub struct GameState {
    pub rng_state: u64,
    started: Instant,
    quit_requested: bool,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    pub fn new() -> Self {
        Self::with_seed(0xDEAD_BEEF_CAFE_1234)
    }

    /// A zero seed would lock xorshift at zero, so it is replaced.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng_state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
            started: Instant::now(),
            quit_requested: false,
        }
    }

    /// Simple xorshift64 PRNG.  Returns a value in 0.0 .. 1.0.
    pub fn next_random(&mut self) -> f64 {
        let mut s = self.rng_state;
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.rng_state = s;
        unit_interval(s)
    }

    /// `random()`, `random(n)` and `random(n, m)`.
    pub fn random_range(&mut self, lo: Option<f64>, hi: Option<f64>) -> f64 {
        let x = self.next_random();
        match (lo, hi) {
            (None, _) => x,
            (Some(n), None) => x * n,
            (Some(n), Some(m)) => n + x * (m - n),
        }
    }

    /// Time since the instance was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn request_quit(&mut self) {
        self.quit_requested = true;
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }
}

/// Top 53 bits of `bits` as a float in `[0, 1)`.
fn unit_interval(bits: u64) -> f64 {
    (bits >> 11) as f64 / (1u64 << 53) as f64
}
