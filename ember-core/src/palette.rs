use crate::error::ConfigError;

/// Maximum number of palette entries (one byte per framebuffer pixel).
pub const MAX_COLORS: usize = 256;

/// The fixed colour table that framebuffer indices are resolved through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<[u8; 3]>,
}

impl Palette {
    /// Build a palette from `(r, g, b)` triples. Must hold 1..=256 entries.
    pub fn new(colors: Vec<[u8; 3]>) -> Result<Self, ConfigError> {
        if colors.is_empty() {
            return Err(ConfigError::invalid("COLORS", "screen palette isn't defined"));
        }
        if colors.len() > MAX_COLORS {
            return Err(ConfigError::invalid(
                "COLORS",
                format!("{} colors given, at most {MAX_COLORS} allowed", colors.len()),
            ));
        }
        Ok(Palette { colors })
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Wrap an arbitrary colour number into a valid index.
    pub fn wrap(&self, color: i64) -> u8 {
        color.rem_euclid(self.colors.len() as i64) as u8
    }

    pub fn rgb(&self, index: u8) -> [u8; 3] {
        self.colors
            .get(index as usize)
            .copied()
            .unwrap_or(self.colors[0])
    }

    /// Index of the entry closest to `(r, g, b)` by squared distance.
    /// Ties resolve to the lowest index.
    pub fn nearest(&self, r: u8, g: u8, b: u8) -> u8 {
        let mut best = 0usize;
        let mut best_dist = u32::MAX;
        for (i, c) in self.colors.iter().enumerate() {
            let dr = c[0] as i32 - r as i32;
            let dg = c[1] as i32 - g as i32;
            let db = c[2] as i32 - b as i32;
            let dist = (dr * dr + dg * dg + db * db) as u32;
            if dist < best_dist {
                best = i;
                best_dist = dist;
                if dist == 0 {
                    break;
                }
            }
        }
        best as u8
    }

    /// Resolve indexed pixels to RGBA into `out`, which must hold
    /// `pixels.len() * 4` bytes.
    pub fn to_rgba(&self, pixels: &[u8], out: &mut [u8]) {
        for (&idx, rgba) in pixels.iter().zip(out.chunks_exact_mut(4)) {
            let [r, g, b] = self.rgb(idx);
            rgba.copy_from_slice(&[r, g, b, 255]);
        }
    }
}
