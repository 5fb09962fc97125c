/// An indexed image made of square frames stacked vertically.
///
/// A `16x64` bitmap holds four `16x16` frames. Pixels equal to `key` are
/// transparent when blitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    key: u8,
    pixels: Vec<u8>,
}

impl Bitmap {
    /// Returns `None` unless `width > 0`, `height` is a multiple of `width`
    /// and `pixels` holds exactly `width * height` indices.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, key: u8) -> Option<Self> {
        if width == 0 || height == 0 || height % width != 0 {
            return None;
        }
        if pixels.len() != width as usize * height as usize {
            return None;
        }
        Some(Bitmap {
            width,
            height,
            key,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn key(&self) -> u8 {
        self.key
    }

    pub fn frame_count(&self) -> u32 {
        self.height / self.width
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// First source row of `frame`, wrapping in both directions.
    pub fn frame_row(&self, frame: i64) -> u32 {
        let h = self.height as i64;
        ((frame.wrapping_mul(self.width as i64) % h + h) % h) as u32
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.width as usize;
        &self.pixels[start..start + self.width as usize]
    }
}
