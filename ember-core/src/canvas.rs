use crate::bitmap::Bitmap;
use crate::clip::{Camera, ClipRegion, Rect};
use crate::palette::Palette;
use crate::tilemap::TileGrid;

/// First and last character codes that have a glyph in a font bitmap.
/// Code 33 (`!`) is frame 0.
pub const FIRST_GLYPH: u8 = 33;
pub const LAST_GLYPH: u8 = 126;

/// The virtual screen: one palette index per pixel, plus the clip and camera
/// state every drawing call goes through.
pub struct Canvas {
    width: i32,
    height: i32,
    /// Row-major pixel indices, `width * height` bytes.
    pixels: Vec<u8>,
    palette: Palette,

    // -- drawing state --
    clip: ClipRegion,
    clip_rect: Rect,
    camera: Camera,
}

// ---------------------------------------------------------------------------
// Core
// ---------------------------------------------------------------------------

impl Canvas {
    /// Create a zeroed canvas. Sizes are clamped to at least one pixel.
    pub fn new(width: i32, height: i32, palette: Palette) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let mut canvas = Canvas {
            width,
            height,
            pixels: vec![0u8; width as usize * height as usize],
            palette,
            clip: ClipRegion::full(width, height),
            clip_rect: Rect::default(),
            camera: Camera::default(),
        };
        canvas.reset_clip();
        canvas
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Resolve the screen through the palette into `out`
    /// (`width * height * 4` bytes).
    pub fn to_rgba(&self, out: &mut [u8]) {
        self.palette.to_rgba(&self.pixels, out);
    }
}

// ---------------------------------------------------------------------------
// Clip & camera
// ---------------------------------------------------------------------------

impl Canvas {
    /// Restrict drawing to `(x, y, w, h)`. A non-positive size empties the
    /// region entirely.
    pub fn set_clip(&mut self, x: i32, y: i32, w: i32, h: i32) {
        self.clip_rect = Rect { x, y, w, h };
        self.clip = ClipRegion::from_rect(self.clip_rect, self.width, self.height);
    }

    /// The rectangle last passed to `set_clip`, before clamping.
    pub fn clip(&self) -> Rect {
        self.clip_rect
    }

    pub fn clip_region(&self) -> ClipRegion {
        self.clip
    }

    pub fn reset_clip(&mut self) {
        self.set_clip(0, 0, self.width, self.height);
    }

    pub fn set_camera(&mut self, x: f64, y: f64) {
        self.camera = Camera { x, y };
    }

    pub fn camera(&self) -> Camera {
        self.camera
    }
}

// ---------------------------------------------------------------------------
// Fill & read
// ---------------------------------------------------------------------------

impl Canvas {
    /// Fill the whole screen, ignoring clip and camera.
    pub fn fill(&mut self, color: i64) {
        let c = self.palette.wrap(color);
        self.pixels.fill(c);
    }

    /// Fill a rectangle in world coordinates, clipped.
    pub fn fill_rect(&mut self, color: i64, x: f64, y: f64, w: i32, h: i32) {
        let c = self.palette.wrap(color);
        let (x, y) = self.camera.apply(x, y);
        let Some(span) = self.clip.clip(x, y, w, h) else {
            return;
        };
        let stride = self.width as usize;
        for row in span.y..span.y + span.h {
            let start = row as usize * stride + span.x as usize;
            self.pixels[start..start + span.w as usize].fill(c);
        }
    }

    /// Palette index at screen position `(x, y)`; `None` off-screen.
    pub fn peek(&self, x: i32, y: i32) -> Option<u8> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[y as usize * self.width as usize + x as usize])
    }
}

// ---------------------------------------------------------------------------
// Blitting
// ---------------------------------------------------------------------------

impl Canvas {
    /// Copy frame `frame` of `bitmap` to world position `(x, y)`.
    pub fn blit(&mut self, bitmap: &Bitmap, x: f64, y: f64, frame: i64) {
        let (x, y) = self.camera.apply(x, y);
        self.blit_at(bitmap, x, y, frame);
    }

    /// Blit at screen coordinates that already include the camera.
    fn blit_at(&mut self, bitmap: &Bitmap, x: i32, y: i32, frame: i64) {
        let size = bitmap.width() as i32;
        let Some(span) = self.clip.clip(x, y, size, size) else {
            return;
        };
        let first_row = bitmap.frame_row(frame);
        let key = bitmap.key();
        let stride = self.width as usize;
        let (sx, w) = (span.src_x as usize, span.w as usize);

        for dy in 0..span.h {
            let src = &bitmap.row(first_row + (span.src_y + dy) as u32)[sx..sx + w];
            let start = (span.y + dy) as usize * stride + span.x as usize;
            let dst = &mut self.pixels[start..start + w];
            for (d, &s) in dst.iter_mut().zip(src) {
                if s != key {
                    *d = s;
                }
            }
        }
    }

    /// Draw `text` using `font` as a glyph sheet, one frame per character.
    /// Every byte advances the pen by one glyph width; bytes without a glyph
    /// are skipped.
    pub fn print(&mut self, font: &Bitmap, text: &[u8], x: f64, y: f64) {
        let (mut x, y) = self.camera.apply(x, y);
        let advance = font.width() as i32;
        for &byte in text {
            if (FIRST_GLYPH..=LAST_GLYPH).contains(&byte) {
                self.blit_at(font, x, y, (byte - FIRST_GLYPH) as i64);
            }
            x = x.saturating_add(advance);
        }
    }

    /// Draw every cell of `grid` as a frame of `tiles`, with the grid's
    /// top-left corner at world position `(x, y)`.
    pub fn draw_tilemap(&mut self, tiles: &Bitmap, grid: &TileGrid, x: f64, y: f64) {
        let (x, y) = self.camera.apply(x, y);
        let step = tiles.width() as i32;
        for (tx, ty, tile) in grid.cells() {
            let px = x.saturating_add(tx.saturating_mul(step));
            let py = y.saturating_add(ty.saturating_mul(step));
            self.blit_at(tiles, px, py, tile as i64);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas(w: i32, h: i32) -> Canvas {
        let palette = Palette::new((0..16).map(|i| [i * 16, i * 16, i * 16]).collect()).unwrap();
        Canvas::new(w, h, palette)
    }

    /// A 2x4 bitmap with two frames: frame 0 is all 1s except a transparent
    /// 0 in the corner, frame 1 is all 2s.
    fn two_frames() -> Bitmap {
        Bitmap::new(2, 4, vec![0, 1, 1, 1, 2, 2, 2, 2], 0).unwrap()
    }

    #[test]
    fn test_fill_wraps_color_by_palette_size() {
        let mut c = canvas(4, 4);
        c.fill(17);
        assert!(c.pixels().iter().all(|&p| p == 1));
    }

    #[test]
    fn test_fill_rect_respects_clip_and_camera() {
        let mut c = canvas(8, 8);
        c.set_clip(0, 0, 4, 4);
        c.set_camera(1.0, 1.0);
        c.fill_rect(5, 0.0, 0.0, 8, 8);
        assert_eq!(c.peek(0, 0), Some(0));
        assert_eq!(c.peek(1, 1), Some(5));
        assert_eq!(c.peek(3, 3), Some(5));
        assert_eq!(c.peek(4, 4), Some(0));
    }

    #[test]
    fn test_fill_rect_with_negative_size_is_noop() {
        let mut c = canvas(4, 4);
        c.fill_rect(3, 1.0, 1.0, -2, 2);
        assert!(c.pixels().iter().all(|&p| p == 0));
    }

    #[test]
    fn test_peek_out_of_bounds_is_none() {
        let c = canvas(4, 4);
        for (x, y) in [(-1, 0), (0, -1), (4, 0), (0, 4), (i32::MIN, i32::MAX)] {
            assert_eq!(c.peek(x, y), None);
        }
    }

    #[test]
    fn test_clip_round_trips_logical_rect() {
        let mut c = canvas(16, 16);
        c.set_clip(2, 3, 4, 5);
        assert_eq!(c.clip(), Rect { x: 2, y: 3, w: 4, h: 5 });
        c.set_clip(-5, -5, 100, 100);
        assert_eq!(c.clip(), Rect { x: -5, y: -5, w: 100, h: 100 });
        assert_eq!(c.clip_region(), ClipRegion::full(16, 16));
    }

    #[test]
    fn test_reset_clip_restores_full_canvas() {
        let mut c = canvas(6, 4);
        assert_eq!(c.clip(), Rect { x: 0, y: 0, w: 6, h: 4 });
        c.set_clip(1, 1, 0, 2);
        c.fill_rect(3, 0.0, 0.0, 6, 4);
        assert!(c.pixels().iter().all(|&p| p == 0));

        c.reset_clip();
        assert_eq!(c.clip(), Rect { x: 0, y: 0, w: 6, h: 4 });
        assert_eq!(c.clip_region(), ClipRegion::full(6, 4));
        c.fill_rect(3, 0.0, 0.0, 6, 4);
        assert!(c.pixels().iter().all(|&p| p == 3));
    }

    #[test]
    fn test_blit_skips_transparent_pixels() {
        let mut c = canvas(4, 4);
        c.fill(9);
        c.blit(&two_frames(), 0.0, 0.0, 0);
        assert_eq!(c.peek(0, 0), Some(9));
        assert_eq!(c.peek(1, 0), Some(1));
        assert_eq!(c.peek(0, 1), Some(1));
        assert_eq!(c.peek(2, 0), Some(9));
    }

    #[test]
    fn test_blit_selects_frame() {
        let mut c = canvas(4, 4);
        c.blit(&two_frames(), 1.0, 1.0, 1);
        assert_eq!(c.peek(1, 1), Some(2));
        assert_eq!(c.peek(2, 2), Some(2));
        assert_eq!(c.peek(3, 3), Some(0));
    }

    #[test]
    fn test_blit_partially_offscreen_copies_visible_span() {
        let mut c = canvas(4, 4);
        c.blit(&two_frames(), -1.0, 3.0, 1);
        assert_eq!(c.peek(0, 3), Some(2));
        assert_eq!(c.peek(1, 3), Some(0));
        assert_eq!(c.pixels().iter().filter(|&&p| p != 0).count(), 1);
    }

    #[test]
    fn test_blit_outside_clip_writes_nothing() {
        let mut c = canvas(8, 8);
        c.set_clip(0, 0, 4, 4);
        let bmp = two_frames();
        for (x, y) in [(4.0, 0.0), (0.0, 4.0), (-2.0, 0.0), (6.0, 6.0)] {
            c.blit(&bmp, x, y, 1);
        }
        assert!(c.pixels().iter().all(|&p| p == 0));
    }

    #[test]
    fn test_blit_frame_wraps_in_both_directions() {
        let bmp = two_frames();
        for frame in -5..5 {
            let mut a = canvas(4, 4);
            let mut b = canvas(4, 4);
            a.blit(&bmp, 1.0, 1.0, frame);
            b.blit(&bmp, 1.0, 1.0, frame + bmp.frame_count() as i64);
            assert_eq!(a.pixels(), b.pixels(), "frame {frame}");
        }
    }

    #[test]
    fn test_print_advances_for_every_byte() {
        // Font with glyphs for '!' (frame 0) and '"' (frame 1).
        let font = Bitmap::new(1, 2, vec![3, 4], 0).unwrap();
        let mut c = canvas(4, 1);
        c.print(&font, b"! \"", 0.0, 0.0);
        assert_eq!(c.pixels(), &[3, 0, 4, 0]);
    }

    #[test]
    fn test_print_high_bytes_take_one_cell() {
        let font = Bitmap::new(1, 2, vec![3, 4], 0).unwrap();
        let mut c = canvas(4, 1);
        c.print(&font, &[200, b'!', 0xFF, b'"'], 0.0, 0.0);
        assert_eq!(c.pixels(), &[0, 3, 0, 4]);
    }

    #[test]
    fn test_draw_tilemap_steps_by_tile_width() {
        let tiles = two_frames();
        let mut grid = TileGrid::new(2, 1);
        grid.set(0, 0, 1);
        grid.set(1, 0, -1);
        let mut c = canvas(4, 2);
        c.draw_tilemap(&tiles, &grid, 0.0, 0.0);
        assert_eq!(c.pixels(), &[2, 2, 2, 2, 2, 2, 2, 2]);
    }
}
