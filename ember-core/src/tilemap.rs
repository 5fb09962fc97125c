use std::path::Path;

use crate::error::ResourceError;

/// A mutable grid of tile indices, drawn by blitting each cell as a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileGrid {
    width: i32,
    height: i32,
    tiles: Vec<i32>,
}

impl TileGrid {
    /// A zero-filled grid. Negative sizes are treated as zero.
    pub fn new(width: i32, height: i32) -> Self {
        let width = width.max(0);
        let height = height.max(0);
        TileGrid {
            width,
            height,
            tiles: vec![0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    /// Tile at `(x, y)`, or 0 outside the grid.
    pub fn get(&self, x: i32, y: i32) -> i32 {
        self.index(x, y).map_or(0, |i| self.tiles[i])
    }

    /// Set the tile at `(x, y)`. Writes outside the grid are ignored.
    pub fn set(&mut self, x: i32, y: i32, tile: i32) {
        if let Some(i) = self.index(x, y) {
            self.tiles[i] = tile;
        }
    }

    /// Iterate `(x, y, tile)` in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32, i32)> + '_ {
        let w = self.width.max(1);
        self.tiles
            .iter()
            .enumerate()
            .map(move |(i, &t)| (i as i32 % w, i as i32 / w, t))
    }

    /// Parse the whitespace-separated `width height tile...` format.
    /// Missing trailing tiles stay zero; surplus tokens are ignored.
    pub fn parse(source: &str) -> Result<Self, String> {
        let mut tokens = source.split_whitespace();
        let mut dimension = |name: &str| -> Result<i32, String> {
            let token = tokens
                .next()
                .ok_or_else(|| format!("missing {name}"))?;
            let value = parse_number(token).ok_or_else(|| format!("{name} `{token}` is not a number"))?;
            if value < 0 {
                return Err(format!("{name} must not be negative, got {value}"));
            }
            Ok(value)
        };
        let width = dimension("width")?;
        let height = dimension("height")?;
        let mut grid = TileGrid::new(width, height);
        for (slot, token) in grid.tiles.iter_mut().zip(tokens) {
            *slot = parse_number(token).ok_or_else(|| format!("tile `{token}` is not a number"))?;
        }
        Ok(grid)
    }

    /// Read and parse a tilemap file.
    pub fn load(path: &Path) -> Result<Self, ResourceError> {
        let source = std::fs::read_to_string(path).map_err(|e| ResourceError::io(path, e))?;
        let grid = TileGrid::parse(&source).map_err(|reason| ResourceError::BadTilemap {
            path: path.to_path_buf(),
            reason,
        })?;
        log::debug!(
            "loaded tilemap {} ({}x{})",
            path.display(),
            grid.width,
            grid.height
        );
        Ok(grid)
    }
}

/// Tile files may contain `3` or `3.0`; both truncate to an integer.
fn parse_number(token: &str) -> Option<i32> {
    token
        .parse::<i32>()
        .ok()
        .or_else(|| token.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i32))
}
