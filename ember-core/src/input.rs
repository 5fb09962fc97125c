use std::collections::HashSet;

/// Mouse buttons the script can query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// Input snapshot for the current frame, filled in by the platform layer.
#[derive(Clone, Debug, Default)]
pub struct InputState {
    /// Lower-cased names of keys held this frame.
    keys: HashSet<String>,
    buttons: HashSet<MouseButton>,
    /// Mouse position in canvas pixels.
    pub mouse_x: i32,
    pub mouse_y: i32,
    /// Wheel movement this frame.
    pub wheel: i32,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new frame: keys, buttons and wheel are re-polled.
    pub fn begin_frame(&mut self) {
        self.keys.clear();
        self.buttons.clear();
        self.wheel = 0;
    }

    pub fn press_key(&mut self, name: &str) {
        self.keys.insert(name.to_ascii_lowercase());
    }

    pub fn key(&self, name: &str) -> bool {
        self.keys.contains(&name.to_ascii_lowercase())
    }

    pub fn press_button(&mut self, button: MouseButton) {
        self.buttons.insert(button);
    }

    pub fn button(&self, button: MouseButton) -> bool {
        self.buttons.contains(&button)
    }

    /// Map a window position to canvas pixels, clamped to the canvas.
    pub fn set_mouse_from_window(
        &mut self,
        window_x: f32,
        window_y: f32,
        viewport: Viewport,
        width: i32,
        height: i32,
    ) {
        let scale = viewport.scale.max(1) as f32;
        let x = ((window_x - viewport.x as f32) / scale).floor() as i32;
        let y = ((window_y - viewport.y as f32) / scale).floor() as i32;
        self.mouse_x = x.clamp(0, width);
        self.mouse_y = y.clamp(0, height);
    }
}

/// Letterboxed placement of the scaled canvas inside the window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub scale: i32,
}

impl Viewport {
    /// Largest integer scale that fits, centered.
    pub fn fit(window_w: i32, window_h: i32, width: i32, height: i32) -> Self {
        let scale = (window_w / width.max(1)).min(window_h / height.max(1)).max(1);
        let w = width * scale;
        let h = height * scale;
        Viewport {
            x: (window_w - w) / 2,
            y: (window_h - h) / 2,
            w,
            h,
            scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_names_are_case_insensitive() {
        let mut input = InputState::new();
        input.press_key("Space");
        assert!(input.key("space"));
        assert!(input.key("SPACE"));
        input.begin_frame();
        assert!(!input.key("space"));
    }

    #[test]
    fn test_viewport_letterboxes_with_integer_scale() {
        let vp = Viewport::fit(300, 200, 64, 64);
        assert_eq!(vp, Viewport { x: 54, y: 4, w: 192, h: 192, scale: 3 });

        // Window smaller than the canvas still gets scale 1.
        let vp = Viewport::fit(32, 32, 64, 64);
        assert_eq!(vp.scale, 1);
    }

    #[test]
    fn test_mouse_is_clamped_to_canvas() {
        let mut input = InputState::new();
        let vp = Viewport::fit(300, 200, 64, 64);
        input.set_mouse_from_window(0.0, 199.0, vp, 64, 64);
        assert_eq!((input.mouse_x, input.mouse_y), (0, 64));
        input.set_mouse_from_window(90.0, 40.0, vp, 64, 64);
        assert_eq!((input.mouse_x, input.mouse_y), (12, 12));
    }
}
