mod assets;
mod audio_output;
mod config;
mod lua_api;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use macroquad::prelude::{
    clear_background, draw_texture_ex, get_keys_down, is_mouse_button_down, is_quit_requested,
    mouse_position, mouse_wheel, next_frame, prevent_quit, screen_height, screen_width,
    show_mouse, vec2, Conf, DrawTextureParams, FilterMode, Image, KeyCode, Texture2D, BLACK,
    WHITE,
};
use mlua::Lua;

use ember_core::audio::DEFAULT_SLOTS;
use ember_core::audio_queue;
use ember_core::config::Config;
use ember_core::input::{InputState, MouseButton, Viewport};
use ember_core::pacing::FramePacer;
use ember_core::Canvas;

use audio_output::AudioOutput;

/// Pending mixer commands the main thread may queue ahead of the audio thread.
const COMMAND_QUEUE: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "ember", about = "A tiny palette-indexed fantasy console", version)]
struct Args {
    /// Lua script to run; images, sounds and tilemaps load relative to it
    #[arg(default_value = "main.lua")]
    script: PathBuf,

    /// Override the script's SCALE
    #[arg(long)]
    scale: Option<i32>,

    /// Log the frame rate once a second (same as `DEBUG = true`)
    #[arg(long)]
    debug: bool,
}

/// Everything the frame loop needs, built before the window opens.
struct App {
    lua: Lua,
    config: Config,
    audio: AudioOutput,
}

fn boot(args: &Args) -> anyhow::Result<App> {
    let source = std::fs::read_to_string(&args.script)
        .with_context(|| format!("reading {}", args.script.display()))?;
    if let Some(dir) = args.script.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::env::set_current_dir(dir)
            .with_context(|| format!("entering {}", dir.display()))?;
    }
    let chunk_name = args
        .script
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main.lua".to_string());

    let lua = lua_api::create_lua()
        .map_err(lua_api::script_error)
        .context("creating Lua state")?;
    lua_api::load_script(&lua, &source, &chunk_name)
        .map_err(lua_api::script_error)
        .with_context(|| format!("running {chunk_name}"))?;

    let mut config = config::read_config(&lua).context("reading configuration")?;
    if let Some(scale) = args.scale {
        config.scale = scale;
    }
    config.debug |= args.debug;
    config.validate().context("applying command-line overrides")?;

    assets::install(&lua, &config)?;

    let (mixer, renderer) = audio_queue::channel(COMMAND_QUEUE, DEFAULT_SLOTS);
    let audio = AudioOutput::start(renderer).context("starting audio output")?;
    let canvas = Canvas::new(config.width, config.height, config.palette.clone());
    lua_api::install_runtime(&lua, canvas, mixer);

    lua_api::call_init(&lua)
        .map_err(lua_api::script_error)
        .context("running init()")?;
    log::info!(
        "{}: {}x{} at {} fps",
        config.title,
        config.width,
        config.height,
        config.fps
    );
    Ok(App { lua, config, audio })
}

fn window_conf(config: &Config) -> Conf {
    // Validated in `boot`; an overflowing size never gets this far.
    let (window_width, window_height) = config
        .window_size()
        .unwrap_or((config.width, config.height));
    Conf {
        window_title: config.title.clone(),
        window_width,
        window_height,
        window_resizable: true,
        ..Default::default()
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let app = match boot(&args) {
        Ok(app) => app,
        Err(e) => {
            log::error!("{e:#}");
            std::process::exit(1);
        }
    };
    macroquad::Window::from_config(window_conf(&app.config), run(app));
}

async fn run(app: App) {
    let App { lua, config, audio } = app;
    let (width, height) = (config.width, config.height);

    let mut frame = Image::gen_image_color(width as u16, height as u16, BLACK);
    let texture = Texture2D::from_image(&frame);
    texture.set_filter(FilterMode::Nearest); // Pixel-perfect scaling

    let mut pacer = FramePacer::new(config.fps);
    prevent_quit();
    show_mouse(false);
    if audio.is_silent() {
        log::debug!("audio is running without an output device");
    }

    let mut failed = false;
    loop {
        let viewport = Viewport::fit(screen_width() as i32, screen_height() as i32, width, height);
        poll_input(&lua, viewport, width, height);

        if let Err(e) = lua_api::call_step(&lua) {
            log::error!("step() failed: {e}");
            failed = true;
            break;
        }
        if lua_api::quit_requested(&lua) || is_quit_requested() {
            break;
        }

        present(&lua, &texture, &mut frame, viewport);
        if pacer.wait() && config.debug {
            log::info!("fps: {:.1}", pacer.fps());
        }
        next_frame().await;
    }

    if let Err(e) = lua_api::call_quit(&lua) {
        log::error!("quit() failed: {e}");
        failed = true;
    }
    drop(audio);
    if failed {
        std::process::exit(1);
    }
}

/// Copy this frame's keyboard and mouse state into the script's input.
fn poll_input(lua: &Lua, viewport: Viewport, width: i32, height: i32) {
    let Some(mut input) = lua.app_data_mut::<InputState>() else {
        return;
    };
    input.begin_frame();
    for code in get_keys_down() {
        input.press_key(&key_name(code));
    }
    for (button, ours) in [
        (macroquad::prelude::MouseButton::Left, MouseButton::Left),
        (macroquad::prelude::MouseButton::Middle, MouseButton::Middle),
        (macroquad::prelude::MouseButton::Right, MouseButton::Right),
    ] {
        if is_mouse_button_down(button) {
            input.press_button(ours);
        }
    }
    let (mx, my) = mouse_position();
    input.set_mouse_from_window(mx, my, viewport, width, height);
    let (_, wheel) = mouse_wheel();
    input.wheel = if wheel > 0.0 {
        1
    } else if wheel < 0.0 {
        -1
    } else {
        0
    };
}

/// Scripts name keys the way SDL does ("a", "space", "left shift", "return").
fn key_name(code: KeyCode) -> String {
    let name = match code {
        KeyCode::Key0 => "0",
        KeyCode::Key1 => "1",
        KeyCode::Key2 => "2",
        KeyCode::Key3 => "3",
        KeyCode::Key4 => "4",
        KeyCode::Key5 => "5",
        KeyCode::Key6 => "6",
        KeyCode::Key7 => "7",
        KeyCode::Key8 => "8",
        KeyCode::Key9 => "9",
        KeyCode::Enter => "return",
        KeyCode::LeftShift => "left shift",
        KeyCode::RightShift => "right shift",
        KeyCode::LeftControl => "left ctrl",
        KeyCode::RightControl => "right ctrl",
        KeyCode::LeftAlt => "left alt",
        KeyCode::RightAlt => "right alt",
        _ => return format!("{code:?}").to_ascii_lowercase(),
    };
    name.to_string()
}

/// Resolve the canvas through the palette and draw it letterboxed.
fn present(lua: &Lua, texture: &Texture2D, frame: &mut Image, viewport: Viewport) {
    if let Some(canvas) = lua.app_data_ref::<Canvas>() {
        canvas.to_rgba(&mut frame.bytes);
    }
    texture.update(frame);

    clear_background(BLACK);
    draw_texture_ex(
        texture,
        viewport.x as f32,
        viewport.y as f32,
        WHITE,
        DrawTextureParams {
            dest_size: Some(vec2(viewport.w as f32, viewport.h as f32)),
            ..Default::default()
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_names_follow_sdl() {
        assert_eq!(key_name(KeyCode::A), "a");
        assert_eq!(key_name(KeyCode::Space), "space");
        assert_eq!(key_name(KeyCode::Key7), "7");
        assert_eq!(key_name(KeyCode::Enter), "return");
        assert_eq!(key_name(KeyCode::LeftShift), "left shift");
        assert_eq!(key_name(KeyCode::Up), "up");
    }

    #[test]
    fn test_args_defaults_and_overrides() {
        let args = Args::parse_from(["ember"]);
        assert_eq!(args.script, PathBuf::from("main.lua"));
        assert!(args.scale.is_none() && !args.debug);

        let args = Args::parse_from(["ember", "games/pong.lua", "--scale", "4", "--debug"]);
        assert_eq!(args.script, PathBuf::from("games/pong.lua"));
        assert_eq!(args.scale, Some(4));
        assert!(args.debug);
    }

    #[test]
    fn test_window_matches_scaled_canvas() {
        let lua = Lua::new();
        lua.load("COLORS = { {0, 0, 0} } WIDTH, HEIGHT, SCALE, TITLE = 64, 32, 3, 'pong'")
            .exec()
            .unwrap();
        let config = config::read_config(&lua).unwrap();
        let conf = window_conf(&config);
        assert_eq!((conf.window_width, conf.window_height), (192, 96));
        assert_eq!(conf.window_title, "pong");
    }
}
