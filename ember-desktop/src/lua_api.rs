//! Lua API layer for the ember fantasy console (desktop target).
//!
//! Registers the ember operation catalogue against an `mlua::Lua` state.
//! Canvas, mixer handle, input and game state are shared via
//! `Lua::set_app_data` / `app_data_mut`, so every `Lua` is an isolated
//! console instance.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use mlua::prelude::*;

use ember_core::audio::Sound;
use ember_core::audio_queue::MixerHandle;
use ember_core::canvas::Canvas;
use ember_core::game_state::GameState;
use ember_core::input::{InputState, MouseButton};
use ember_core::{Bitmap, TileGrid};

// ---------------------------------------------------------------------------
// Resource handles
// ---------------------------------------------------------------------------

/// Raised when a handle of the wrong kind is passed to an operation.
pub const UNEXPECTED_RESOURCE: &str = "unexpected resource type";

/// A loaded image (sprite sheet, font or tile set).
pub struct Image(pub Bitmap);

/// A mutable tile grid created by `tilemap(file)`.
pub struct Tilemap(pub TileGrid);

/// A decoded sound. The PCM is shared with any mixer slot playing it and is
/// freed once both the handle and the slots are gone.
#[derive(Clone)]
pub struct SoundHandle(pub Arc<Sound>);

impl LuaUserData for Image {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method("__tostring", |_, this, ()| {
            Ok(format!(
                "image({}x{}, {} frames)",
                this.0.width(),
                this.0.height(),
                this.0.frame_count()
            ))
        });
    }
}

impl LuaUserData for Tilemap {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method("__tostring", |_, this, ()| {
            Ok(format!("tilemap({}x{})", this.0.width(), this.0.height()))
        });
    }
}

impl LuaUserData for SoundHandle {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method("__tostring", |_, this, ()| {
            Ok(format!(
                "sound({} samples, volume {})",
                this.0.len(),
                this.0.volume()
            ))
        });
    }
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

/// Convert a Lua value to f64, coercing numeric strings the way Lua does.
fn val_to_f64(v: &LuaValue) -> Option<f64> {
    match v {
        LuaValue::Integer(n) => Some(*n as f64),
        LuaValue::Number(n) => Some(*n),
        LuaValue::String(s) => s.to_str().ok().and_then(|s| s.trim().parse::<f64>().ok()),
        _ => None,
    }
}

fn is_none(v: Option<&LuaValue>) -> bool {
    matches!(v, None | Some(LuaValue::Nil))
}

fn truthy(v: Option<&LuaValue>) -> bool {
    !matches!(v, None | Some(LuaValue::Nil) | Some(LuaValue::Boolean(false)))
}

fn bad_argument(n: usize, op: &str, expected: &str, got: Option<&LuaValue>) -> LuaError {
    let got = got.map_or("no value", |v| v.type_name());
    LuaError::runtime(format!(
        "bad argument #{} to '{op}' ({expected} expected, got {got})",
        n + 1
    ))
}

fn arg_f64(args: &LuaMultiValue, n: usize, op: &str) -> LuaResult<f64> {
    args.get(n)
        .and_then(val_to_f64)
        .ok_or_else(|| bad_argument(n, op, "number", args.get(n)))
}

fn arg_i32(args: &LuaMultiValue, n: usize, op: &str) -> LuaResult<i32> {
    arg_f64(args, n, op).map(|x| x.floor() as i32)
}

fn arg_i64(args: &LuaMultiValue, n: usize, op: &str) -> LuaResult<i64> {
    arg_f64(args, n, op).map(|x| x.floor() as i64)
}

fn opt_f64(args: &LuaMultiValue, n: usize, op: &str) -> LuaResult<Option<f64>> {
    if is_none(args.get(n)) {
        Ok(None)
    } else {
        arg_f64(args, n, op).map(Some)
    }
}

/// Raw bytes of a string argument. Numbers are accepted and formatted.
fn arg_bytes(args: &LuaMultiValue, n: usize, op: &str) -> LuaResult<Vec<u8>> {
    match args.get(n) {
        Some(LuaValue::String(s)) => Ok(s.as_bytes().to_vec()),
        Some(v @ (LuaValue::Integer(_) | LuaValue::Number(_))) => {
            Ok(val_to_display(v)?.into_bytes())
        }
        v => Err(bad_argument(n, op, "string", v)),
    }
}

fn arg_str(args: &LuaMultiValue, n: usize, op: &str) -> LuaResult<String> {
    arg_bytes(args, n, op).map(|b| String::from_utf8_lossy(&b).into_owned())
}

/// Borrow argument `n` as a handle of type `T`.
fn resource<T: LuaUserData + 'static>(
    args: &LuaMultiValue,
    n: usize,
    op: &str,
) -> LuaResult<LuaUserDataRef<T>> {
    match args.get(n) {
        Some(LuaValue::UserData(ud)) => ud
            .borrow::<T>()
            .map_err(|_| LuaError::runtime(UNEXPECTED_RESOURCE)),
        v => Err(bad_argument(n, op, "resource", v)),
    }
}

fn resource_mut<T: LuaUserData + 'static>(
    args: &LuaMultiValue,
    n: usize,
    op: &str,
) -> LuaResult<LuaUserDataRefMut<T>> {
    match args.get(n) {
        Some(LuaValue::UserData(ud)) => ud
            .borrow_mut::<T>()
            .map_err(|_| LuaError::runtime(UNEXPECTED_RESOURCE)),
        v => Err(bad_argument(n, op, "resource", v)),
    }
}

/// `(width, height)` of an image or tilemap handle.
fn resource_size(args: &LuaMultiValue, n: usize, op: &str) -> LuaResult<(i64, i64)> {
    let Some(LuaValue::UserData(ud)) = args.get(n) else {
        return Err(bad_argument(n, op, "resource", args.get(n)));
    };
    if let Ok(image) = ud.borrow::<Image>() {
        return Ok((image.0.width() as i64, image.0.height() as i64));
    }
    if let Ok(map) = ud.borrow::<Tilemap>() {
        return Ok((map.0.width() as i64, map.0.height() as i64));
    }
    Err(LuaError::runtime(UNEXPECTED_RESOURCE))
}

/// Whole floats print without a fractional part.
fn val_to_display(v: &LuaValue) -> LuaResult<String> {
    match v {
        LuaValue::String(s) => Ok(String::from_utf8_lossy(&s.as_bytes()).into_owned()),
        LuaValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Ok(format!("{}", *n as i64)),
        _ => v.to_string(),
    }
}

/// Integral results come back as Lua integers.
fn number_value(x: f64) -> LuaValue {
    if x.fract() == 0.0 && x.abs() < 9.0e15 {
        LuaValue::Integer(x as i64)
    } else {
        LuaValue::Number(x)
    }
}

/// Common error for a missing Canvas.
const CANVAS_ERR: &str = "Canvas not available";
/// Common error for a missing mixer handle.
const MIXER_ERR: &str = "Mixer not available";
const INPUT_ERR: &str = "Input not available";
const STATE_ERR: &str = "GameState not available";

/// Borrow the Canvas from Lua app_data (mutable).
macro_rules! get_canvas_mut {
    ($lua:expr) => {
        $lua.app_data_mut::<Canvas>()
            .ok_or_else(|| LuaError::runtime(CANVAS_ERR))
    };
}

/// Borrow the Canvas from Lua app_data (read-only).
macro_rules! get_canvas_ref {
    ($lua:expr) => {
        $lua.app_data_ref::<Canvas>()
            .ok_or_else(|| LuaError::runtime(CANVAS_ERR))
    };
}

/// Borrow the mixer command handle from Lua app_data.
macro_rules! get_mixer_mut {
    ($lua:expr) => {
        $lua.app_data_mut::<MixerHandle>()
            .ok_or_else(|| LuaError::runtime(MIXER_ERR))
    };
}

macro_rules! get_input_ref {
    ($lua:expr) => {
        $lua.app_data_ref::<InputState>()
            .ok_or_else(|| LuaError::runtime(INPUT_ERR))
    };
}

macro_rules! get_state_mut {
    ($lua:expr) => {
        $lua.app_data_mut::<GameState>()
            .ok_or_else(|| LuaError::runtime(STATE_ERR))
    };
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Create a Lua state with the whole ember catalogue registered.
///
/// `GameState` and `InputState` are installed here; the Canvas and the mixer
/// handle depend on configuration and are installed later with
/// [`install_runtime`].
pub fn create_lua() -> LuaResult<Lua> {
    let lua = Lua::new();

    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    lua.set_app_data(GameState::with_seed(seed));
    lua.set_app_data(InputState::new());

    let globals = lua.globals();
    globals.set("PI", std::f64::consts::PI)?;
    globals.set("HUGE", f64::INFINITY)?;

    register_misc(&lua)?;
    register_graphics(&lua)?;
    register_tilemap(&lua)?;
    register_sound(&lua)?;
    register_input(&lua)?;
    register_math(&lua)?;
    register_string(&lua)?;

    Ok(lua)
}

/// Hand the configured canvas and mixer handle to the script side.
pub fn install_runtime(lua: &Lua, canvas: Canvas, mixer: MixerHandle) {
    lua.set_app_data(canvas);
    lua.set_app_data(mixer);
}

/// Execute the main script chunk.
pub fn load_script(lua: &Lua, source: &str, name: &str) -> LuaResult<()> {
    lua.load(source).set_name(name).exec()
}

/// Carry a script error into the frontend's error chain.
///
/// `mlua::Error` is not `Send + Sync` without mlua's `send` feature, so it is
/// flattened to its message here.
pub fn script_error(e: LuaError) -> anyhow::Error {
    anyhow::anyhow!("{e}")
}

/// Call `init()` if the script defines it.
pub fn call_init(lua: &Lua) -> LuaResult<()> {
    call_handler(lua, "init")
}

/// Call `step()` if it exists, then run one incremental collector step.
pub fn call_step(lua: &Lua) -> LuaResult<()> {
    call_handler(lua, "step")?;
    collect_garbage(lua)
}

/// Call `quit()` if the script defines it.
pub fn call_quit(lua: &Lua) -> LuaResult<()> {
    call_handler(lua, "quit")
}

/// Whether the script has called `exit()`.
pub fn quit_requested(lua: &Lua) -> bool {
    lua.app_data_ref::<GameState>()
        .map(|gs| gs.quit_requested())
        .unwrap_or(false)
}

/// One incremental collection step; releases unreachable handles.
pub fn collect_garbage(lua: &Lua) -> LuaResult<()> {
    lua.gc_step()?;
    Ok(())
}

fn call_handler(lua: &Lua, name: &str) -> LuaResult<()> {
    if let Ok(func) = lua.globals().get::<LuaFunction>(name) {
        func.call::<()>(())?;
    }
    Ok(())
}

// ===========================================================================
//  Misc
// ===========================================================================

fn register_misc(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    globals.set("exit", lua.create_function(|lua, ()| {
        get_state_mut!(lua)?.request_quit();
        Ok(())
    })?)?;

    globals.set("time", lua.create_function(|lua, ()| {
        let gs = lua.app_data_ref::<GameState>()
            .ok_or_else(|| LuaError::runtime(STATE_ERR))?;
        Ok(gs.elapsed().as_secs_f64())
    })?)?;

    // each(n, fn) calls fn(0) .. fn(n - 1); each(list, fn) calls fn(item).
    globals.set("each", lua.create_function(|_lua, args: LuaMultiValue| {
        let func = match args.get(1) {
            Some(LuaValue::Function(f)) => f.clone(),
            v => return Err(bad_argument(1, "each", "function", v)),
        };
        match args.get(0) {
            Some(LuaValue::Table(list)) => {
                for item in list.clone().sequence_values::<LuaValue>() {
                    func.call::<()>(item?)?;
                }
            }
            _ => {
                let n = arg_i64(&args, 0, "each")?;
                for i in 0..n {
                    func.call::<()>(i)?;
                }
            }
        }
        Ok(())
    })?)?;

    globals.set("random", lua.create_function(|lua, args: LuaMultiValue| {
        let lo = opt_f64(&args, 0, "random")?;
        let hi = opt_f64(&args, 1, "random")?;
        let mut gs = get_state_mut!(lua)?;
        Ok(gs.random_range(lo, hi))
    })?)?;

    Ok(())
}

// ===========================================================================
//  Graphics
// ===========================================================================

fn register_graphics(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    // fill(c) clears the screen; fill(c, x, y, w, h) fills a clipped rect.
    globals.set("fill", lua.create_function(|lua, args: LuaMultiValue| {
        let color = arg_i64(&args, 0, "fill")?;
        if is_none(args.get(1)) {
            get_canvas_mut!(lua)?.fill(color);
            return Ok(());
        }
        let x = arg_f64(&args, 1, "fill")?;
        let y = arg_f64(&args, 2, "fill")?;
        let w = arg_i32(&args, 3, "fill")?;
        let h = arg_i32(&args, 4, "fill")?;
        get_canvas_mut!(lua)?.fill_rect(color, x, y, w, h);
        Ok(())
    })?)?;

    globals.set("peek", lua.create_function(|lua, args: LuaMultiValue| {
        let x = arg_i32(&args, 0, "peek")?;
        let y = arg_i32(&args, 1, "peek")?;
        let canvas = get_canvas_ref!(lua)?;
        Ok(canvas.peek(x, y))
    })?)?;

    // draw(x, y, image, frame | text | tilemap)
    globals.set("draw", lua.create_function(|lua, args: LuaMultiValue| {
        let x = arg_f64(&args, 0, "draw")?;
        let y = arg_f64(&args, 1, "draw")?;
        let image = resource::<Image>(&args, 2, "draw")?;
        match args.get(3) {
            Some(LuaValue::String(s)) => {
                let text = s.as_bytes();
                get_canvas_mut!(lua)?.print(&image.0, &text, x, y);
            }
            Some(LuaValue::UserData(ud)) => {
                let map = ud
                    .borrow::<Tilemap>()
                    .map_err(|_| LuaError::runtime(UNEXPECTED_RESOURCE))?;
                get_canvas_mut!(lua)?.draw_tilemap(&image.0, &map.0, x, y);
            }
            _ => {
                let frame = arg_i64(&args, 3, "draw")?;
                get_canvas_mut!(lua)?.blit(&image.0, x, y, frame);
            }
        }
        Ok(())
    })?)?;

    // clip() returns {x, y, w, h}; clip(x, y, w, h) sets it.
    globals.set("clip", lua.create_function(|lua, args: LuaMultiValue| {
        if is_none(args.get(0)) {
            let r = get_canvas_ref!(lua)?.clip();
            let rect = lua.create_sequence_from([r.x, r.y, r.w, r.h])?;
            return Ok(LuaValue::Table(rect));
        }
        let x = arg_i32(&args, 0, "clip")?;
        let y = arg_i32(&args, 1, "clip")?;
        let w = arg_i32(&args, 2, "clip")?;
        let h = arg_i32(&args, 3, "clip")?;
        get_canvas_mut!(lua)?.set_clip(x, y, w, h);
        Ok(LuaValue::Nil)
    })?)?;

    // camera() returns x, y; camera(x, y) sets the offset.
    globals.set("camera", lua.create_function(|lua, args: LuaMultiValue| {
        if is_none(args.get(0)) {
            let cam = get_canvas_ref!(lua)?.camera();
            return (cam.x, cam.y).into_lua_multi(lua);
        }
        let x = arg_f64(&args, 0, "camera")?;
        let y = arg_f64(&args, 1, "camera")?;
        get_canvas_mut!(lua)?.set_camera(x, y);
        Ok(LuaMultiValue::new())
    })?)?;

    globals.set("width", lua.create_function(|lua, args: LuaMultiValue| {
        if is_none(args.get(0)) {
            return Ok(get_canvas_ref!(lua)?.width() as i64);
        }
        resource_size(&args, 0, "width").map(|(w, _)| w)
    })?)?;

    globals.set("height", lua.create_function(|lua, args: LuaMultiValue| {
        if is_none(args.get(0)) {
            return Ok(get_canvas_ref!(lua)?.height() as i64);
        }
        resource_size(&args, 0, "height").map(|(_, h)| h)
    })?)?;

    Ok(())
}

// ===========================================================================
//  Tilemaps
// ===========================================================================

fn register_tilemap(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    globals.set("tilemap", lua.create_function(|_lua, args: LuaMultiValue| {
        let path = arg_str(&args, 0, "tilemap")?;
        let grid = TileGrid::load(Path::new(&path)).map_err(LuaError::external)?;
        Ok(Tilemap(grid))
    })?)?;

    // tile(map, x, y) reads a cell; tile(map, x, y, v) writes it.
    globals.set("tile", lua.create_function(|_lua, args: LuaMultiValue| {
        let x = arg_i32(&args, 1, "tile")?;
        let y = arg_i32(&args, 2, "tile")?;
        let value = if is_none(args.get(3)) {
            None
        } else {
            Some(arg_i32(&args, 3, "tile")?)
        };
        let mut map = resource_mut::<Tilemap>(&args, 0, "tile")?;
        match value {
            None => Ok(Some(map.0.get(x, y))),
            Some(v) => {
                map.0.set(x, y, v);
                Ok(None)
            }
        }
    })?)?;

    Ok(())
}

// ===========================================================================
//  Audio
// ===========================================================================

fn register_sound(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    // play() resumes paused slots; play(sound, loop) starts or resumes one.
    globals.set("play", lua.create_function(|lua, args: LuaMultiValue| {
        if is_none(args.get(0)) {
            get_mixer_mut!(lua)?.resume();
            return Ok(());
        }
        let sound = resource::<SoundHandle>(&args, 0, "play")?.0.clone();
        let looping = truthy(args.get(1));
        get_mixer_mut!(lua)?.play(sound, looping);
        Ok(())
    })?)?;

    globals.set("stop", lua.create_function(|lua, args: LuaMultiValue| {
        let sound = if is_none(args.get(0)) {
            None
        } else {
            Some(resource::<SoundHandle>(&args, 0, "stop")?.0.clone())
        };
        get_mixer_mut!(lua)?.stop(sound);
        Ok(())
    })?)?;

    globals.set("pause", lua.create_function(|lua, args: LuaMultiValue| {
        let sound = if is_none(args.get(0)) {
            None
        } else {
            Some(resource::<SoundHandle>(&args, 0, "pause")?.0.clone())
        };
        get_mixer_mut!(lua)?.pause(sound);
        Ok(())
    })?)?;

    globals.set("mute", lua.create_function(|lua, args: LuaMultiValue| {
        get_mixer_mut!(lua)?.mute(truthy(args.get(0)));
        Ok(())
    })?)?;

    Ok(())
}

// ===========================================================================
//  Input
// ===========================================================================

fn register_input(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    globals.set("key", lua.create_function(|lua, args: LuaMultiValue| {
        let name = arg_str(&args, 0, "key")?;
        let input = get_input_ref!(lua)?;
        Ok(input.key(&name))
    })?)?;

    // mouse("left" | "middle" | "right" | "wheel" | "x" | "y"); only the
    // first letter matters.
    globals.set("mouse", lua.create_function(|lua, args: LuaMultiValue| {
        let which = arg_bytes(&args, 0, "mouse")?;
        let input = get_input_ref!(lua)?;
        let value = match which.first().map(u8::to_ascii_lowercase) {
            Some(b'l') => LuaValue::Boolean(input.button(MouseButton::Left)),
            Some(b'm') => LuaValue::Boolean(input.button(MouseButton::Middle)),
            Some(b'r') => LuaValue::Boolean(input.button(MouseButton::Right)),
            Some(b'w') => LuaValue::Integer(input.wheel as i64),
            Some(b'x') => LuaValue::Integer(input.mouse_x as i64),
            Some(b'y') => LuaValue::Integer(input.mouse_y as i64),
            _ => LuaValue::Boolean(false),
        };
        Ok(value)
    })?)?;

    Ok(())
}

// ===========================================================================
//  Math (radians)
// ===========================================================================

fn sign(x: f64) -> f64 {
    if x < 0.0 {
        -1.0
    } else {
        1.0
    }
}

fn register_math(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    let unary: [(&'static str, fn(f64) -> f64); 5] = [
        ("sign", sign),
        ("abs", f64::abs),
        ("sin", f64::sin),
        ("cos", f64::cos),
        ("sqrt", f64::sqrt),
    ];
    for (name, f) in unary {
        globals.set(name, lua.create_function(move |_lua, args: LuaMultiValue| {
            Ok(f(arg_f64(&args, 0, name)?))
        })?)?;
    }

    let rounding: [(&'static str, fn(f64) -> f64); 3] = [
        ("floor", f64::floor),
        ("round", f64::round),
        ("ceil", f64::ceil),
    ];
    for (name, f) in rounding {
        globals.set(name, lua.create_function(move |_lua, args: LuaMultiValue| {
            Ok(number_value(f(arg_f64(&args, 0, name)?)))
        })?)?;
    }

    globals.set("pow", lua.create_function(|_lua, args: LuaMultiValue| {
        let x = arg_f64(&args, 0, "pow")?;
        let y = arg_f64(&args, 1, "pow")?;
        Ok(x.powf(y))
    })?)?;

    globals.set("atan2", lua.create_function(|_lua, args: LuaMultiValue| {
        let y = arg_f64(&args, 0, "atan2")?;
        let x = arg_f64(&args, 1, "atan2")?;
        Ok(y.atan2(x))
    })?)?;

    globals.set("min", lua.create_function(|_lua, args: LuaMultiValue| {
        let mut m = arg_f64(&args, 0, "min")?;
        for i in 1..args.len() {
            m = m.min(arg_f64(&args, i, "min")?);
        }
        Ok(number_value(m))
    })?)?;

    globals.set("max", lua.create_function(|_lua, args: LuaMultiValue| {
        let mut m = arg_f64(&args, 0, "max")?;
        for i in 1..args.len() {
            m = m.max(arg_f64(&args, i, "max")?);
        }
        Ok(number_value(m))
    })?)?;

    Ok(())
}

// ===========================================================================
//  Strings (byte-oriented)
// ===========================================================================

fn register_string(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    globals.set("char", lua.create_function(|lua, args: LuaMultiValue| {
        let code = arg_i64(&args, 0, "char")?;
        lua.create_string([(code & 0xFF) as u8])
    })?)?;

    // Whole string must be a finite number, leading whitespace allowed;
    // else nil.
    globals.set("number", lua.create_function(|_lua, args: LuaMultiValue| {
        let text = arg_str(&args, 0, "number")?;
        Ok(text
            .trim_start()
            .parse::<f64>()
            .ok()
            .filter(|x| x.is_finite())
            .map(number_value))
    })?)?;

    globals.set("string", lua.create_function(|lua, args: LuaMultiValue| {
        let mut out = String::new();
        for v in args.iter() {
            out.push_str(&val_to_display(v)?);
        }
        lua.create_string(&out)
    })?)?;

    globals.set("strlen", lua.create_function(|_lua, args: LuaMultiValue| {
        Ok(arg_bytes(&args, 0, "strlen")?.len())
    })?)?;

    // ascii(s, i) is the byte at zero-based index i, wrapping around.
    globals.set("ascii", lua.create_function(|_lua, args: LuaMultiValue| {
        let bytes = arg_bytes(&args, 0, "ascii")?;
        let index = if is_none(args.get(1)) {
            0
        } else {
            arg_i64(&args, 1, "ascii")?
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(bytes[index.rem_euclid(bytes.len() as i64) as usize]))
    })?)?;

    // substr(s, start, len): zero-based; a negative start counts from the end.
    globals.set("substr", lua.create_function(|lua, args: LuaMultiValue| {
        let bytes = arg_bytes(&args, 0, "substr")?;
        let start = arg_i64(&args, 1, "substr")?;
        let len = arg_i64(&args, 2, "substr")?;
        let total = bytes.len() as i64;
        let start = if start < 0 { total + start } else { start }.clamp(0, total);
        let len = len.clamp(0, total - start);
        lua.create_string(&bytes[start as usize..(start + len) as usize])
    })?)?;

    Ok(())
}

// ===========================================================================
//  Integration tests: run script snippets against a wired-up state
// ===========================================================================

#[cfg(test)]
mod integration_tests {
    use super::*;
    use ember_core::audio::MAX_VOLUME;
    use ember_core::audio_queue::{self, AudioRenderer};
    use ember_core::Palette;

    // -----------------------------------------------------------------
    // Helper: a Lua state with a small canvas and a mixer channel whose
    // renderer stays on the test side so queued commands can be checked.
    // -----------------------------------------------------------------

    struct TestHarness {
        lua: Lua,
        renderer: AudioRenderer,
    }

    impl TestHarness {
        fn new(width: i32, height: i32) -> Self {
            let lua = create_lua().expect("create_lua failed");
            let palette = Palette::new(vec![[0, 0, 0], [255, 0, 0], [0, 255, 0], [0, 0, 255]])
                .expect("palette");
            let (handle, renderer) = audio_queue::channel(64, 4);
            install_runtime(&lua, Canvas::new(width, height, palette), handle);
            TestHarness { lua, renderer }
        }

        fn exec(&self, code: &str) {
            self.lua
                .load(code)
                .exec()
                .unwrap_or_else(|e| panic!("Lua exec failed for `{code}`: {e}"));
        }

        fn eval<T: mlua::FromLua>(&self, expr: &str) -> T {
            self.lua
                .load(format!("return {expr}"))
                .eval::<T>()
                .unwrap_or_else(|e| panic!("Lua eval failed for `{expr}`: {e}"))
        }

        fn error(&self, code: &str) -> String {
            match self.lua.load(code).exec() {
                Ok(()) => panic!("expected `{code}` to fail"),
                Err(e) => e.to_string(),
            }
        }

        fn with_canvas<F, R>(&self, f: F) -> R
        where
            F: FnOnce(&Canvas) -> R,
        {
            let canvas = self.lua.app_data_ref::<Canvas>()
                .expect("Canvas missing from app_data");
            f(&canvas)
        }

        fn set_image(&self, name: &str, width: u32, height: u32, pixels: Vec<u8>) {
            let bitmap = Bitmap::new(width, height, pixels, 0).expect("bitmap");
            self.lua.globals().set(name, Image(bitmap)).expect("set image");
        }
    }

    impl Drop for TestHarness {
        fn drop(&mut self) {
            let _ = self.lua.remove_app_data::<Canvas>();
            let _ = self.lua.remove_app_data::<MixerHandle>();
        }
    }

    // =================================================================
    // Graphics
    // =================================================================

    #[test]
    fn test_fill_rect_then_peek() {
        let h = TestHarness::new(8, 8);
        h.exec("fill(0) fill(1, 2, 2, 4, 4)");
        assert_eq!(h.eval::<i64>("peek(3, 3)"), 1);
        assert_eq!(h.eval::<i64>("peek(0, 0)"), 0);
    }

    #[test]
    fn test_peek_out_of_range_is_nil() {
        let h = TestHarness::new(8, 8);
        assert!(h.eval::<bool>("peek(-1, 0) == nil"));
        assert!(h.eval::<bool>("peek(0, 8) == nil"));
    }

    #[test]
    fn test_clip_round_trip() {
        let h = TestHarness::new(16, 16);
        h.exec("clip(2, 3, 4, 5)");
        let rect: Vec<i64> = h.eval("clip()");
        assert_eq!(rect, vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_camera_returns_two_values() {
        let h = TestHarness::new(8, 8);
        h.exec("camera(3, -2)");
        let (x, y) = h.lua.load("return camera()").eval::<(f64, f64)>().unwrap();
        assert_eq!((x, y), (3.0, -2.0));
    }

    #[test]
    fn test_draw_frame_text_and_tilemap() {
        let h = TestHarness::new(4, 2);
        // 1x2 sheet: frame 0 is colour 2, frame 1 is colour 3.
        h.set_image("SHEET", 1, 2, vec![2, 3]);

        h.exec("draw(0, 0, SHEET, 1)");
        assert_eq!(h.eval::<i64>("peek(0, 0)"), 3);

        // '!' is frame 0, '"' is frame 1, the space only advances.
        h.exec("fill(0) draw(0, 1, SHEET, '! \"')");
        h.with_canvas(|c| assert_eq!(&c.pixels()[4..], &[2, 0, 3, 0]));

        // Bytes outside ASCII advance exactly one glyph.
        h.exec("fill(0) draw(0, 0, SHEET, char(200) .. '!')");
        h.with_canvas(|c| assert_eq!(&c.pixels()[..4], &[0, 2, 0, 0]));

        h.lua.globals().set("MAP", Tilemap(TileGrid::parse("2 1 1 0").unwrap())).unwrap();
        h.exec("fill(0) draw(2, 0, SHEET, MAP)");
        h.with_canvas(|c| assert_eq!(&c.pixels()[..4], &[0, 0, 3, 2]));
    }

    #[test]
    fn test_width_and_height() {
        let h = TestHarness::new(10, 6);
        h.set_image("SHEET", 2, 8, vec![1; 16]);
        assert_eq!(h.eval::<i64>("width()"), 10);
        assert_eq!(h.eval::<i64>("height()"), 6);
        assert_eq!(h.eval::<i64>("width(SHEET)"), 2);
        assert_eq!(h.eval::<i64>("height(SHEET)"), 8);
    }

    // =================================================================
    // Argument validation
    // =================================================================

    #[test]
    fn test_bad_argument_message() {
        let h = TestHarness::new(8, 8);
        let err = h.error("fill('red')");
        assert!(err.contains("bad argument #1 to 'fill' (number expected, got string)"), "{err}");
        let err = h.error("peek(1)");
        assert!(err.contains("bad argument #2 to 'peek' (number expected, got no value)"), "{err}");
    }

    #[test]
    fn test_wrong_handle_type_is_rejected() {
        let h = TestHarness::new(8, 8);
        h.lua.globals().set("MAP", Tilemap(TileGrid::new(1, 1))).unwrap();
        h.set_image("SHEET", 1, 1, vec![1]);
        assert!(h.error("draw(0, 0, MAP, 0)").contains(UNEXPECTED_RESOURCE));
        assert!(h.error("tile(SHEET, 0, 0)").contains(UNEXPECTED_RESOURCE));
        assert!(h.error("play(SHEET)").contains(UNEXPECTED_RESOURCE));
    }

    // =================================================================
    // Tilemaps
    // =================================================================

    #[test]
    fn test_tile_get_set_and_out_of_range() {
        let h = TestHarness::new(8, 8);
        h.lua.globals().set("MAP", Tilemap(TileGrid::new(2, 2))).unwrap();
        h.exec("tile(MAP, 1, 1, 7) tile(MAP, 5, 5, 9)");
        assert_eq!(h.eval::<i64>("tile(MAP, 1, 1)"), 7);
        assert_eq!(h.eval::<i64>("tile(MAP, 5, 5)"), 0);
    }

    #[test]
    fn test_tilemap_loads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("level.txt");
        std::fs::write(&path, "3 2\n1 2 3\n4 5").unwrap();
        let h = TestHarness::new(8, 8);
        h.lua.globals().set("PATH", path.to_string_lossy().to_string()).unwrap();
        h.exec("MAP = tilemap(PATH)");
        assert_eq!(h.eval::<i64>("width(MAP)"), 3);
        assert_eq!(h.eval::<i64>("tile(MAP, 2, 0)"), 3);
        assert_eq!(h.eval::<i64>("tile(MAP, 2, 1)"), 0);

        let err = h.error("tilemap('no/such/file.txt')");
        assert!(err.contains("no/such/file.txt"), "{err}");
    }

    // =================================================================
    // Audio
    // =================================================================

    #[test]
    fn test_play_stop_reach_renderer() {
        let mut h = TestHarness::new(8, 8);
        let sound = Arc::new(Sound::new(vec![5; 64], MAX_VOLUME));
        h.lua.globals().set("SND", SoundHandle(sound)).unwrap();

        h.exec("play(SND, true)");
        h.renderer.apply_pending();
        assert_eq!(h.renderer.mixer().active(), 1);
        assert!(h.renderer.mixer().slot(0).unwrap().is_looping());

        h.exec("pause(SND)");
        h.renderer.apply_pending();
        assert!(h.renderer.mixer().slot(0).unwrap().is_paused());

        h.exec("play() mute(true)");
        h.renderer.apply_pending();
        assert!(!h.renderer.mixer().slot(0).unwrap().is_paused());
        assert!(h.renderer.is_muted());

        h.exec("stop()");
        h.renderer.apply_pending();
        assert_eq!(h.renderer.mixer().active(), 0);
    }

    #[test]
    fn test_dropped_sound_handle_is_released() {
        let h = TestHarness::new(8, 8);
        let sound = Arc::new(Sound::new(vec![1; 8], MAX_VOLUME));
        let weak = Arc::downgrade(&sound);
        h.lua.globals().set("SND", SoundHandle(sound)).unwrap();
        h.exec("SND = nil");
        h.lua.gc_collect().unwrap();
        assert!(weak.upgrade().is_none());
    }

    // =================================================================
    // Input
    // =================================================================

    #[test]
    fn test_key_and_mouse() {
        let h = TestHarness::new(8, 8);
        {
            let mut input = h.lua.app_data_mut::<InputState>().unwrap();
            input.press_key("Left");
            input.press_button(MouseButton::Right);
            input.mouse_x = 3;
            input.mouse_y = 4;
            input.wheel = -1;
        }
        assert!(h.eval::<bool>("key('left')"));
        assert!(!h.eval::<bool>("key('space')"));
        assert!(h.eval::<bool>("mouse('right')"));
        assert!(!h.eval::<bool>("mouse('L')"));
        assert_eq!(h.eval::<i64>("mouse('x')"), 3);
        assert_eq!(h.eval::<i64>("mouse('Y')"), 4);
        assert_eq!(h.eval::<i64>("mouse('wheel')"), -1);
    }

    // =================================================================
    // Math and strings
    // =================================================================

    #[test]
    fn test_math_helpers() {
        let h = TestHarness::new(8, 8);
        assert_eq!(h.eval::<f64>("min(3, 1, 2)"), 1.0);
        assert_eq!(h.eval::<f64>("max(3, 1, 2)"), 3.0);
        assert_eq!(h.eval::<f64>("sign(-2)"), -1.0);
        assert_eq!(h.eval::<f64>("sign(0)"), 1.0);
        assert_eq!(h.eval::<i64>("floor(2.7)"), 2);
        assert_eq!(h.eval::<i64>("round(-2.5)"), -3);
        assert_eq!(h.eval::<i64>("ceil(2.1)"), 3);
        assert_eq!(h.eval::<f64>("pow(2, 10)"), 1024.0);
        assert!((h.eval::<f64>("atan2(1, 0)") - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!(h.eval::<bool>("HUGE > 1e308"));
    }

    #[test]
    fn test_string_helpers() {
        let h = TestHarness::new(8, 8);
        assert_eq!(h.eval::<String>("char(65)"), "A");
        assert_eq!(h.eval::<f64>("number('  12.5')"), 12.5);
        assert!(h.eval::<bool>("number('12x') == nil"));
        assert!(h.eval::<bool>("number('inf') == nil"));
        assert!(h.eval::<bool>("number('-infinity') == nil"));
        assert!(h.eval::<bool>("number('NaN') == nil"));
        assert_eq!(h.eval::<String>("string('a', 1, 2.5, 3.0)"), "a12.53");
        assert_eq!(h.eval::<i64>("strlen('hello')"), 5);
        assert_eq!(h.eval::<i64>("ascii('AB', 1)"), 66);
        assert_eq!(h.eval::<i64>("ascii('AB', 3)"), 66);
        assert_eq!(h.eval::<String>("substr('hello', 1, 3)"), "ell");
        assert_eq!(h.eval::<String>("substr('hello', -2, 10)"), "lo");
        assert_eq!(h.eval::<String>("substr('hi', 5, 1)"), "");
    }

    // =================================================================
    // Misc and handlers
    // =================================================================

    #[test]
    fn test_each_over_count_and_list() {
        let h = TestHarness::new(8, 8);
        h.exec("total = 0 each(4, function(i) total = total + i end)");
        assert_eq!(h.eval::<i64>("total"), 6);
        h.exec("s = '' each({'a', 'b'}, function(v) s = s .. v end)");
        assert_eq!(h.eval::<String>("s"), "ab");
    }

    #[test]
    fn test_random_ranges() {
        let h = TestHarness::new(8, 8);
        for _ in 0..50 {
            let x: f64 = h.eval("random(2, 4)");
            assert!((2.0..=4.0).contains(&x));
        }
    }

    #[test]
    fn test_handlers_and_exit() {
        let h = TestHarness::new(8, 8);
        load_script(
            &h.lua,
            "steps = 0\nfunction step() steps = steps + 1 if steps == 3 then exit() end end",
            "main.lua",
        )
        .unwrap();
        call_init(&h.lua).unwrap();
        while !quit_requested(&h.lua) {
            call_step(&h.lua).unwrap();
        }
        assert_eq!(h.eval::<i64>("steps"), 3);
        call_quit(&h.lua).unwrap();
    }

    #[test]
    fn test_missing_step_is_a_no_op() {
        let h = TestHarness::new(8, 8);
        call_step(&h.lua).unwrap();
        call_quit(&h.lua).unwrap();
    }

    #[test]
    fn test_step_error_propagates() {
        let h = TestHarness::new(8, 8);
        load_script(&h.lua, "function step() fill() end", "main.lua").unwrap();
        let err = call_step(&h.lua).unwrap_err().to_string();
        assert!(err.contains("bad argument #1 to 'fill'"), "{err}");
    }

    #[test]
    fn test_script_error_joins_context_chain() {
        use anyhow::Context;

        let lua = create_lua().unwrap();
        let err = load_script(&lua, "error('boom')", "main.lua")
            .map_err(script_error)
            .context("running main.lua")
            .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.starts_with("running main.lua: "), "{msg}");
        assert!(msg.contains("boom"), "{msg}");
    }

    #[test]
    fn test_tostring_describes_handles() {
        let h = TestHarness::new(8, 8);
        h.set_image("SHEET", 2, 4, vec![0; 8]);
        assert_eq!(h.eval::<String>("tostring(SHEET)"), "image(2x4, 2 frames)");
    }
}
