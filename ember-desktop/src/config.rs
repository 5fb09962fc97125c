//! Startup configuration read from script globals.
//!
//! Every value is taken exactly once: the global is read, then set to `nil`,
//! so scripts can't come to depend on startup-only settings at runtime.
//! `WIDTH` and `HEIGHT` are published again afterwards since scripts use them
//! for layout.

use std::path::PathBuf;

use mlua::prelude::*;

use ember_core::config::{
    Config, ImageSpec, SoundSpec, DEFAULT_FPS, DEFAULT_HEIGHT, DEFAULT_SCALE, DEFAULT_TITLE,
    DEFAULT_WIDTH,
};
use ember_core::error::ConfigError;
use ember_core::Palette;

/// Read global `name` and clear it.
pub fn take_global(lua: &Lua, name: &str) -> LuaResult<LuaValue> {
    let globals = lua.globals();
    let value: LuaValue = globals.get(name)?;
    globals.set(name, LuaValue::Nil)?;
    Ok(value)
}

fn expected(name: &'static str, what: &str, got: &LuaValue) -> ConfigError {
    ConfigError::invalid(name, format!("{what} expected, got {}", got.type_name()))
}

fn number(name: &'static str, value: &LuaValue) -> Result<f64, ConfigError> {
    match value {
        LuaValue::Integer(n) => Ok(*n as f64),
        LuaValue::Number(n) => Ok(*n),
        other => Err(expected(name, "number", other)),
    }
}

fn take(lua: &Lua, name: &'static str) -> Result<LuaValue, ConfigError> {
    take_global(lua, name).map_err(|e| ConfigError::invalid(name, e.to_string()))
}

/// Take a number, falling back to `default` when unset.
pub fn take_number(lua: &Lua, name: &'static str, default: f64) -> Result<f64, ConfigError> {
    match take(lua, name)? {
        LuaValue::Nil => Ok(default),
        value => number(name, &value),
    }
}

pub fn take_string(lua: &Lua, name: &'static str, default: &str) -> Result<String, ConfigError> {
    match take(lua, name)? {
        LuaValue::Nil => Ok(default.to_string()),
        LuaValue::String(s) => Ok(s.to_string_lossy().to_string()),
        other => Err(expected(name, "string", &other)),
    }
}

/// Any value other than `nil` or `false` counts as set.
pub fn take_flag(lua: &Lua, name: &'static str) -> Result<bool, ConfigError> {
    Ok(!matches!(
        take(lua, name)?,
        LuaValue::Nil | LuaValue::Boolean(false)
    ))
}

fn take_table(lua: &Lua, name: &'static str) -> Result<Option<LuaTable>, ConfigError> {
    match take(lua, name)? {
        LuaValue::Nil => Ok(None),
        LuaValue::Table(t) => Ok(Some(t)),
        other => Err(expected(name, "table", &other)),
    }
}

/// Field `key`, or positional entry `index` when the key is absent.
fn field(table: &LuaTable, key: &str, index: i64) -> LuaResult<LuaValue> {
    match table.get::<LuaValue>(key)? {
        LuaValue::Nil => table.get::<LuaValue>(index),
        value => Ok(value),
    }
}

/// `COLORS = { {r, g, b}, ... }`, required.
fn take_palette(lua: &Lua) -> Result<Palette, ConfigError> {
    const NAME: &str = "COLORS";
    let Some(list) = take_table(lua, NAME)? else {
        return Err(ConfigError::Missing { name: NAME });
    };
    let mut colors = Vec::new();
    for entry in list.sequence_values::<LuaValue>() {
        let entry = entry.map_err(|e| ConfigError::invalid(NAME, e.to_string()))?;
        let LuaValue::Table(rgb) = entry else {
            return Err(expected(NAME, "{r, g, b} table", &entry));
        };
        let mut color = [0u8; 3];
        for (i, (channel, key)) in color.iter_mut().zip(["r", "g", "b"]).enumerate() {
            let value = field(&rgb, key, i as i64 + 1)
                .map_err(|e| ConfigError::invalid(NAME, e.to_string()))?;
            *channel = number(NAME, &value)?.clamp(0.0, 255.0) as u8;
        }
        colors.push(color);
    }
    Palette::new(colors)
}

/// Name/entry pairs of a resource table, sorted by name.
fn named_entries(table: LuaTable, name: &'static str) -> Result<Vec<(String, LuaTable)>, ConfigError> {
    let mut entries = Vec::new();
    for pair in table.pairs::<String, LuaValue>() {
        let (key, value) = pair.map_err(|e| ConfigError::invalid(name, e.to_string()))?;
        let LuaValue::Table(entry) = value else {
            return Err(ConfigError::invalid(
                name,
                format!("entry `{key}` must be a table, got {}", value.type_name()),
            ));
        };
        entries.push((key, entry));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

fn entry_file(name: &'static str, key: &str, entry: &LuaTable) -> Result<PathBuf, ConfigError> {
    match field(entry, "file", 1).map_err(|e| ConfigError::invalid(name, e.to_string()))? {
        LuaValue::String(s) => Ok(PathBuf::from(s.to_string_lossy().to_string())),
        other => Err(ConfigError::invalid(
            name,
            format!("entry `{key}` needs a file name, got {}", other.type_name()),
        )),
    }
}

fn entry_number(
    name: &'static str,
    entry: &LuaTable,
    key: &str,
    index: i64,
    default: f64,
) -> Result<f64, ConfigError> {
    match field(entry, key, index).map_err(|e| ConfigError::invalid(name, e.to_string()))? {
        LuaValue::Nil => Ok(default),
        value => number(name, &value),
    }
}

/// `IMAGES = { name = {file, transparent}, ... }`
fn take_images(lua: &Lua) -> Result<Vec<ImageSpec>, ConfigError> {
    const NAME: &str = "IMAGES";
    let Some(table) = take_table(lua, NAME)? else {
        return Ok(Vec::new());
    };
    named_entries(table, NAME)?
        .into_iter()
        .map(|(key, entry)| {
            let path = entry_file(NAME, &key, &entry)?;
            let transparent = entry_number(NAME, &entry, "transparent", 2, 0.0)?;
            Ok(ImageSpec {
                name: key,
                path,
                transparent: transparent.clamp(0.0, 255.0) as u8,
            })
        })
        .collect()
}

/// `SOUNDS = { name = {file, volume}, ... }` with volume in 0..=1.
fn take_sounds(lua: &Lua) -> Result<Vec<SoundSpec>, ConfigError> {
    const NAME: &str = "SOUNDS";
    let Some(table) = take_table(lua, NAME)? else {
        return Ok(Vec::new());
    };
    named_entries(table, NAME)?
        .into_iter()
        .map(|(key, entry)| {
            let path = entry_file(NAME, &key, &entry)?;
            let volume = entry_number(NAME, &entry, "volume", 2, 1.0)?;
            Ok(SoundSpec {
                name: key,
                path,
                volume: volume.clamp(0.0, 1.0),
            })
        })
        .collect()
}

/// Read, validate and clear every configuration global.
pub fn read_config(lua: &Lua) -> Result<Config, ConfigError> {
    let config = Config {
        debug: take_flag(lua, "DEBUG")?,
        width: take_number(lua, "WIDTH", DEFAULT_WIDTH as f64)? as i32,
        height: take_number(lua, "HEIGHT", DEFAULT_HEIGHT as f64)? as i32,
        scale: take_number(lua, "SCALE", DEFAULT_SCALE as f64)? as i32,
        fps: take_number(lua, "FPS", DEFAULT_FPS)?,
        title: take_string(lua, "TITLE", DEFAULT_TITLE)?,
        palette: take_palette(lua)?,
        images: take_images(lua)?,
        sounds: take_sounds(lua)?,
    };
    config.validate()?;

    let globals = lua.globals();
    let publish = |name: &'static str, value: i32| {
        globals
            .set(name, value)
            .map_err(|e| ConfigError::invalid(name, e.to_string()))
    };
    publish("WIDTH", config.width)?;
    publish("HEIGHT", config.height)?;

    log::debug!(
        "config: {}x{} x{} @ {} fps, {} colors, {} images, {} sounds",
        config.width,
        config.height,
        config.scale,
        config.fps,
        config.palette.len(),
        config.images.len(),
        config.sounds.len()
    );
    Ok(config)
}
