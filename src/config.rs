//! Configuration: `$HOME/.config/infinidesk/infinidesk.toml`.
//!
//! The file is created with defaults on first launch. Recognised keys
//! are `scale` (HiDPI output scale), `startup` (shell commands run once
//! after the socket is ready) and a `[keybinds]` table mapping chords
//! like `"super+shift+z"` to actions. An action is either
//! `exec:<command>` or one of the built-in names. Entries that fail to
//! parse are skipped with a warning; they never abort startup.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;
use xkbcommon::xkb;

pub const MOD_SHIFT: u8 = 1 << 0;
pub const MOD_CTRL: u8 = 1 << 1;
pub const MOD_ALT: u8 = 1 << 2;
pub const MOD_SUPER: u8 = 1 << 3;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Exec(String),
    CloseWindow,
    Exit,
    ToggleDrawing,
    ClearDrawings,
    Undo,
    Redo,
    Gather,
    Switcher,
}

#[derive(Debug, Clone)]
pub struct Keybind {
    /// Modifier bitmask (`MOD_*`) that must match exactly.
    pub mods: u8,
    /// Raw keysym the chord resolves to.
    pub keysym: u32,
    pub action: Action,
}

#[derive(Debug)]
pub struct Config {
    pub scale: f32,
    pub startup: Vec<String>,
    pub keybinds: Vec<Keybind>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine $HOME")]
    NoHome,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Error, PartialEq)]
pub enum BindParseError {
    #[error("empty chord")]
    EmptyChord,
    #[error("unknown key name {0:?}")]
    UnknownKey(String),
    #[error("unknown action {0:?}")]
    UnknownAction(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    scale: Option<f32>,
    startup: Option<Vec<String>>,
    keybinds: Option<HashMap<String, String>>,
}

const DEFAULT_KEYBINDS: &[(&str, &str)] = &[
    ("super+Return", "exec:alacritty"),
    ("super+q", "CloseWindow"),
    ("super+Escape", "Exit"),
    ("super+d", "ToggleDrawing"),
    ("super+shift+c", "ClearDrawings"),
    ("super+z", "Undo"),
    ("super+shift+z", "Redo"),
    ("super+g", "Gather"),
    ("alt+Tab", "Switcher"),
];

impl Config {
    pub fn path() -> Result<PathBuf, ConfigError> {
        let home = std::env::var_os("HOME").ok_or(ConfigError::NoHome)?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("infinidesk")
            .join("infinidesk.toml"))
    }

    /// Load the config file, writing the default one first if it does
    /// not exist yet.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, default_config_text())?;
        }
        let raw: RawConfig = toml::from_str(&fs::read_to_string(&path)?)?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawConfig) -> Self {
        let scale = match raw.scale {
            Some(s) if s > 0.0 => s,
            Some(s) => {
                warn!(scale = s, "ignoring non-positive output scale");
                1.0
            }
            None => 1.0,
        };

        let mut keybinds = Vec::new();
        let entries: Vec<(String, String)> = match raw.keybinds {
            Some(map) => map.into_iter().collect(),
            None => DEFAULT_KEYBINDS
                .iter()
                .map(|&(c, a)| (c.to_owned(), a.to_owned()))
                .collect(),
        };
        for (chord, action) in entries {
            match parse_keybind(&chord, &action) {
                Ok(bind) => keybinds.push(bind),
                Err(err) => warn!(%chord, %action, "skipping keybind: {err}"),
            }
        }

        Self {
            scale,
            startup: raw.startup.unwrap_or_default(),
            keybinds,
        }
    }

    /// Look up the action bound to a (modifier bitmask, keysym) chord.
    pub fn action_for(&self, mods: u8, keysym: u32) -> Option<&Action> {
        self.keybinds
            .iter()
            .find(|b| b.mods == mods && b.keysym == keysym)
            .map(|b| &b.action)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw(RawConfig::default())
    }
}

fn default_config_text() -> String {
    let mut text = String::from(
        "# Infinidesk configuration.\n\
         \n\
         # HiDPI output scale.\n\
         scale = 1.0\n\
         \n\
         # Shell commands run once after startup.\n\
         startup = []\n\
         \n\
         # Chords are modifier tokens (super, alt, ctrl, shift) joined\n\
         # with '+' and ending in an X keysym name. Actions are either\n\
         # \"exec:<command>\" or a built-in action name.\n\
         [keybinds]\n",
    );
    for (chord, action) in DEFAULT_KEYBINDS {
        text.push_str(&format!("\"{chord}\" = \"{action}\"\n"));
    }
    text
}

/// Parse `"super+shift+z"`-style chords. Modifier tokens are matched
/// case-insensitively; the final token is resolved as an X keysym name,
/// exact match first, case-insensitive as a fallback.
pub fn parse_keybind(chord: &str, action: &str) -> Result<Keybind, BindParseError> {
    let mut mods = 0u8;
    let mut key: Option<&str> = None;
    for token in chord.split('+').map(str::trim).filter(|t| !t.is_empty()) {
        match token.to_ascii_lowercase().as_str() {
            "super" | "logo" => mods |= MOD_SUPER,
            "alt" => mods |= MOD_ALT,
            "ctrl" | "control" => mods |= MOD_CTRL,
            "shift" => mods |= MOD_SHIFT,
            _ => key = Some(token),
        }
    }
    let key = key.ok_or(BindParseError::EmptyChord)?;

    let mut keysym = xkb::keysym_from_name(key, xkb::KEYSYM_NO_FLAGS);
    if keysym.raw() == 0 {
        keysym = xkb::keysym_from_name(key, xkb::KEYSYM_CASE_INSENSITIVE);
    }
    if keysym.raw() == 0 {
        return Err(BindParseError::UnknownKey(key.to_owned()));
    }

    Ok(Keybind {
        mods,
        keysym: keysym.raw(),
        action: parse_action(action)?,
    })
}

pub fn parse_action(action: &str) -> Result<Action, BindParseError> {
    if let Some(command) = action.strip_prefix("exec:") {
        return Ok(Action::Exec(command.trim().to_owned()));
    }
    match action.to_ascii_lowercase().as_str() {
        "closewindow" => Ok(Action::CloseWindow),
        "exit" => Ok(Action::Exit),
        "toggledrawing" => Ok(Action::ToggleDrawing),
        "cleardrawings" => Ok(Action::ClearDrawings),
        "undo" => Ok(Action::Undo),
        "redo" => Ok(Action::Redo),
        "gather" => Ok(Action::Gather),
        "switcher" => Ok(Action::Switcher),
        _ => Err(BindParseError::UnknownAction(action.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chord_parsing() {
        let bind = parse_keybind("super+shift+z", "Redo").unwrap();
        assert_eq!(bind.mods, MOD_SUPER | MOD_SHIFT);
        assert_eq!(bind.keysym, xkb::keysym_from_name("z", xkb::KEYSYM_NO_FLAGS).raw());
        assert_eq!(bind.action, Action::Redo);
    }

    #[test]
    fn modifier_tokens_are_case_insensitive() {
        let bind = parse_keybind("Super+CTRL+t", "Gather").unwrap();
        assert_eq!(bind.mods, MOD_SUPER | MOD_CTRL);
    }

    #[test]
    fn key_names_fall_back_to_case_insensitive() {
        // "return" only resolves with the case-insensitive lookup.
        let exact = parse_keybind("super+Return", "Exit").unwrap();
        let lower = parse_keybind("super+return", "Exit").unwrap();
        assert_eq!(exact.keysym, lower.keysym);
    }

    #[test]
    fn unknown_key_is_an_error() {
        assert!(matches!(
            parse_keybind("super+notakey", "Exit"),
            Err(BindParseError::UnknownKey(_))
        ));
    }

    #[test]
    fn exec_actions_keep_their_command() {
        let bind = parse_keybind("super+Return", "exec:alacritty -e htop").unwrap();
        assert_eq!(bind.action, Action::Exec("alacritty -e htop".into()));
    }

    #[test]
    fn unknown_action_is_an_error() {
        assert!(matches!(
            parse_action("fly"),
            Err(BindParseError::UnknownAction(_))
        ));
    }

    #[test]
    fn bad_entries_are_skipped_not_fatal() {
        let raw = RawConfig {
            scale: Some(-2.0),
            startup: None,
            keybinds: Some(HashMap::from([
                ("super+q".to_owned(), "CloseWindow".to_owned()),
                ("super+??".to_owned(), "Exit".to_owned()),
                ("super+x".to_owned(), "NotAnAction".to_owned()),
            ])),
        };
        let config = Config::from_raw(raw);
        assert_eq!(config.scale, 1.0);
        assert_eq!(config.keybinds.len(), 1);
        assert_eq!(config.keybinds[0].action, Action::CloseWindow);
    }

    #[test]
    fn default_config_text_round_trips() {
        let raw: RawConfig = toml::from_str(&default_config_text()).unwrap();
        let config = Config::from_raw(raw);
        assert_eq!(config.keybinds.len(), DEFAULT_KEYBINDS.len());
        assert!(config.startup.is_empty());
    }

    #[test]
    fn load_creates_the_default_file() {
        let home = tempfile::tempdir().unwrap();
        std::env::set_var("HOME", home.path());
        let config = Config::load().unwrap();
        assert!(home
            .path()
            .join(".config/infinidesk/infinidesk.toml")
            .exists());
        assert_eq!(config.keybinds.len(), DEFAULT_KEYBINDS.len());
        assert_eq!(config.scale, 1.0);
        // A second load parses the file the first one wrote.
        let again = Config::load().unwrap();
        assert_eq!(again.keybinds.len(), config.keybinds.len());
    }

    #[test]
    fn lookup_matches_exact_modifier_set() {
        let config = Config::default();
        let tab = xkb::keysym_from_name("Tab", xkb::KEYSYM_NO_FLAGS).raw();
        assert_eq!(config.action_for(MOD_ALT, tab), Some(&Action::Switcher));
        assert_eq!(config.action_for(MOD_ALT | MOD_SHIFT, tab), None);
    }
}
