// ============================================================================
// EDITOR SETTINGS — plain `key=value` file in the platform config directory
// ============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::components::history::HISTORY_LIMIT;
use crate::components::tools::Tool;
use crate::error::{EditorError, Result};
use crate::ops::generate::GenerationConfig;

// ═══════════════════════════════════════════════════════════════════════════
// KEYBINDINGS
// ═══════════════════════════════════════════════════════════════════════════

/// A key plus modifier flags. Letters are stored upper-case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyCombo {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub key: char,
}

impl KeyCombo {
    pub fn key(k: char) -> Self {
        Self { ctrl: false, shift: false, alt: false, key: k.to_ascii_uppercase() }
    }
    pub fn ctrl_key(k: char) -> Self {
        Self { ctrl: true, ..Self::key(k) }
    }
    pub fn ctrl_shift_key(k: char) -> Self {
        Self { ctrl: true, shift: true, ..Self::key(k) }
    }

    /// Same combo with the key case-folded, so `z` and `Z` match.
    pub fn normalized(self) -> Self {
        Self { key: self.key.to_ascii_uppercase(), ..self }
    }

    /// Serialize to config string, e.g. `ctrl+shift+Z`
    pub fn to_config_string(&self) -> String {
        let mut parts = Vec::new();
        if self.ctrl { parts.push("ctrl".to_string()); }
        if self.shift { parts.push("shift".to_string()); }
        if self.alt { parts.push("alt".to_string()); }
        parts.push(self.key.to_string());
        parts.join("+")
    }

    /// Deserialize from config string
    pub fn from_config_string(s: &str) -> Option<Self> {
        let (mut ctrl, mut shift, mut alt) = (false, false, false);
        let mut key = None;
        for part in s.split('+') {
            let part = part.trim();
            match part.to_ascii_lowercase().as_str() {
                "ctrl" | "cmd" => ctrl = true,
                "shift" => shift = true,
                "alt" => alt = true,
                _ => {
                    let mut chars = part.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => key = Some(c),
                        _ => return None,
                    }
                }
            }
        }
        Some(Self { ctrl, shift, alt, key: key? }.normalized())
    }
}

/// All bindable actions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindableAction {
    Undo,
    Redo,
    ToolMove,
    ToolBrush,
    ToolPencil,
    ToolEraser,
    ToolFill,
    ToolGradient,
    ToolColorPicker,
    ToolText,
    ToolShapes,
    ToolRectSelect,
    ToolLasso,
    ToolMagicWand,
    ToolCrop,
    ToolPan,
    ToolZoom,
    ToolCloneStamp,
    ToolDodge,
    SwapColors,
    SelectAll,
    Deselect,
}

impl BindableAction {
    pub fn all() -> &'static [BindableAction] {
        use BindableAction::*;
        &[
            Undo, Redo, ToolMove, ToolBrush, ToolPencil, ToolEraser, ToolFill, ToolGradient, ToolColorPicker,
            ToolText, ToolShapes, ToolRectSelect, ToolLasso, ToolMagicWand, ToolCrop, ToolPan, ToolZoom,
            ToolCloneStamp, ToolDodge, SwapColors, SelectAll, Deselect,
        ]
    }

    /// Config-file name (the variant name).
    pub fn name(&self) -> String {
        format!("{:?}", self)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|a| a.name() == name)
    }

    /// The tool this action selects, if it is a tool action.
    pub fn tool(&self) -> Option<Tool> {
        use BindableAction::*;
        Some(match self {
            Undo | Redo | SwapColors | SelectAll | Deselect => return None,
            ToolMove => Tool::Move,
            ToolBrush => Tool::Brush,
            ToolPencil => Tool::Pencil,
            ToolEraser => Tool::Eraser,
            ToolFill => Tool::Fill,
            ToolGradient => Tool::Gradient,
            ToolColorPicker => Tool::ColorPicker,
            ToolText => Tool::Text,
            ToolShapes => Tool::RectangleShape,
            ToolRectSelect => Tool::RectangleSelect,
            ToolLasso => Tool::Lasso,
            ToolMagicWand => Tool::MagicWand,
            ToolCrop => Tool::Crop,
            ToolPan => Tool::Pan,
            ToolZoom => Tool::Zoom,
            ToolCloneStamp => Tool::CloneStamp,
            ToolDodge => Tool::Dodge,
        })
    }
}

/// Keyboard shortcut table. An action may have several combos.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyBindings {
    pub bindings: HashMap<BindableAction, Vec<KeyCombo>>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        use BindableAction::*;
        let mut map = HashMap::new();
        map.insert(Undo,            vec![KeyCombo::ctrl_key('Z')]);
        map.insert(Redo,            vec![KeyCombo::ctrl_shift_key('Z'), KeyCombo::ctrl_key('Y')]);
        map.insert(ToolMove,        vec![KeyCombo::key('V')]);
        map.insert(ToolBrush,       vec![KeyCombo::key('B')]);
        map.insert(ToolPencil,      vec![KeyCombo::key('P')]);
        map.insert(ToolEraser,      vec![KeyCombo::key('E')]);
        map.insert(ToolFill,        vec![KeyCombo::key('F')]);
        map.insert(ToolGradient,    vec![KeyCombo::key('G')]);
        map.insert(ToolColorPicker, vec![KeyCombo::key('I')]);
        map.insert(ToolText,        vec![KeyCombo::key('T')]);
        map.insert(ToolShapes,      vec![KeyCombo::key('U')]);
        map.insert(ToolRectSelect,  vec![KeyCombo::key('M')]);
        map.insert(ToolLasso,       vec![KeyCombo::key('L')]);
        map.insert(ToolMagicWand,   vec![KeyCombo::key('W')]);
        map.insert(ToolCrop,        vec![KeyCombo::key('C')]);
        map.insert(ToolPan,         vec![KeyCombo::key('H')]);
        map.insert(ToolZoom,        vec![KeyCombo::key('Z')]);
        map.insert(ToolCloneStamp,  vec![KeyCombo::key('S')]);
        map.insert(ToolDodge,       vec![KeyCombo::key('O')]);
        map.insert(SwapColors,      vec![KeyCombo::key('X')]);
        map.insert(SelectAll,       vec![KeyCombo::ctrl_key('A')]);
        map.insert(Deselect,        vec![KeyCombo::ctrl_key('D')]);
        Self { bindings: map }
    }
}

impl KeyBindings {
    pub fn get(&self, action: BindableAction) -> &[KeyCombo] {
        self.bindings.get(&action).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replace every combo of `action`.
    pub fn set(&mut self, action: BindableAction, combos: Vec<KeyCombo>) {
        self.bindings.insert(action, combos.into_iter().map(KeyCombo::normalized).collect());
    }

    /// Action bound to `combo`. Modifiers must match exactly.
    pub fn action_for(&self, combo: KeyCombo) -> Option<BindableAction> {
        let combo = combo.normalized();
        BindableAction::all()
            .iter()
            .copied()
            .find(|a| self.get(*a).contains(&combo))
    }

    /// Serialize all bindings for config file
    pub fn to_config_lines(&self) -> Vec<String> {
        BindableAction::all()
            .iter()
            .filter_map(|action| {
                let combos = self.bindings.get(action)?;
                let joined: Vec<String> = combos.iter().map(KeyCombo::to_config_string).collect();
                Some(format!("keybind.{}={}", action.name(), joined.join(" ")))
            })
            .collect()
    }

    /// Load a single keybind line from config. Unknown actions and malformed
    /// combos are skipped.
    pub fn load_config_line(&mut self, action_name: &str, combo_str: &str) {
        let Some(action) = BindableAction::from_name(action_name) else {
            log::debug!("ignoring keybinding for unknown action '{}'", action_name);
            return;
        };
        let combos: Option<Vec<KeyCombo>> =
            combo_str.split_whitespace().map(KeyCombo::from_config_string).collect();
        match combos {
            Some(combos) => self.set(action, combos),
            None => log::debug!("ignoring malformed keybinding '{}={}'", action_name, combo_str),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// EDITOR SETTINGS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, PartialEq)]
pub struct EditorSettings {
    pub history_limit: usize,
    pub default_width: u32,
    pub default_height: u32,
    /// Resolution used to turn text point sizes into pixels.
    pub text_dpi: f32,
    pub magic_wand_tolerance: u32,
    pub fill_tolerance: u32,
    /// Empty disables image generation.
    pub generation_endpoint: String,
    pub generation_timeout_secs: u64,
    pub generation_retries: u32,
    pub font_family: String,
    pub keybindings: KeyBindings,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            history_limit: HISTORY_LIMIT,
            default_width: 800,
            default_height: 600,
            text_dpi: 96.0,
            magic_wand_tolerance: 32,
            fill_tolerance: 32,
            generation_endpoint: String::new(),
            generation_timeout_secs: 60,
            generation_retries: 2,
            font_family: "DejaVu Sans".to_string(),
            keybindings: KeyBindings::default(),
        }
    }
}

impl EditorSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/paintcore/paintcore_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\paintcore\paintcore_settings.cfg
    /// On macOS:   ~/Library/Application Support/paintcore/paintcore_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("paintcore").join("paintcore_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("paintcore")
                    .join("paintcore_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
                .ok()?;
            Some(config_dir.join("paintcore").join("paintcore_settings.cfg"))
        }
    }

    /// Parse settings text. Unknown keys are ignored and malformed values
    /// keep their defaults.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            if let Some(action) = key.strip_prefix("keybind.") {
                s.keybindings.load_config_line(action, val);
                continue;
            }
            match key {
                "history_limit" => set_parsed(&mut s.history_limit, key, val, |v: &usize| *v > 0),
                "default_width" => set_parsed(&mut s.default_width, key, val, |v: &u32| *v > 0),
                "default_height" => set_parsed(&mut s.default_height, key, val, |v: &u32| *v > 0),
                "text_dpi" => set_parsed(&mut s.text_dpi, key, val, |v: &f32| v.is_finite() && *v > 0.0),
                "magic_wand_tolerance" => set_parsed(&mut s.magic_wand_tolerance, key, val, |v: &u32| *v <= 1020),
                "fill_tolerance" => set_parsed(&mut s.fill_tolerance, key, val, |v: &u32| *v <= 1020),
                "generation_endpoint" => s.generation_endpoint = val.to_string(),
                "generation_timeout_secs" => set_parsed(&mut s.generation_timeout_secs, key, val, |v: &u64| *v > 0),
                "generation_retries" => set_parsed(&mut s.generation_retries, key, val, |_: &u32| true),
                "font_family" => {
                    if !val.is_empty() {
                        s.font_family = val.to_string();
                    }
                }
                _ => log::debug!("ignoring unknown setting '{}'", key),
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        let mut content = format!(
            "history_limit={}\n\
             default_width={}\n\
             default_height={}\n\
             text_dpi={}\n\
             magic_wand_tolerance={}\n\
             fill_tolerance={}\n\
             generation_endpoint={}\n\
             generation_timeout_secs={}\n\
             generation_retries={}\n\
             font_family={}\n",
            self.history_limit,
            self.default_width,
            self.default_height,
            self.text_dpi,
            self.magic_wand_tolerance,
            self.fill_tolerance,
            self.generation_endpoint,
            self.generation_timeout_secs,
            self.generation_retries,
            self.font_family,
        );
        for line in self.keybindings.to_config_lines() {
            content.push_str(&line);
            content.push('\n');
        }
        content
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())?;
        Ok(())
    }

    /// Load from the platform path; defaults if the file is missing or unreadable.
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        match Self::load_from(&path) {
            Ok(s) => s,
            Err(EditorError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                log::warn!("could not read settings from {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::settings_path()
            .ok_or_else(|| EditorError::Settings("no configuration directory available".into()))?;
        self.save_to(&path)
    }

    /// Generation client settings; `None` when no endpoint is configured.
    pub fn generation_config(&self) -> Option<GenerationConfig> {
        if self.generation_endpoint.trim().is_empty() {
            return None;
        }
        Some(GenerationConfig {
            endpoint: self.generation_endpoint.trim().to_string(),
            timeout: Duration::from_secs(self.generation_timeout_secs),
            retries: self.generation_retries,
        })
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, key: &str, val: &str, valid: impl Fn(&T) -> bool) {
    match val.parse::<T>() {
        Ok(v) if valid(&v) => *slot = v,
        _ => log::debug!("setting '{}' has invalid value '{}', keeping default", key, val),
    }
}
