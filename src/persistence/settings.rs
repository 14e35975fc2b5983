use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use egui::{Vec2, vec2};
use serde::{Deserialize, Serialize};

use crate::graph_utils::registry::Padding;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorSettings {
    // Container geometry
    pub collapsed_width: f32,
    pub expanded_width: f32,
    pub expanded_height: f32,
    pub loop_padding: Padding,
    pub group_padding: Padding,
    // Delay before a freshly created node is wired (one layout pass)
    pub wiring_tick_ms: u64,
    // Delay before the block-anchor pass after a collapse/expand
    pub anchor_pass_delay_ms: u64,
    // Run highlight timing
    pub highlight_min_visible_ms: u64,
    pub highlight_cooldown_ms: u64,
    // Placement of inserted nodes
    pub insertion_gap: f32,
    pub anti_overlap_step: f32,
    // Shift applied to the downstream nodes of a split line
    pub insertion_offset: f32,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            collapsed_width: 400.0,
            expanded_width: 500.0,
            expanded_height: 300.0,
            loop_padding: Padding { top: 120.0, bottom: 60.0, left: 60.0, right: 60.0 },
            group_padding: Padding { top: 50.0, bottom: 30.0, left: 30.0, right: 30.0 },
            wiring_tick_ms: 20,
            anchor_pass_delay_ms: 50,
            highlight_min_visible_ms: 800,
            highlight_cooldown_ms: 800,
            insertion_gap: 80.0,
            anti_overlap_step: 30.0,
            insertion_offset: 300.0,
        }
    }
}

impl EditorSettings {
    fn config_dir() -> PathBuf {
        // Cross-platform user config dir
        #[cfg(target_os = "macos")]
        {
            // ~/Library/Application Support/Skill-Canvas
            let home = std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("~"));
            return home.join("Library").join("Application Support").join("Skill-Canvas");
        }
        #[cfg(target_os = "windows")]
        {
            // %APPDATA%\Skill-Canvas
            if let Ok(appdata) = std::env::var("APPDATA") {
                return PathBuf::from(appdata).join("Skill-Canvas");
            }
            return PathBuf::from("Skill-Canvas");
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            // $XDG_CONFIG_HOME/Skill-Canvas or ~/.config/Skill-Canvas
            if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
                return PathBuf::from(xdg).join("Skill-Canvas");
            }
            let home = std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("~"));
            return home.join(".config").join("Skill-Canvas");
        }
    }

    /// Return the directory where the settings file (settings.json) is stored.
    pub fn settings_dir() -> PathBuf {
        Self::config_dir()
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_dir())
    }

    /// Load `settings.json` from `dir`, migrating a legacy `settings.ron` when
    /// that is all there is. Missing files yield the defaults.
    pub fn load_from(dir: &Path) -> anyhow::Result<Self> {
        let json_path = dir.join("settings.json");
        if json_path.exists() {
            let mut f = fs::File::open(json_path)?;
            let mut s = String::new();
            f.read_to_string(&mut s)?;
            let v: Self = serde_json::from_str(&s)?;
            return Ok(v);
        }
        let ron_path = dir.join("settings.ron");
        if ron_path.exists() {
            let mut f = fs::File::open(&ron_path)?;
            let mut s = String::new();
            f.read_to_string(&mut s)?;
            let v: Self = ron::from_str(&s)?;
            // Save immediately to JSON for future reads, ignore errors silently
            let _ = v.save_to(dir);
            return Ok(v);
        }
        Ok(Self::default())
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_dir())
    }

    pub fn save_to(&self, dir: &Path) -> anyhow::Result<()> {
        fs::create_dir_all(dir)?;
        let path = dir.join("settings.json");
        let s = serde_json::to_string_pretty(self)?;
        let mut f = fs::File::create(path)?;
        f.write_all(s.as_bytes())?;
        Ok(())
    }

    pub fn expanded_size(&self) -> Vec2 {
        vec2(self.expanded_width, self.expanded_height)
    }

    pub fn wiring_tick(&self) -> Duration {
        Duration::from_millis(self.wiring_tick_ms)
    }

    pub fn anchor_pass_delay(&self) -> Duration {
        Duration::from_millis(self.anchor_pass_delay_ms)
    }

    pub fn highlight_min_visible(&self) -> Duration {
        Duration::from_millis(self.highlight_min_visible_ms)
    }

    pub fn highlight_cooldown(&self) -> Duration {
        Duration::from_millis(self.highlight_cooldown_ms)
    }
}
