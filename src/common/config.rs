//! Configuration. Parsed once at startup; the reconciliation loop's
//! config-sync pass re-applies the loaded values.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::layout_engine::ViewSettings;
use crate::model::rules::{Pattern, Rule, RuleRegistry};

pub fn config_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/"))
        .join(".config")
        .join("slate")
        .join("config.toml")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusFollowsMouse {
    #[default]
    Disabled,
    /// Focus without raising; needs the scripting addition.
    Autofocus,
    /// Focus and raise.
    Autoraise,
}

fn yes() -> bool {
    true
}

fn default_settle_ms() -> u64 {
    150
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub layout: ViewSettings,
    /// Pause between the two frame-application passes, in milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default)]
    pub focus_follows_mouse: FocusFollowsMouse,
    #[serde(default)]
    pub mouse_follows_focus: bool,
    #[serde(default = "yes")]
    pub use_scripting_addition: bool,
    #[serde(default)]
    pub rules: Vec<ConfigRule>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            layout: ViewSettings::default(),
            settle_ms: default_settle_ms(),
            focus_follows_mouse: FocusFollowsMouse::default(),
            mouse_follows_focus: false,
            use_scripting_addition: true,
            rules: Vec::new(),
        }
    }
}

/// Rule as written in the config file; patterns are strings with an
/// optional leading `!` for exclusion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigRule {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub subrole: Option<String>,
    #[serde(default)]
    pub manage: Option<bool>,
    #[serde(default)]
    pub sticky: Option<bool>,
    #[serde(default)]
    pub opacity: Option<f32>,
    #[serde(default)]
    pub layer: Option<i32>,
    #[serde(default)]
    pub grid: Option<String>,
    #[serde(default)]
    pub one_shot: bool,
}

impl ConfigRule {
    fn to_rule(&self) -> anyhow::Result<Rule> {
        let grid = match &self.grid {
            Some(spec) => Some(
                spec.parse()
                    .with_context(|| format!("bad grid spec {spec:?}"))?,
            ),
            None => None,
        };
        Ok(Rule {
            label: self.label.clone(),
            app: self.app.as_deref().map(Pattern::parse),
            title: self.title.as_deref().map(Pattern::parse),
            role: self.role.as_deref().map(Pattern::parse),
            subrole: self.subrole.as_deref().map(Pattern::parse),
            effects: crate::model::rules::EffectSet {
                manage: self.manage,
                sticky: self.sticky,
                opacity: self.opacity,
                layer: self.layer,
                grid,
                ..Default::default()
            },
            one_shot: self.one_shot,
        })
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn load_or_default(path: &Path) -> Config {
        if !path.exists() {
            return Config::default();
        }
        match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("config unusable, using defaults: {e:#}");
                Config::default()
            }
        }
    }

    pub fn build_rules(&self) -> RuleRegistry {
        let mut registry = RuleRegistry::new();
        for rule in &self.rules {
            match rule.to_rule() {
                Ok(rule) => registry.add(rule),
                Err(e) => tracing::warn!("skipping rule: {e:#}"),
            }
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.settle_ms, 150);
        assert_eq!(config.focus_follows_mouse, FocusFollowsMouse::Disabled);
        assert!(config.use_scripting_addition);
    }

    #[test]
    fn parses_a_full_config() {
        let text = r#"
            settle_ms = 120
            focus_follows_mouse = "autoraise"
            mouse_follows_focus = true

            [layout]
            layout = "bsp"
            split_ratio = 0.6
            window_gap = 8.0

            [layout.padding]
            top = 20.0

            [[rules]]
            app = "Terminal"
            opacity = 0.95

            [[rules]]
            label = "ignore-dock"
            app = "Dock"
            manage = false
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.settle_ms, 120);
        assert_eq!(config.focus_follows_mouse, FocusFollowsMouse::Autoraise);
        assert_eq!(config.layout.split_ratio, 0.6);
        assert_eq!(config.layout.padding.top, 20.0);

        let mut rules = config.build_rules();
        assert_eq!(rules.len(), 2);
        let set = rules.match_all("Dock", "", "", "");
        assert_eq!(set.manage, Some(false));
    }

    #[test]
    fn bad_grid_spec_drops_only_that_rule() {
        let config = Config {
            rules: vec![
                ConfigRule { app: Some("A".into()), grid: Some("0:0:0".into()), ..Default::default() },
                ConfigRule { app: Some("B".into()), sticky: Some(true), ..Default::default() },
            ],
            ..Default::default()
        };
        let mut rules = config.build_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.match_all("B", "", "", "").sticky, Some(true));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("nonsense = 1").is_err());
    }
}
