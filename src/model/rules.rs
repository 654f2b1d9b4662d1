//! Declarative window rules.
//!
//! Rules are matched against a window's application name, title, role, and
//! subrole. Matching rules contribute their effects to an [`EffectSet`] in
//! registry order; a later rule overrides any field it specifies and leaves
//! the rest alone.

use serde::{Deserialize, Serialize};

use crate::layout_engine::grid::Grid;
use crate::sys::screen::{DisplayId, SpaceId};

/// Substring match with optional exclusion (`!needle`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub needle: String,
    #[serde(default)]
    pub exclude: bool,
}

impl Pattern {
    pub fn new(needle: impl Into<String>) -> Self {
        Pattern { needle: needle.into(), exclude: false }
    }

    pub fn exclude(needle: impl Into<String>) -> Self {
        Pattern { needle: needle.into(), exclude: true }
    }

    /// Parses `"term"` or `"!term"`.
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix('!') {
            Some(rest) => Pattern::exclude(rest),
            None => Pattern::new(s),
        }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let hit = candidate.contains(self.needle.as_str());
        hit != self.exclude
    }
}

/// A target carried together with whether focus should follow the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowTarget<T> {
    pub id: T,
    pub follow: bool,
}

/// Composed rule effects. Every field is independently present-or-absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectSet {
    pub display: Option<FollowTarget<DisplayId>>,
    pub space: Option<FollowTarget<SpaceId>>,
    pub opacity: Option<f32>,
    pub manage: Option<bool>,
    pub sticky: Option<bool>,
    pub mouse_follows_focus: Option<bool>,
    pub layer: Option<i32>,
    pub fullscreen: Option<bool>,
    pub grid: Option<Grid>,
    pub scratchpad: Option<String>,
}

impl EffectSet {
    pub fn is_empty(&self) -> bool {
        *self == EffectSet::default()
    }

    /// Overlays `other` onto `self`: fields `other` specifies win.
    pub fn merge(&mut self, other: &EffectSet) {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field.clone();
                }
            };
        }
        take!(display);
        take!(space);
        take!(opacity);
        take!(manage);
        take!(sticky);
        take!(mouse_follows_focus);
        take!(layer);
        take!(fullscreen);
        take!(grid);
        take!(scratchpad);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub app: Option<Pattern>,
    #[serde(default)]
    pub title: Option<Pattern>,
    #[serde(default)]
    pub role: Option<Pattern>,
    #[serde(default)]
    pub subrole: Option<Pattern>,
    #[serde(default)]
    pub effects: EffectSet,
    /// Removed from the registry after the first composition it
    /// contributed to.
    #[serde(default)]
    pub one_shot: bool,
}

impl Rule {
    fn matches(&self, app: &str, title: &str, role: &str, subrole: &str) -> bool {
        let check = |pat: &Option<Pattern>, value: &str| match pat {
            Some(p) => p.matches(value),
            None => true,
        };
        // a rule with no criteria matches nothing
        if self.app.is_none()
            && self.title.is_none()
            && self.role.is_none()
            && self.subrole.is_none()
        {
            return false;
        }
        check(&self.app, app)
            && check(&self.title, title)
            && check(&self.role, role)
            && check(&self.subrole, subrole)
    }
}

/// Ordered rule registry. Iteration order is insertion order, which makes
/// effect composition deterministic.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: Vec<Rule>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        RuleRegistry::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Appends a rule. A labeled rule first displaces any prior rule
    /// carrying the same label.
    pub fn add(&mut self, rule: Rule) {
        if let Some(label) = &rule.label {
            self.rules.retain(|r| r.label.as_deref() != Some(label.as_str()));
        }
        self.rules.push(rule);
    }

    pub fn remove_label(&mut self, label: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.label.as_deref() != Some(label));
        self.rules.len() != before
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Composes the effects of every matching rule, later rules overriding
    /// earlier ones per-field. One-shot rules that contributed are dropped.
    pub fn match_all(&mut self, app: &str, title: &str, role: &str, subrole: &str) -> EffectSet {
        let mut set = EffectSet::default();
        let mut spent = Vec::new();
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.matches(app, title, role, subrole) {
                set.merge(&rule.effects);
                if rule.one_shot {
                    spent.push(i);
                }
            }
        }
        for i in spent.into_iter().rev() {
            self.rules.remove(i);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn rule_for_app(app: &str, effects: EffectSet) -> Rule {
        Rule {
            app: Some(Pattern::new(app)),
            effects,
            ..Default::default()
        }
    }

    #[test]
    fn pattern_substring_and_exclusion() {
        assert!(Pattern::new("Term").matches("Terminal"));
        assert!(!Pattern::new("Term").matches("Safari"));
        assert!(Pattern::exclude("Term").matches("Safari"));
        assert!(!Pattern::exclude("Term").matches("Terminal"));
        assert_eq!(Pattern::parse("!Dock"), Pattern::exclude("Dock"));
    }

    #[test]
    fn later_rules_override_specified_fields_only() {
        let mut registry = RuleRegistry::new();
        registry.add(rule_for_app("Term", EffectSet {
            opacity: Some(0.5),
            sticky: Some(true),
            ..Default::default()
        }));
        registry.add(rule_for_app("Terminal", EffectSet {
            opacity: Some(0.9),
            ..Default::default()
        }));

        let set = registry.match_all("Terminal", "", "", "");
        assert_eq!(set.opacity, Some(0.9));
        assert_eq!(set.sticky, Some(true));
    }

    #[test]
    fn non_matching_rules_contribute_nothing() {
        let mut registry = RuleRegistry::new();
        registry.add(rule_for_app("Safari", EffectSet {
            manage: Some(false),
            ..Default::default()
        }));
        let set = registry.match_all("Terminal", "", "", "");
        assert!(set.is_empty());
    }

    #[test]
    fn empty_rule_matches_nothing() {
        let mut registry = RuleRegistry::new();
        registry.add(Rule {
            effects: EffectSet { sticky: Some(true), ..Default::default() },
            ..Default::default()
        });
        assert!(registry.match_all("Anything", "title", "role", "sub").is_empty());
    }

    #[test]
    fn disjoint_field_sets_compose_order_independently() {
        let a = EffectSet { opacity: Some(0.8), ..Default::default() };
        let b = EffectSet { sticky: Some(true), ..Default::default() };
        let c = EffectSet { layer: Some(3), ..Default::default() };

        let mut ab_c = a.clone();
        ab_c.merge(&b);
        ab_c.merge(&c);

        let mut a_bc = a.clone();
        let mut bc = b.clone();
        bc.merge(&c);
        a_bc.merge(&bc);

        assert_eq!(ab_c, a_bc);
    }

    #[test]
    fn labeled_rule_replaces_predecessor() {
        let mut registry = RuleRegistry::new();
        registry.add(Rule {
            label: Some("term".into()),
            app: Some(Pattern::new("Terminal")),
            effects: EffectSet { opacity: Some(0.5), ..Default::default() },
            ..Default::default()
        });
        registry.add(Rule {
            label: Some("term".into()),
            app: Some(Pattern::new("Terminal")),
            effects: EffectSet { opacity: Some(1.0), ..Default::default() },
            ..Default::default()
        });

        assert_eq!(registry.len(), 1);
        let set = registry.match_all("Terminal", "", "", "");
        assert_eq!(set.opacity, Some(1.0));
    }

    #[test]
    fn one_shot_rule_spends_itself() {
        let mut registry = RuleRegistry::new();
        let mut rule = rule_for_app("Terminal", EffectSet {
            fullscreen: Some(true),
            ..Default::default()
        });
        rule.one_shot = true;
        registry.add(rule);

        let first = registry.match_all("Terminal", "", "", "");
        assert_eq!(first.fullscreen, Some(true));
        assert!(registry.is_empty());

        let second = registry.match_all("Terminal", "", "", "");
        assert!(second.is_empty());
    }

    #[test]
    fn follow_space_travels_with_the_id() {
        let mut registry = RuleRegistry::new();
        registry.add(rule_for_app("Mail", EffectSet {
            space: Some(FollowTarget { id: SpaceId::new(3), follow: true }),
            ..Default::default()
        }));
        let set = registry.match_all("Mail", "", "", "");
        let space = set.space.unwrap();
        assert_eq!(space.id, SpaceId::new(3));
        assert!(space.follow);
    }
}
