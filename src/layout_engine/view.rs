//! Per-space layout descriptor.

use serde::{Deserialize, Serialize};

use crate::layout_engine::bsp::{BspTree, MAX_RATIO, MIN_RATIO, SplitPreference};
use crate::sys::geometry::{Padding, Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    #[default]
    Bsp,
    Stack,
    Float,
}

/// Tunables a view starts from; normally taken from the config.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ViewSettings {
    #[serde(default)]
    pub layout: LayoutKind,
    #[serde(default)]
    pub split_preference: SplitPreference,
    #[serde(default = "default_split_ratio")]
    pub split_ratio: f32,
    #[serde(default)]
    pub window_gap: f64,
    #[serde(default)]
    pub padding: Padding,
    #[serde(default)]
    pub auto_balance: bool,
}

fn default_split_ratio() -> f32 {
    0.5
}

impl Default for ViewSettings {
    fn default() -> Self {
        ViewSettings {
            layout: LayoutKind::Bsp,
            split_preference: SplitPreference::default(),
            split_ratio: 0.5,
            window_gap: 0.0,
            padding: Padding::default(),
            auto_balance: false,
        }
    }
}

/// One space's layout state.
#[derive(Debug)]
pub struct View {
    pub layout: LayoutKind,
    pub split_preference: SplitPreference,
    split_ratio: f32,
    pub window_gap: f64,
    pub padding: Padding,
    pub auto_balance: bool,
    pub tree: BspTree,
}

impl View {
    pub fn new(settings: &ViewSettings) -> Self {
        View {
            layout: settings.layout,
            split_preference: settings.split_preference,
            split_ratio: settings.split_ratio.clamp(MIN_RATIO, MAX_RATIO),
            window_gap: settings.window_gap,
            padding: settings.padding,
            auto_balance: settings.auto_balance,
            tree: BspTree::new(),
        }
    }

    pub fn split_ratio(&self) -> f32 {
        self.split_ratio
    }

    pub fn set_split_ratio(&mut self, ratio: f32) {
        self.split_ratio = ratio.clamp(MIN_RATIO, MAX_RATIO);
    }

    /// Computes one frame per window for `count` windows inside `bounds`.
    /// Deterministic: the same count and bounds always produce the same
    /// frames. Float views produce nothing.
    pub fn calculate_frames(&mut self, bounds: Rect, count: usize) -> Vec<Rect> {
        let tiling_area = bounds.inset(self.padding);
        match self.layout {
            LayoutKind::Float => Vec::new(),
            LayoutKind::Stack => vec![tiling_area; count],
            LayoutKind::Bsp => {
                self.tree
                    .resize_to(count, self.split_preference, self.split_ratio);
                if self.auto_balance {
                    self.tree.balance(None);
                }
                self.tree.compute_areas(tiling_area, self.window_gap);
                self.tree.leaves().iter().map(|l| self.tree.area(*l)).collect()
            }
        }
    }
}
