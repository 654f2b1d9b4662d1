//! Layout calculation for tracked spaces.
//!
//! The engine owns one [`View`] per space, created lazily the first time
//! layout is requested and dropped with the space. Frame application is a
//! two-pass affair: frames are issued once, the applications get a moment
//! to settle, and anything that disagrees with its target is issued again.
//! Some applications clamp or quantize programmatic resizes; the second
//! pass wins those arguments.

pub mod animation;
pub mod bsp;
pub mod grid;
pub mod view;

use std::time::Duration;

pub use bsp::{BspNodeId, BspTree, Direction, SplitAxis, SplitPreference};
pub use grid::Grid;
use tracing::debug;
pub use view::{LayoutKind, View, ViewSettings};

use crate::common::collections::HashMap;
use crate::platform::Platform;
use crate::sys::geometry::{Rect, SameAs};
use crate::sys::screen::{SpaceId, WindowId};

pub struct LayoutEngine {
    views: HashMap<SpaceId, View>,
    defaults: ViewSettings,
    /// How long applications get between the two application passes.
    pub settle_delay: Duration,
}

impl LayoutEngine {
    pub fn new(defaults: ViewSettings) -> Self {
        LayoutEngine {
            views: HashMap::default(),
            defaults,
            settle_delay: Duration::from_millis(150),
        }
    }

    pub fn view(&self, space: SpaceId) -> Option<&View> {
        self.views.get(&space)
    }

    /// The space's view, created from the defaults on first use.
    pub fn view_mut(&mut self, space: SpaceId) -> &mut View {
        self.views.entry(space).or_insert_with(|| View::new(&self.defaults))
    }

    /// Drops the view belonging to a removed space.
    pub fn remove_space(&mut self, space: SpaceId) {
        self.views.remove(&space);
    }

    /// Drops and recreates the space's view, losing manual ratio edits.
    pub fn rebuild_view(&mut self, space: SpaceId) {
        self.views.remove(&space);
        self.view_mut(space);
    }

    /// One frame per window id, in layout order.
    pub fn calculate_frames(
        &mut self,
        space: SpaceId,
        bounds: Rect,
        windows: &[WindowId],
    ) -> Vec<(WindowId, Rect)> {
        let view = self.view_mut(space);
        let frames = view.calculate_frames(bounds, windows.len());
        windows.iter().copied().zip(frames).collect()
    }

    /// Issues `frames`, waits out the settle delay, and re-issues any frame
    /// the application did not take. Returns how many frames the second
    /// pass had to repeat.
    pub fn apply_frames(
        &self,
        platform: &mut dyn Platform,
        frames: &[(WindowId, Rect)],
    ) -> usize {
        if frames.is_empty() {
            return 0;
        }
        for (wid, frame) in frames {
            if !platform.set_window_frame(*wid, *frame) {
                debug!("frame command failed for {:?}", wid);
            }
        }

        if !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }

        let mut repeated = 0;
        for (wid, frame) in frames {
            let observed = platform.window_frame(*wid);
            if observed.is_none_or(|o| !o.same_as(*frame)) {
                platform.set_window_frame(*wid, *frame);
                repeated += 1;
            }
        }
        repeated
    }

    /// ASCII rendering of a space's BSP tree, for diagnostics.
    pub fn draw_tree(&self, space: SpaceId) -> String {
        let Some(view) = self.views.get(&space) else {
            return "<no view>".to_string();
        };
        let Some(root) = view.tree.root() else {
            return "<empty>".to_string();
        };
        let mut out = String::new();
        let _ = ascii_tree::write_tree(&mut out, &render_node(&view.tree, root));
        out
    }
}

fn render_node(tree: &BspTree, node: BspNodeId) -> ascii_tree::Tree {
    let area = tree.area(node);
    let label = format!(
        "{:.0}x{:.0}+{:.0}+{:.0}",
        area.size.width, area.size.height, area.origin.x, area.origin.y
    );
    match tree.children_of(node) {
        None => ascii_tree::Tree::Leaf(vec![label]),
        Some([a, b]) => ascii_tree::Tree::Node(
            format!("{:?} {:.2} {}", tree.axis(node), tree.ratio(node), label),
            vec![render_node(tree, a), render_node(tree, b)],
        ),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::platform::mock::MockPlatform;

    const SCREEN: Rect = Rect::new(0.0, 0.0, 1920.0, 1080.0);

    fn engine() -> LayoutEngine {
        let mut engine = LayoutEngine::new(ViewSettings::default());
        engine.settle_delay = Duration::ZERO;
        engine
    }

    fn wids(ids: &[u32]) -> Vec<WindowId> {
        ids.iter().map(|i| WindowId::new(*i)).collect()
    }

    #[test]
    fn views_are_created_lazily_and_dropped_with_their_space() {
        let mut engine = engine();
        let space = SpaceId::new(1);
        assert!(engine.view(space).is_none());
        engine.view_mut(space);
        assert!(engine.view(space).is_some());
        engine.remove_space(space);
        assert!(engine.view(space).is_none());
    }

    #[test]
    fn calculate_frames_pairs_windows_with_leaf_areas() {
        let mut engine = engine();
        let frames = engine.calculate_frames(SpaceId::new(1), SCREEN, &wids(&[10, 11]));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, WindowId::new(10));
        assert_eq!(frames[0].1, Rect::new(0.0, 0.0, 960.0, 1080.0));
        assert_eq!(frames[1].1, Rect::new(960.0, 0.0, 960.0, 1080.0));
    }

    #[test]
    fn apply_frames_runs_two_passes_against_resisting_windows() {
        let mut engine = engine();
        let mut platform = MockPlatform::single_display(SCREEN, SpaceId::new(1));
        platform.add_window(WindowId::new(10), 100, SpaceId::new(1), Rect::new(0., 0., 5., 5.));
        platform.resist_resize(WindowId::new(10), 1);

        let frames = engine.calculate_frames(SpaceId::new(1), SCREEN, &wids(&[10]));
        let repeated = engine.apply_frames(&mut platform, &frames);
        assert_eq!(repeated, 1);
        assert_eq!(platform.window_frame(WindowId::new(10)), Some(SCREEN));
    }

    #[test]
    fn apply_frames_issues_each_frame_once_when_windows_cooperate() {
        let mut engine = engine();
        let mut platform = MockPlatform::single_display(SCREEN, SpaceId::new(1));
        platform.add_window(WindowId::new(10), 100, SpaceId::new(1), Rect::new(0., 0., 5., 5.));

        let frames = engine.calculate_frames(SpaceId::new(1), SCREEN, &wids(&[10]));
        let repeated = engine.apply_frames(&mut platform, &frames);
        assert_eq!(repeated, 0);
        assert_eq!(platform.set_frame_count(WindowId::new(10)), 1);
    }

    #[test]
    fn draw_tree_renders_leaf_geometry() {
        let mut engine = engine();
        engine.calculate_frames(SpaceId::new(1), SCREEN, &wids(&[1, 2]));
        let drawing = engine.draw_tree(SpaceId::new(1));
        assert!(drawing.contains("960x1080"));
    }
}
