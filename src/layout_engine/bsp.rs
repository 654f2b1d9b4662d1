//! Binary space partitioning tree.
//!
//! Nodes live in a slotmap arena and point at each other by key, so parent
//! links are plain optional indices and traversal under mutation stays
//! safe. Window identity is not stored in the tree: the i-th leaf in
//! pre-order corresponds to the i-th window of the space's tileable list.

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::sys::geometry::Rect;

pub const MIN_RATIO: f32 = 0.1;
pub const MAX_RATIO: f32 = 0.9;

slotmap::new_key_type! {
    pub struct BspNodeId;
}

/// Cardinal direction used for navigation and fence lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    West,
    East,
    North,
    South,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::West => Direction::East,
            Direction::East => Direction::West,
            Direction::North => Direction::South,
            Direction::South => Direction::North,
        }
    }

    pub fn axis(self) -> SplitAxis {
        match self {
            Direction::West | Direction::East => SplitAxis::Vertical,
            Direction::North | Direction::South => SplitAxis::Horizontal,
        }
    }
}

/// A vertical split places children side by side; a horizontal split
/// stacks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitAxis {
    Vertical,
    Horizontal,
}

/// How new splits pick their axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPreference {
    /// Wider areas split side by side, taller areas stack.
    #[default]
    Auto,
    Vertical,
    Horizontal,
}

impl SplitPreference {
    fn axis_for(self, area: Rect) -> SplitAxis {
        match self {
            SplitPreference::Vertical => SplitAxis::Vertical,
            SplitPreference::Horizontal => SplitAxis::Horizontal,
            SplitPreference::Auto => {
                if area.size.height > area.size.width {
                    SplitAxis::Horizontal
                } else {
                    SplitAxis::Vertical
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<BspNodeId>,
    /// `None` for leaves; internal nodes always carry both children.
    children: Option<[BspNodeId; 2]>,
    axis: SplitAxis,
    ratio: f32,
    area: Rect,
}

impl Node {
    fn leaf(parent: Option<BspNodeId>) -> Self {
        Node {
            parent,
            children: None,
            axis: SplitAxis::Vertical,
            ratio: 0.5,
            area: Rect::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct BspTree {
    nodes: SlotMap<BspNodeId, Node>,
    root: Option<BspNodeId>,
}

impl BspTree {
    pub fn new() -> Self {
        BspTree::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<BspNodeId> {
        self.root
    }

    pub fn is_leaf(&self, id: BspNodeId) -> bool {
        self.nodes.get(id).is_some_and(|n| n.children.is_none())
    }

    pub fn area(&self, id: BspNodeId) -> Rect {
        self.nodes[id].area
    }

    pub fn ratio(&self, id: BspNodeId) -> f32 {
        self.nodes[id].ratio
    }

    pub fn axis(&self, id: BspNodeId) -> SplitAxis {
        self.nodes[id].axis
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().len()
    }

    pub fn children_of(&self, id: BspNodeId) -> Option<[BspNodeId; 2]> {
        self.nodes.get(id).and_then(|n| n.children)
    }

    /// Leaves in pre-order; index i corresponds to window i of the space's
    /// tileable list.
    pub fn leaves(&self) -> Vec<BspNodeId> {
        let mut out = Vec::new();
        if let Some(root) = self.root {
            self.collect_leaves(root, &mut out);
        }
        out
    }

    fn collect_leaves(&self, id: BspNodeId, out: &mut Vec<BspNodeId>) {
        match self.nodes[id].children {
            None => out.push(id),
            Some([a, b]) => {
                self.collect_leaves(a, out);
                self.collect_leaves(b, out);
            }
        }
    }

    /// Splits the rightmost pre-order leaf. The previous occupant keeps the
    /// first child slot; the new window takes the second.
    pub fn insert_leaf(&mut self, pref: SplitPreference, ratio: f32) -> BspNodeId {
        let Some(root) = self.root else {
            let leaf = self.nodes.insert(Node::leaf(None));
            self.root = Some(leaf);
            return leaf;
        };

        let mut target = root;
        while let Some([_, second]) = self.nodes[target].children {
            target = second;
        }

        let axis = pref.axis_for(self.nodes[target].area);
        let first = self.nodes.insert(Node::leaf(Some(target)));
        let second = self.nodes.insert(Node::leaf(Some(target)));
        let node = &mut self.nodes[target];
        node.children = Some([first, second]);
        node.axis = axis;
        node.ratio = ratio.clamp(MIN_RATIO, MAX_RATIO);
        second
    }

    /// Removes a leaf; its sibling absorbs the parent's area and replaces
    /// the parent in the grandparent.
    pub fn remove_leaf(&mut self, leaf: BspNodeId) {
        debug_assert!(self.is_leaf(leaf));
        let Some(parent) = self.nodes[leaf].parent else {
            self.nodes.remove(leaf);
            self.root = None;
            return;
        };

        let [a, b] = self.nodes[parent].children.expect("parent of a leaf is internal");
        let sibling = if a == leaf { b } else { a };

        let parent_area = self.nodes[parent].area;
        let grandparent = self.nodes[parent].parent;

        self.nodes[sibling].parent = grandparent;
        self.nodes[sibling].area = parent_area;
        match grandparent {
            Some(g) => {
                let gc = self.nodes[g].children.as_mut().expect("grandparent is internal");
                let slot = if gc[0] == parent { 0 } else { 1 };
                gc[slot] = sibling;
            }
            None => self.root = Some(sibling),
        }

        self.nodes.remove(leaf);
        self.nodes.remove(parent);
    }

    /// Grows or shrinks the tree to exactly `count` leaves. Shrinking
    /// removes rightmost leaves first.
    pub fn resize_to(&mut self, count: usize, pref: SplitPreference, ratio: f32) {
        let mut leaves = self.leaf_count();
        while leaves < count {
            self.insert_leaf(pref, ratio);
            leaves += 1;
        }
        while leaves > count {
            let last = *self.leaves().last().expect("non-empty while shrinking");
            self.remove_leaf(last);
            leaves -= 1;
        }
    }

    /// Recomputes every node's area from `bounds`, leaving `gap` pixels
    /// between sibling areas.
    pub fn compute_areas(&mut self, bounds: Rect, gap: f64) {
        if let Some(root) = self.root {
            self.nodes[root].area = bounds;
            self.compute_areas_below(root, gap);
        }
    }

    fn compute_areas_below(&mut self, id: BspNodeId, gap: f64) {
        let Some([first, second]) = self.nodes[id].children else {
            return;
        };
        let node = &self.nodes[id];
        let area = node.area;
        let ratio = f64::from(node.ratio);
        let (r1, r2) = match node.axis {
            SplitAxis::Vertical => {
                let avail = (area.size.width - gap).max(0.0);
                let w1 = avail * ratio;
                let w2 = avail - w1;
                (
                    Rect::new(area.origin.x, area.origin.y, w1, area.size.height),
                    Rect::new(area.origin.x + w1 + gap, area.origin.y, w2, area.size.height),
                )
            }
            SplitAxis::Horizontal => {
                let avail = (area.size.height - gap).max(0.0);
                let h1 = avail * ratio;
                let h2 = avail - h1;
                (
                    Rect::new(area.origin.x, area.origin.y, area.size.width, h1),
                    Rect::new(area.origin.x, area.origin.y + h1 + gap, area.size.width, h2),
                )
            }
        };
        self.nodes[first].area = r1;
        self.nodes[second].area = r2;
        self.compute_areas_below(first, gap);
        self.compute_areas_below(second, gap);
    }

    /// The nearest leaf strictly in `direction` from `source` that overlaps
    /// it on the perpendicular axis. Distance is measured between the near
    /// edges; ties break on perpendicular center distance, then pre-order.
    pub fn find_leaf_in_direction(
        &self,
        source: BspNodeId,
        direction: Direction,
    ) -> Option<BspNodeId> {
        let src = self.nodes[source].area;
        let mut best: Option<(f64, f64, usize, BspNodeId)> = None;

        for (order, leaf) in self.leaves().into_iter().enumerate() {
            if leaf == source {
                continue;
            }
            let cand = self.nodes[leaf].area;

            let (distance, overlaps) = match direction {
                Direction::East => (
                    cand.min().x - src.max().x,
                    cand.min().y < src.max().y && src.min().y < cand.max().y,
                ),
                Direction::West => (
                    src.min().x - cand.max().x,
                    cand.min().y < src.max().y && src.min().y < cand.max().y,
                ),
                Direction::South => (
                    cand.min().y - src.max().y,
                    cand.min().x < src.max().x && src.min().x < cand.max().x,
                ),
                Direction::North => (
                    src.min().y - cand.max().y,
                    cand.min().x < src.max().x && src.min().x < cand.max().x,
                ),
            };
            if distance < 0.0 || !overlaps {
                continue;
            }

            let perpendicular = match direction {
                Direction::East | Direction::West => (cand.center().y - src.center().y).abs(),
                Direction::North | Direction::South => (cand.center().x - src.center().x).abs(),
            };

            let better = match &best {
                None => true,
                Some((d, p, o, _)) => {
                    (distance, perpendicular, order) < (*d, *p, *o)
                }
            };
            if better {
                best = Some((distance, perpendicular, order, leaf));
            }
        }

        best.map(|(_, _, _, leaf)| leaf)
    }

    /// The fence of `leaf` in `direction`: the nearest ancestor split on
    /// the matching axis whose area extends beyond the leaf in that
    /// direction.
    pub fn fence(&self, leaf: BspNodeId, direction: Direction) -> Option<BspNodeId> {
        const EPS: f64 = 0.5;
        let leaf_area = self.nodes[leaf].area;
        let mut current = self.nodes[leaf].parent;
        while let Some(node) = current {
            let n = &self.nodes[node];
            if n.children.is_some() && n.axis == direction.axis() {
                let extends = match direction {
                    Direction::East => n.area.max().x > leaf_area.max().x + EPS,
                    Direction::West => n.area.min().x < leaf_area.min().x - EPS,
                    Direction::South => n.area.max().y > leaf_area.max().y + EPS,
                    Direction::North => n.area.min().y < leaf_area.min().y - EPS,
                };
                if extends {
                    return Some(node);
                }
            }
            current = n.parent;
        }
        None
    }

    /// Adjusts the ratio of the fence of `leaf` in `direction` by `delta`.
    /// Rejected (no change) when the result would leave [0.1, 0.9].
    pub fn adjust_ratio(&mut self, leaf: BspNodeId, direction: Direction, delta: f32) -> bool {
        let Some(fence) = self.fence(leaf, direction) else {
            return false;
        };
        let new_ratio = self.nodes[fence].ratio + delta;
        if !(MIN_RATIO..=MAX_RATIO).contains(&new_ratio) {
            return false;
        }
        self.nodes[fence].ratio = new_ratio;
        true
    }

    /// Resets matching internal nodes to `default_ratio`.
    pub fn equalize(&mut self, axis: Option<SplitAxis>, default_ratio: f32) {
        let ratio = default_ratio.clamp(MIN_RATIO, MAX_RATIO);
        let ids: Vec<BspNodeId> = self.nodes.keys().collect();
        for id in ids {
            let node = &mut self.nodes[id];
            if node.children.is_some() && axis.is_none_or(|a| a == node.axis) {
                node.ratio = ratio;
            }
        }
    }

    /// Weights matching internal nodes by subtree leaf counts so that leaf
    /// areas come out equal.
    pub fn balance(&mut self, axis: Option<SplitAxis>) {
        if let Some(root) = self.root {
            self.balance_below(root, axis);
        }
    }

    fn balance_below(&mut self, id: BspNodeId, axis: Option<SplitAxis>) -> usize {
        let Some([first, second]) = self.nodes[id].children else {
            return 1;
        };
        let left = self.balance_below(first, axis);
        let right = self.balance_below(second, axis);
        let node = &mut self.nodes[id];
        if axis.is_none_or(|a| a == node.axis) {
            node.ratio = (left as f32 / (left + right) as f32).clamp(MIN_RATIO, MAX_RATIO);
        }
        left + right
    }

    /// Checks the structural invariants: leaves have no children, internal
    /// nodes have two, children tile their parent without overlap.
    pub fn check_invariants(&self) -> bool {
        let Some(root) = self.root else {
            return self.nodes.is_empty();
        };
        self.check_node(root)
    }

    fn check_node(&self, id: BspNodeId) -> bool {
        match self.nodes[id].children {
            None => true,
            Some([a, b]) => {
                let area = self.nodes[id].area;
                let (ra, rb) = (self.nodes[a].area, self.nodes[b].area);
                if ra.intersects(&rb) {
                    return false;
                }
                let union = ra.union(&rb);
                // children tile the parent up to the gap between them
                if union.min().x < area.min().x - 0.5
                    || union.min().y < area.min().y - 0.5
                    || union.max().x > area.max().x + 0.5
                    || union.max().y > area.max().y + 0.5
                {
                    return false;
                }
                self.check_node(a) && self.check_node(b)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SCREEN: Rect = Rect::new(0.0, 0.0, 1920.0, 1080.0);

    fn tree_with(count: usize, pref: SplitPreference, ratio: f32) -> BspTree {
        let mut tree = BspTree::new();
        tree.resize_to(count, pref, ratio);
        tree.compute_areas(SCREEN, 0.0);
        tree
    }

    #[test]
    fn direction_opposite_is_an_involution() {
        for d in [Direction::West, Direction::East, Direction::North, Direction::South] {
            assert_eq!(d.opposite().opposite(), d);
        }
    }

    #[test]
    fn single_leaf_takes_whole_area() {
        let tree = tree_with(1, SplitPreference::Vertical, 0.5);
        let leaves = tree.leaves();
        assert_eq!(leaves.len(), 1);
        assert_eq!(tree.area(leaves[0]), SCREEN);
        assert!(tree.check_invariants());
    }

    #[test]
    fn three_vertical_splits_follow_right_child_insertion() {
        let tree = tree_with(3, SplitPreference::Vertical, 0.5);
        let areas: Vec<Rect> = tree.leaves().iter().map(|l| tree.area(*l)).collect();
        assert_eq!(areas, vec![
            Rect::new(0.0, 0.0, 960.0, 1080.0),
            Rect::new(960.0, 0.0, 480.0, 1080.0),
            Rect::new(1440.0, 0.0, 480.0, 1080.0),
        ]);
        assert!(tree.check_invariants());
    }

    #[test]
    fn leaves_partition_the_bounds() {
        for count in 1..=8 {
            let tree = tree_with(count, SplitPreference::Auto, 0.5);
            let leaves = tree.leaves();
            assert_eq!(leaves.len(), count);

            let mut total = 0.0;
            for (i, a) in leaves.iter().enumerate() {
                total += tree.area(*a).area();
                for b in &leaves[i + 1..] {
                    assert!(
                        !tree.area(*a).intersects(&tree.area(*b)),
                        "leaves {i} and {b:?} overlap"
                    );
                }
            }
            assert!((total - SCREEN.area()).abs() < 1e-6);
        }
    }

    #[test]
    fn gaps_reduce_leaf_areas() {
        let mut tree = BspTree::new();
        tree.resize_to(2, SplitPreference::Vertical, 0.5);
        tree.compute_areas(SCREEN, 10.0);
        let areas: Vec<Rect> = tree.leaves().iter().map(|l| tree.area(*l)).collect();
        assert_eq!(areas[0], Rect::new(0.0, 0.0, 955.0, 1080.0));
        assert_eq!(areas[1], Rect::new(965.0, 0.0, 955.0, 1080.0));
        assert!(tree.check_invariants());
    }

    #[test]
    fn removal_lets_sibling_absorb_parent_area() {
        let mut tree = tree_with(2, SplitPreference::Vertical, 0.5);
        let leaves = tree.leaves();
        tree.remove_leaf(leaves[1]);
        tree.compute_areas(SCREEN, 0.0);

        let remaining = tree.leaves();
        assert_eq!(remaining.len(), 1);
        assert_eq!(tree.area(remaining[0]), SCREEN);
        assert!(tree.check_invariants());
    }

    #[test]
    fn removal_deep_in_tree_replaces_parent_in_grandparent() {
        let mut tree = tree_with(3, SplitPreference::Vertical, 0.5);
        let leaves = tree.leaves();
        // remove the middle leaf; the rightmost should absorb the right half
        tree.remove_leaf(leaves[1]);
        tree.compute_areas(SCREEN, 0.0);

        let areas: Vec<Rect> = tree.leaves().iter().map(|l| tree.area(*l)).collect();
        assert_eq!(areas, vec![
            Rect::new(0.0, 0.0, 960.0, 1080.0),
            Rect::new(960.0, 0.0, 960.0, 1080.0),
        ]);
        assert!(tree.check_invariants());
    }

    #[test]
    fn navigation_finds_east_neighbor() {
        let tree = tree_with(2, SplitPreference::Vertical, 0.5);
        let leaves = tree.leaves();
        assert_eq!(tree.area(leaves[0]), Rect::new(0.0, 0.0, 960.0, 1080.0));

        assert_eq!(
            tree.find_leaf_in_direction(leaves[0], Direction::East),
            Some(leaves[1])
        );
        assert_eq!(tree.find_leaf_in_direction(leaves[0], Direction::North), None);
        assert_eq!(tree.find_leaf_in_direction(leaves[0], Direction::South), None);
        assert_eq!(tree.find_leaf_in_direction(leaves[0], Direction::West), None);
        assert_eq!(
            tree.find_leaf_in_direction(leaves[1], Direction::West),
            Some(leaves[0])
        );
    }

    #[test]
    fn navigation_prefers_nearest_then_least_perpendicular() {
        // left column + right column split into two rows
        let mut tree = BspTree::new();
        tree.resize_to(3, SplitPreference::Vertical, 0.5);
        let leaves = tree.leaves();
        // re-split: make the second split horizontal
        let parent = tree.nodes[leaves[1]].parent.unwrap();
        tree.nodes[parent].axis = SplitAxis::Horizontal;
        tree.compute_areas(SCREEN, 0.0);

        let leaves = tree.leaves();
        let from_left = tree.find_leaf_in_direction(leaves[0], Direction::East);
        // both right-hand leaves are equidistant; top one wins on pre-order
        // after the perpendicular tie against the source center is resolved
        let top_right = tree.area(leaves[1]);
        let bottom_right = tree.area(leaves[2]);
        assert!(top_right.center().y < bottom_right.center().y);
        assert_eq!(from_left, Some(leaves[1]));
    }

    #[test]
    fn navigation_requires_perpendicular_overlap() {
        // 2x2 grid: the bottom-right leaf is not perpendicular to the
        // top-left one when looking east at a diagonal
        let mut tree = BspTree::new();
        let root_leaf = tree.insert_leaf(SplitPreference::Vertical, 0.5);
        let _ = root_leaf;
        tree.insert_leaf(SplitPreference::Vertical, 0.5);
        tree.compute_areas(SCREEN, 0.0);
        let leaves = tree.leaves();
        // diagonal placement: shrink areas by hand
        tree.nodes[leaves[0]].area = Rect::new(0.0, 0.0, 960.0, 500.0);
        tree.nodes[leaves[1]].area = Rect::new(960.0, 600.0, 960.0, 480.0);

        assert_eq!(tree.find_leaf_in_direction(leaves[0], Direction::East), None);
    }

    #[test]
    fn fence_is_nearest_matching_ancestor() {
        let tree = tree_with(3, SplitPreference::Vertical, 0.5);
        let leaves = tree.leaves();

        // the middle leaf has fences both ways
        let west = tree.fence(leaves[1], Direction::West).unwrap();
        let east = tree.fence(leaves[1], Direction::East).unwrap();
        assert_ne!(west, east);
        assert_eq!(west, tree.root().unwrap());

        // the leftmost leaf has no west fence, the rightmost no east fence
        assert_eq!(tree.fence(leaves[0], Direction::West), None);
        assert_eq!(tree.fence(leaves[2], Direction::East), None);
        // and no fence at all on the unsplit axis
        assert_eq!(tree.fence(leaves[0], Direction::North), None);
    }

    #[test]
    fn adjust_ratio_moves_the_fence() {
        let mut tree = tree_with(2, SplitPreference::Vertical, 0.5);
        let leaves = tree.leaves();

        assert!(tree.adjust_ratio(leaves[0], Direction::East, 0.1));
        tree.compute_areas(SCREEN, 0.0);
        let areas: Vec<Rect> = tree.leaves().iter().map(|l| tree.area(*l)).collect();
        assert!((areas[0].size.width - 1152.0).abs() < 1e-6);
    }

    #[test]
    fn adjust_ratio_rejects_out_of_range() {
        let mut tree = tree_with(2, SplitPreference::Vertical, 0.85);
        let leaves = tree.leaves();

        assert!(!tree.adjust_ratio(leaves[0], Direction::East, 0.1));
        assert_eq!(tree.ratio(tree.root().unwrap()), 0.85);
        assert!(!tree.adjust_ratio(leaves[1], Direction::West, -0.8));
    }

    #[test]
    fn equalize_resets_matching_ratios() {
        let mut tree = tree_with(4, SplitPreference::Vertical, 0.7);
        tree.equalize(Some(SplitAxis::Vertical), 0.5);
        for id in tree.nodes.keys().collect::<Vec<_>>() {
            if !tree.is_leaf(id) {
                assert_eq!(tree.ratio(id), 0.5);
            }
        }
    }

    #[test]
    fn equalize_skips_other_axis() {
        let mut tree = tree_with(2, SplitPreference::Horizontal, 0.7);
        tree.equalize(Some(SplitAxis::Vertical), 0.5);
        assert_eq!(tree.ratio(tree.root().unwrap()), 0.7);
        tree.equalize(None, 0.5);
        assert_eq!(tree.ratio(tree.root().unwrap()), 0.5);
    }

    #[test]
    fn balance_equalizes_leaf_areas() {
        let mut tree = tree_with(3, SplitPreference::Vertical, 0.5);
        tree.balance(None);
        tree.compute_areas(SCREEN, 0.0);

        for leaf in tree.leaves() {
            assert!((tree.area(leaf).area() - SCREEN.area() / 3.0).abs() < 1.0);
        }
    }
}
