//! De-duplication of detections found in overlapping tiles.
//!
//! The axis-aligned strategy clusters same-category detections whose
//! original-space boxes overlap by more than the IoS threshold and keeps the
//! best-scoring member of each cluster. The rotated strategy compares each
//! detection with the tiles directly right of and below its own and flags the
//! weaker member of every overlapping pair.
//!
//! Nothing is removed: losing detections get `meta.suppressed = true` and
//! consumers filter on it.

use crate::core::config::{ConfigError, ConfigValidator};
use crate::core::errors::FlowResult;
use crate::detection::{DetectionId, ResultSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Which merge algorithm applies to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    AxisAligned,
    Rotated,
}

impl MergeStrategy {
    /// Picks the strategy for a model task type. Classification and OCR
    /// results are never merged, so they map to `None`.
    pub fn for_task(task_type: &str) -> Option<Self> {
        match task_type.trim() {
            "cls" | "ocr" | "OCR" | "分类" | "图像分类" => None,
            "rotated_det" | "rotated_bbox" | "旋转框检测" | "rotated_detection_result" => {
                Some(MergeStrategy::Rotated)
            }
            _ => Some(MergeStrategy::AxisAligned),
        }
    }
}

/// Merge thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Overlap above which two detections are duplicates. IoS on the
    /// axis-aligned path, envelope IoU on the rotated path.
    pub ios_threshold: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self { ios_threshold: 0.2 }
    }
}

impl ConfigValidator for MergeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_unit_interval("combine_ios_threshold", self.ios_threshold)
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Outcome of one merge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Detections that took part in the pass.
    pub considered: usize,
    /// Detections newly flagged as suppressed.
    pub suppressed: usize,
    /// Clusters found on the axis-aligned path.
    pub components: usize,
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Flags duplicate detections within one round of a [`ResultSet`].
#[derive(Debug, Clone)]
pub struct DetectionMerger {
    config: MergeConfig,
}

impl DetectionMerger {
    /// Creates a merger.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the threshold is outside `[0, 1]`.
    pub fn new(config: MergeConfig) -> FlowResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn threshold(&self) -> f64 {
        self.config.ios_threshold
    }

    /// Runs one pass over `round` with the given strategy.
    ///
    /// Every detection must already carry its original-space box (see
    /// [`Detection::stamp_global`](crate::detection::Detection::stamp_global));
    /// detections without one are skipped.
    pub fn merge_round(&self, set: &mut ResultSet, round: u32, strategy: MergeStrategy) -> MergeStats {
        let stats = match strategy {
            MergeStrategy::AxisAligned => self.merge_axis_aligned(set, round),
            MergeStrategy::Rotated => self.merge_rotated(set, round),
        };
        debug!(
            "merge round {} ({:?}): {} considered, {} suppressed, {} clusters",
            round, strategy, stats.considered, stats.suppressed, stats.components
        );
        stats
    }

    /// Connected-component merge over intersection-over-smaller.
    pub fn merge_axis_aligned(&self, set: &mut ResultSet, round: u32) -> MergeStats {
        let candidates: Vec<(DetectionId, i64, f64, crate::geometry::Rect)> = set
            .survivors(round)
            .into_iter()
            .filter_map(|id| {
                let d = set.detection(id);
                d.original_bbox()
                    .map(|b| (id, d.category_id, d.score, b.aabb()))
            })
            .collect();

        let n = candidates.len();
        let mut components = DisjointSet::new(n);
        for i in 0..n {
            for j in (i + 1)..n {
                let (_, cat_i, _, box_i) = &candidates[i];
                let (_, cat_j, _, box_j) = &candidates[j];
                if cat_i == cat_j && box_i.ios(box_j) > self.config.ios_threshold {
                    components.union(i, j);
                }
            }
        }

        // Best member per root; the first one seen wins ties.
        let mut best: HashMap<usize, usize> = HashMap::new();
        let mut roots = Vec::new();
        for i in 0..n {
            let root = components.find(i);
            match best.get(&root) {
                Some(&b) if candidates[b].2 >= candidates[i].2 => {}
                Some(_) => {
                    best.insert(root, i);
                }
                None => {
                    best.insert(root, i);
                    roots.push(root);
                }
            }
        }

        let mut suppressed = 0;
        for i in 0..n {
            let root = components.find(i);
            if best.get(&root) != Some(&i) {
                set.detection_mut(candidates[i].0).meta.suppressed = true;
                suppressed += 1;
            }
        }

        MergeStats {
            considered: n,
            suppressed,
            components: roots.len(),
        }
    }

    /// Greedy pairwise merge of rotated detections across neighbouring tiles.
    pub fn merge_rotated(&self, set: &mut ResultSet, round: u32) -> MergeStats {
        let slot_by_tile: HashMap<(u32, u32), Vec<DetectionId>> = set
            .slots_in_round(round)
            .filter_map(|(_, s)| s.slice_index.map(|tile| (tile, s.members().to_vec())))
            .fold(HashMap::new(), |mut acc, (tile, members)| {
                acc.entry(tile).or_insert_with(Vec::new).extend(members);
                acc
            });

        let mut considered = 0;
        let mut suppressed = 0;
        for id in set.survivors(round) {
            let d = set.detection(id);
            if !d.is_rotated() {
                continue;
            }
            let (Some((row, col)), Some(global)) = (d.meta.slice_index, d.original_bbox()) else {
                continue;
            };
            considered += 1;
            let (category, score, envelope) = (d.category_id, d.score, global.aabb());

            for neighbour in [(row + 1, col), (row, col + 1)] {
                let Some(others) = slot_by_tile.get(&neighbour) else {
                    continue;
                };
                for &other in others {
                    let o = set.detection(other);
                    if !o.is_rotated() || o.category_id != category {
                        continue;
                    }
                    let Some(other_box) = o.original_bbox() else {
                        continue;
                    };
                    if envelope.iou(&other_box.aabb()) <= self.config.ios_threshold {
                        continue;
                    }
                    let loser = if o.score > score { id } else { other };
                    let target = set.detection_mut(loser);
                    if !target.meta.suppressed {
                        target.meta.suppressed = true;
                        suppressed += 1;
                    }
                }
            }
        }

        MergeStats {
            considered,
            suppressed,
            components: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;
    use crate::geometry::{Rect, RotatedRect, TransformState};

    fn stamped(mut d: Detection) -> Detection {
        d.stamp_global(&TransformState::new(100, 100)).unwrap();
        d
    }

    #[test]
    fn test_strategy_for_task() {
        assert_eq!(MergeStrategy::for_task("det"), Some(MergeStrategy::AxisAligned));
        assert_eq!(MergeStrategy::for_task("instance_seg"), Some(MergeStrategy::AxisAligned));
        assert_eq!(MergeStrategy::for_task("rotated_det"), Some(MergeStrategy::Rotated));
        assert_eq!(MergeStrategy::for_task("cls"), None);
        assert_eq!(MergeStrategy::for_task("ocr"), None);
    }

    #[test]
    fn test_invalid_threshold() {
        assert!(DetectionMerger::new(MergeConfig { ios_threshold: 1.5 }).is_err());
    }

    #[test]
    fn test_nested_boxes_keep_higher_score() {
        let mut set = ResultSet::new();
        let slot = set.add_slot(0, 0, Some((0, 0)));
        let outer = set.insert(
            slot,
            stamped(Detection::axis(1, "a", 0.9, Rect::from_xyxy(0.0, 0.0, 10.0, 10.0))),
        );
        let inner = set.insert(
            slot,
            stamped(Detection::axis(1, "a", 0.95, Rect::from_xyxy(2.0, 2.0, 8.0, 8.0))),
        );

        let merger = DetectionMerger::new(MergeConfig::default()).unwrap();
        let stats = merger.merge_round(&mut set, 0, MergeStrategy::AxisAligned);

        assert!(set.detection(outer).is_suppressed());
        assert!(!set.detection(inner).is_suppressed());
        assert_eq!(stats.suppressed, 1);
        assert_eq!(stats.components, 1);
    }

    #[test]
    fn test_categories_do_not_merge() {
        let mut set = ResultSet::new();
        let slot = set.add_slot(0, 0, None);
        set.insert(slot, stamped(Detection::axis(1, "a", 0.9, Rect::new(0.0, 0.0, 10.0, 10.0))));
        set.insert(slot, stamped(Detection::axis(2, "b", 0.8, Rect::new(0.0, 0.0, 10.0, 10.0))));
        let merger = DetectionMerger::new(MergeConfig::default()).unwrap();
        let stats = merger.merge_axis_aligned(&mut set, 0);
        assert_eq!(stats.suppressed, 0);
        assert_eq!(stats.components, 2);
    }

    #[test]
    fn test_chain_collapses_to_one() {
        let mut set = ResultSet::new();
        let slot = set.add_slot(0, 0, None);
        for (x, score) in [(0.0, 0.5), (6.0, 0.7), (12.0, 0.6)] {
            set.insert(slot, stamped(Detection::axis(0, "a", score, Rect::new(x, 0.0, 10.0, 10.0))));
        }
        let merger = DetectionMerger::new(MergeConfig::default()).unwrap();
        merger.merge_axis_aligned(&mut set, 0);
        let survivors = set.survivors(0);
        assert_eq!(survivors.len(), 1);
        assert_eq!(set.detection(survivors[0]).score, 0.7);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut set = ResultSet::new();
        let slot = set.add_slot(0, 0, None);
        let boxes = [
            (0.0, 0.0, 0.6),
            (3.0, 1.0, 0.8),
            (40.0, 40.0, 0.5),
            (44.0, 41.0, 0.55),
            (80.0, 0.0, 0.9),
        ];
        for (x, y, s) in boxes {
            set.insert(slot, stamped(Detection::axis(0, "a", s, Rect::new(x, y, 10.0, 10.0))));
        }
        let merger = DetectionMerger::new(MergeConfig::default()).unwrap();
        let first = merger.merge_axis_aligned(&mut set, 0);
        assert_eq!(first.suppressed, 2);
        let second = merger.merge_axis_aligned(&mut set, 0);
        assert_eq!(second.suppressed, 0);
        assert_eq!(second.considered, 3);
    }

    #[test]
    fn test_equal_scores_first_wins() {
        let mut set = ResultSet::new();
        let slot = set.add_slot(0, 0, None);
        let first = set.insert(slot, stamped(Detection::axis(0, "a", 0.5, Rect::new(0.0, 0.0, 10.0, 10.0))));
        let second = set.insert(slot, stamped(Detection::axis(0, "a", 0.5, Rect::new(1.0, 0.0, 10.0, 10.0))));
        let merger = DetectionMerger::new(MergeConfig::default()).unwrap();
        merger.merge_axis_aligned(&mut set, 0);
        assert!(!set.detection(first).is_suppressed());
        assert!(set.detection(second).is_suppressed());
    }

    #[test]
    fn test_rotated_neighbour_tiles() {
        let mut set = ResultSet::new();
        let left = set.add_slot(0, 0, Some((0, 0)));
        let right = set.add_slot(0, 1, Some((0, 1)));
        let far = set.add_slot(0, 2, Some((0, 3)));
        let a = set.insert(left, stamped(Detection::rotated(0, "a", 0.6, RotatedRect::new(50.0, 50.0, 20.0, 10.0, 0.3))));
        let b = set.insert(right, stamped(Detection::rotated(0, "a", 0.8, RotatedRect::new(52.0, 50.0, 20.0, 10.0, 0.3))));
        let c = set.insert(far, stamped(Detection::rotated(0, "a", 0.1, RotatedRect::new(50.0, 50.0, 20.0, 10.0, 0.3))));

        let merger = DetectionMerger::new(MergeConfig::default()).unwrap();
        let stats = merger.merge_round(&mut set, 0, MergeStrategy::Rotated);
        assert!(set.detection(a).is_suppressed());
        assert!(!set.detection(b).is_suppressed());
        // Not an adjacent tile, so it is never compared.
        assert!(!set.detection(c).is_suppressed());
        assert_eq!(stats.suppressed, 1);
    }

    #[test]
    fn test_missing_global_box_is_skipped() {
        let mut set = ResultSet::new();
        let slot = set.add_slot(0, 0, None);
        set.insert(slot, Detection::label(0, "a", 0.9));
        set.insert(slot, Detection::label(0, "a", 0.8));
        let merger = DetectionMerger::new(MergeConfig::default()).unwrap();
        let stats = merger.merge_axis_aligned(&mut set, 0);
        assert_eq!(stats.considered, 0);
        assert_eq!(stats.suppressed, 0);
    }
}
