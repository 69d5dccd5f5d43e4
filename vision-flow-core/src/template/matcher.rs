//! Layout comparison between a golden template and a candidate.
//!
//! With position checking on, regions are grouped by normalized text and
//! paired in two rounds: first by center distance within the tolerance
//! radius ("correct"), then by rectangle overlap ("position deviation").
//! Leftover candidates are over-detections and leftover golden regions are
//! missing; an over-detection overlapping a missing region becomes a
//! misjudgment pair instead of two separate errors.

use super::model::{Template, TemplateRegion};
use super::normalize::normalize_text;
use crate::core::config::{ConfigError, ConfigValidator};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Penalty weight and cap per error category.
const DEVIATION_PENALTY: (f64, f64) = (0.1, 0.3);
const OVER_DETECTION_PENALTY: (f64, f64) = (0.15, 0.4);
const MISSING_PENALTY: (f64, f64) = (0.2, 0.5);
const MISJUDGMENT_PENALTY: (f64, f64) = (0.5, 0.8);

fn penalty(count: usize, (weight, cap): (f64, f64)) -> f64 {
    (count as f64 * weight).min(cap)
}

/// Matching tolerances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchOptions {
    pub position_tolerance_x: f64,
    pub position_tolerance_y: f64,
    /// Candidates below this confidence are ignored.
    pub min_confidence: f64,
    /// When off, only text multiplicities are compared.
    pub check_position: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            position_tolerance_x: 20.0,
            position_tolerance_y: 20.0,
            min_confidence: 0.5,
            check_position: true,
        }
    }
}

impl MatchOptions {
    /// Radius within which two centers count as the same position.
    pub fn distance_threshold(&self) -> f64 {
        self.position_tolerance_x.hypot(self.position_tolerance_y)
    }
}

impl ConfigValidator for MatchOptions {
    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_non_negative("position_tolerance_x", self.position_tolerance_x)?;
        self.validate_non_negative("position_tolerance_y", self.position_tolerance_y)?;
        self.validate_unit_interval("min_confidence_threshold", self.min_confidence)
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Classification of a candidate region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    Correct,
    PositionDeviation,
    OverDetection,
    Misjudgment,
}

/// A region's text and box, as reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionBox {
    pub text: String,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl From<&TemplateRegion> for RegionBox {
    fn from(r: &TemplateRegion) -> Self {
        Self {
            text: r.text.clone(),
            x: r.x,
            y: r.y,
            width: r.width,
            height: r.height,
        }
    }
}

/// A candidate region with its classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub text: String,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    pub confidence: f64,
    pub match_status: MatchStatus,
}

/// A golden region with no counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingItem {
    #[serde(flatten)]
    pub region: RegionBox,
    pub status: String,
}

/// An over-detected candidate paired with the missing golden region it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MisjudgmentPair {
    pub d_text: String,
    pub d_x: i64,
    pub d_y: i64,
    pub d_w: i64,
    pub d_h: i64,
    pub t_text: String,
    pub t_x: i64,
    pub t_y: i64,
    pub t_w: i64,
    pub t_h: i64,
}

impl MisjudgmentPair {
    fn new(golden: &TemplateRegion, candidate: &TemplateRegion) -> Self {
        Self {
            d_text: candidate.text.clone(),
            d_x: candidate.x,
            d_y: candidate.y,
            d_w: candidate.width,
            d_h: candidate.height,
            t_text: golden.text.clone(),
            t_x: golden.x,
            t_y: golden.y,
            t_w: golden.width,
            t_h: golden.height,
        }
    }
}

/// Counts and verdict of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub template_name: String,
    pub is_match: bool,
    pub match_score: f64,
    pub perfect_matches: usize,
    pub position_deviations: usize,
    pub over_detections: usize,
    pub missing_components: usize,
    pub misjudgments: usize,
}

/// Full comparison report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    pub ocr_results: Vec<CandidateResult>,
    pub missing_template_items: Vec<MissingItem>,
    pub deviation_template_items: Vec<RegionBox>,
    pub misjudgment_pairs: Vec<MisjudgmentPair>,
    pub template_match_info: MatchSummary,
}

impl MatchReport {
    pub fn is_match(&self) -> bool {
        self.template_match_info.is_match
    }

    pub fn score(&self) -> f64 {
        self.template_match_info.match_score
    }
}

/// Regions of both sides grouped by normalized text, in first-seen order.
struct TextGroups {
    order: Vec<String>,
    groups: HashMap<String, (Vec<usize>, Vec<usize>)>,
}

impl TextGroups {
    fn build(golden: &[(String, &TemplateRegion)], candidates: &[(String, &TemplateRegion)]) -> Self {
        let mut order = Vec::new();
        let mut groups: HashMap<String, (Vec<usize>, Vec<usize>)> = HashMap::new();
        for (side, items) in [(0, golden), (1, candidates)] {
            for (i, (key, _)) in items.iter().enumerate() {
                let entry = groups.entry(key.clone()).or_insert_with(|| {
                    order.push(key.clone());
                    (Vec::new(), Vec::new())
                });
                if side == 0 {
                    entry.0.push(i);
                } else {
                    entry.1.push(i);
                }
            }
        }
        Self { order, groups }
    }

    fn iter(&self) -> impl Iterator<Item = &(Vec<usize>, Vec<usize>)> {
        self.order.iter().filter_map(|k| self.groups.get(k))
    }
}

/// Compares candidate layouts against a golden template.
#[derive(Debug, Clone, Default)]
pub struct TemplateMatcher {
    options: MatchOptions,
}

impl TemplateMatcher {
    pub fn new(options: MatchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MatchOptions {
        &self.options
    }

    /// Compares `candidates` against `golden`.
    ///
    /// Candidates below the confidence threshold or without a positive size
    /// are dropped first, as are regions on either side whose normalized
    /// text is empty.
    pub fn match_template(&self, golden: &Template, candidates: &[TemplateRegion]) -> MatchReport {
        let golden_items: Vec<(String, &TemplateRegion)> = golden
            .ocr_results
            .iter()
            .map(|r| (normalize_text(&r.text), r))
            .filter(|(key, _)| !key.is_empty())
            .collect();
        let candidate_items: Vec<(String, &TemplateRegion)> = candidates
            .iter()
            .filter(|r| r.confidence >= self.options.min_confidence && r.has_positive_size())
            .map(|r| (normalize_text(&r.text), r))
            .filter(|(key, _)| !key.is_empty())
            .collect();

        let groups = TextGroups::build(&golden_items, &candidate_items);
        let report = if self.options.check_position {
            self.match_positional(golden, &golden_items, &candidate_items, &groups)
        } else {
            Self::match_multiset(golden, &golden_items, &candidate_items, &groups)
        };
        debug!(
            "template '{}': match={} score={:.3} correct={} deviation={} over={} missing={} misjudged={}",
            golden.template_name,
            report.template_match_info.is_match,
            report.template_match_info.match_score,
            report.template_match_info.perfect_matches,
            report.template_match_info.position_deviations,
            report.template_match_info.over_detections,
            report.template_match_info.missing_components,
            report.template_match_info.misjudgments,
        );
        report
    }

    fn match_positional(
        &self,
        golden: &Template,
        golden_items: &[(String, &TemplateRegion)],
        candidate_items: &[(String, &TemplateRegion)],
        groups: &TextGroups,
    ) -> MatchReport {
        let threshold = self.options.distance_threshold();
        let mut status: Vec<MatchStatus> = vec![MatchStatus::OverDetection; candidate_items.len()];
        let mut candidate_used = vec![false; candidate_items.len()];
        let mut golden_used = vec![false; golden_items.len()];
        let mut correct = 0;
        let mut deviations: Vec<usize> = Vec::new();
        let mut over: Vec<usize> = Vec::new();
        let mut missing: Vec<usize> = Vec::new();

        for (golden_ids, candidate_ids) in groups.iter() {
            for &g in golden_ids {
                let center = golden_items[g].1.center();
                let hit = candidate_ids.iter().copied().find(|&c| {
                    !candidate_used[c] && center.distance(&candidate_items[c].1.center()) <= threshold
                });
                if let Some(c) = hit {
                    candidate_used[c] = true;
                    golden_used[g] = true;
                    status[c] = MatchStatus::Correct;
                    correct += 1;
                }
            }
            let remaining: Vec<usize> = golden_ids.iter().copied().filter(|&g| !golden_used[g]).collect();
            for g in remaining {
                let region = golden_items[g].1;
                let hit = candidate_ids
                    .iter()
                    .copied()
                    .find(|&c| !candidate_used[c] && region.overlaps(candidate_items[c].1));
                if let Some(c) = hit {
                    candidate_used[c] = true;
                    golden_used[g] = true;
                    status[c] = MatchStatus::PositionDeviation;
                    deviations.push(g);
                }
            }
            over.extend(candidate_ids.iter().copied().filter(|&c| !candidate_used[c]));
            missing.extend(golden_ids.iter().copied().filter(|&g| !golden_used[g]));
        }

        let mut misjudged: Vec<(usize, usize)> = Vec::new();
        let mut missing_paired = vec![false; golden_items.len()];
        let mut over_paired = vec![false; candidate_items.len()];
        for &c in &over {
            let hit = missing
                .iter()
                .copied()
                .find(|&g| !missing_paired[g] && golden_items[g].1.overlaps(candidate_items[c].1));
            if let Some(g) = hit {
                missing_paired[g] = true;
                over_paired[c] = true;
                status[c] = MatchStatus::Misjudgment;
                misjudged.push((g, c));
            }
        }
        over.retain(|&c| !over_paired[c]);
        missing.retain(|&g| !missing_paired[g]);

        let correct_ratio = correct as f64 / golden_items.len().max(1) as f64;
        let score = (correct_ratio
            - penalty(deviations.len(), DEVIATION_PENALTY)
            - penalty(over.len(), OVER_DETECTION_PENALTY)
            - penalty(missing.len(), MISSING_PENALTY)
            - penalty(misjudged.len(), MISJUDGMENT_PENALTY))
        .max(0.0);

        MatchReport {
            ocr_results: Self::candidate_results(candidate_items, &status),
            missing_template_items: Self::missing_items(golden_items, &missing),
            deviation_template_items: deviations
                .iter()
                .map(|&g| RegionBox::from(golden_items[g].1))
                .collect(),
            misjudgment_pairs: misjudged
                .iter()
                .map(|&(g, c)| MisjudgmentPair::new(golden_items[g].1, candidate_items[c].1))
                .collect(),
            template_match_info: MatchSummary {
                template_name: golden.template_name.clone(),
                is_match: missing.is_empty() && over.is_empty() && misjudged.is_empty(),
                match_score: score,
                perfect_matches: correct,
                position_deviations: deviations.len(),
                over_detections: over.len(),
                missing_components: missing.len(),
                misjudgments: misjudged.len(),
            },
        }
    }

    fn match_multiset(
        golden: &Template,
        golden_items: &[(String, &TemplateRegion)],
        candidate_items: &[(String, &TemplateRegion)],
        groups: &TextGroups,
    ) -> MatchReport {
        let mut status = vec![MatchStatus::OverDetection; candidate_items.len()];
        let mut matched = 0;
        let mut missing: Vec<usize> = Vec::new();
        let mut over = 0;

        for (golden_ids, candidate_ids) in groups.iter() {
            let pairs = golden_ids.len().min(candidate_ids.len());
            matched += pairs;
            for &c in &candidate_ids[..pairs] {
                status[c] = MatchStatus::Correct;
            }
            over += candidate_ids.len() - pairs;
            missing.extend_from_slice(&golden_ids[pairs..]);
        }

        MatchReport {
            ocr_results: Self::candidate_results(candidate_items, &status),
            missing_template_items: Self::missing_items(golden_items, &missing),
            deviation_template_items: Vec::new(),
            misjudgment_pairs: Vec::new(),
            template_match_info: MatchSummary {
                template_name: golden.template_name.clone(),
                is_match: missing.is_empty() && over == 0,
                match_score: matched as f64 / golden_items.len().max(1) as f64,
                perfect_matches: matched,
                position_deviations: 0,
                over_detections: over,
                missing_components: missing.len(),
                misjudgments: 0,
            },
        }
    }

    fn candidate_results(
        candidate_items: &[(String, &TemplateRegion)],
        status: &[MatchStatus],
    ) -> Vec<CandidateResult> {
        candidate_items
            .iter()
            .zip(status)
            .map(|((_, r), &match_status)| CandidateResult {
                text: r.text.clone(),
                x: r.x,
                y: r.y,
                width: r.width,
                height: r.height,
                confidence: r.confidence,
                match_status,
            })
            .collect()
    }

    fn missing_items(golden_items: &[(String, &TemplateRegion)], missing: &[usize]) -> Vec<MissingItem> {
        missing
            .iter()
            .map(|&g| MissingItem {
                region: RegionBox::from(golden_items[g].1),
                status: "missing".to_string(),
            })
            .collect()
    }
}
