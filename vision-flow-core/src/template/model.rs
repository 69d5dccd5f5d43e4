//! Template data model.

use crate::core::config::lenient::{de_f64, de_i64, de_string};
use crate::geometry::Point;
use super::store::safe_file_name;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One labeled text region of a layout, in original-image pixels.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemplateRegion {
    #[serde(default, deserialize_with = "de_string")]
    pub text: String,
    #[serde(default, deserialize_with = "de_f64")]
    pub confidence: f64,
    #[serde(default, deserialize_with = "de_i64")]
    pub x: i64,
    #[serde(default, deserialize_with = "de_i64")]
    pub y: i64,
    #[serde(default, deserialize_with = "de_i64")]
    pub width: i64,
    #[serde(default, deserialize_with = "de_i64")]
    pub height: i64,
}

impl TemplateRegion {
    pub fn new(text: impl Into<String>, confidence: f64, x: i64, y: i64, width: i64, height: i64) -> Self {
        Self {
            text: text.into(),
            confidence,
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    /// Rectangle overlap test where touching edges count as overlapping.
    pub fn overlaps(&self, other: &TemplateRegion) -> bool {
        let (ax2, ay2) = (self.x + self.width, self.y + self.height);
        let (bx2, by2) = (other.x + other.width, other.y + other.height);
        !(ax2 < other.x || bx2 < self.x || ay2 < other.y || by2 < self.y)
    }

    pub fn has_positive_size(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

fn default_tolerance() -> f64 {
    20.0
}

fn default_size_tolerance() -> f64 {
    0.2
}

fn default_enabled() -> bool {
    true
}

/// A golden layout plus its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(default)]
    pub template_id: String,
    #[serde(default, deserialize_with = "de_string")]
    pub template_name: String,
    #[serde(default, deserialize_with = "de_string")]
    pub product_id: String,
    #[serde(default, deserialize_with = "de_string")]
    pub product_name: String,
    #[serde(default, alias = "OCRResults")]
    pub ocr_results: Vec<TemplateRegion>,
    /// Camera face the template was captured from, `0..=3` for faces A to D.
    #[serde(default)]
    pub camera_position: i32,
    #[serde(default = "default_tolerance")]
    pub position_tolerance_x: f64,
    #[serde(default = "default_tolerance")]
    pub position_tolerance_y: f64,
    #[serde(default = "default_size_tolerance")]
    pub size_tolerance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    /// Reference image file name, relative to the template file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            template_id: String::new(),
            template_name: String::new(),
            product_id: String::new(),
            product_name: String::new(),
            ocr_results: Vec::new(),
            camera_position: 0,
            position_tolerance_x: default_tolerance(),
            position_tolerance_y: default_tolerance(),
            size_tolerance: default_size_tolerance(),
            created_time: None,
            is_enabled: true,
            image_path: None,
        }
    }
}

impl Template {
    /// Creates an empty template stamped with the current time.
    pub fn new(template_name: impl Into<String>) -> Self {
        let mut template = Self {
            template_name: template_name.into(),
            created_time: Some(Utc::now()),
            ..Self::default()
        };
        template.assign_default_id();
        template
    }

    pub fn with_product(mut self, product_id: impl Into<String>, product_name: impl Into<String>) -> Self {
        self.product_id = product_id.into();
        self.product_name = product_name.into();
        if self.template_id.is_empty() || self.template_id == "Template" {
            self.template_id.clear();
            self.assign_default_id();
        }
        self
    }

    pub fn with_regions(mut self, regions: Vec<TemplateRegion>) -> Self {
        self.ocr_results = regions;
        self
    }

    /// Derives `template_id` from the template name, falling back to the
    /// product name and then to `"Template"`. Existing ids are kept.
    pub fn assign_default_id(&mut self) {
        if !self.template_id.is_empty() {
            return;
        }
        let base = [&self.template_name, &self.product_name]
            .into_iter()
            .find(|s| !s.trim().is_empty())
            .map_or("Template", |s| s.as_str());
        self.template_id = safe_file_name(base);
    }

    /// Maps a face letter `A`..`D` to its camera position.
    pub fn camera_position_for_face(face: &str) -> Option<i32> {
        match face.trim().chars().next()?.to_ascii_uppercase() {
            'A' => Some(0),
            'B' => Some(1),
            'C' => Some(2),
            'D' => Some(3),
            _ => None,
        }
    }
}
