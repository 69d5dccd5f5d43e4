//! Golden-template comparison of text layouts.
//!
//! A [`Template`] is the reference layout of text regions captured for a
//! product view. [`TemplateMatcher`] compares a candidate layout against it,
//! tolerating common OCR confusions through [`normalize_text`], and produces a
//! [`MatchReport`]. [`TemplateStore`] persists templates as pretty-printed JSON
//! next to an optional reference image.

pub mod matcher;
pub mod model;
pub mod normalize;
pub mod store;

pub use matcher::{MatchOptions, MatchReport, MatchStatus, MatchSummary, TemplateMatcher};
pub use model::{Template, TemplateRegion};
pub use normalize::normalize_text;
pub use store::{safe_file_name, SavedTemplate, TemplateStore};
