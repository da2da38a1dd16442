//! 规格提取：页面抓取、UI 组件检测、功能推定、六段式规格文档

pub mod components;
pub mod document;
pub mod extractor;

pub use components::detect_components;
pub use document::{has_all_sections, SECTION_TITLES};
pub use extractor::{fallback_specification, SpecExtractor};
