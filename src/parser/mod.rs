//! Parser module - pattern files, deferred-reference templates and content paths

pub mod content;
pub mod expression;
pub mod jsonpath;
pub mod pattern;
pub mod xpath;

// Re-export key types
pub use content::PathFormat;
pub use expression::{Reference, Segment, Template};
pub use jsonpath::JsonPath;
pub use pattern::PatternDefinition;
pub use xpath::XPath;
