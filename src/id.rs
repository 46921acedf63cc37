//! Record identifier schemas.
//!
//! The schema gates every ingestion path: local creation and remote import.

use serde_json::{Map, Value};
use uuid::Uuid;

/// Pluggable generator + validator for record ids.
///
/// The default is [`UuidSchema`]. Applications may substitute a monotonic
/// counter or a content-derived scheme, as long as `validate` accepts every
/// id `generate` can produce.
pub trait IdSchema: Send + Sync {
    /// Generate a new id. The record payload is provided for content-derived
    /// schemes; the default schema ignores it.
    fn generate(&self, record: Option<&Map<String, Value>>) -> String;

    fn validate(&self, id: &str) -> bool;
}

/// Random 122-bit identifiers rendered as canonical lowercase UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidSchema;

impl IdSchema for UuidSchema {
    fn generate(&self, _record: Option<&Map<String, Value>>) -> String {
        Uuid::new_v4().to_string()
    }

    fn validate(&self, id: &str) -> bool {
        // Canonical hyphenated form only; Uuid::parse_str also accepts
        // braced/simple forms the server would reject.
        match Uuid::parse_str(id) {
            Ok(parsed) => parsed.hyphenated().to_string() == id,
            Err(_) => false,
        }
    }
}
