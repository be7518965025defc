//! Ephemeral cursor positions.
//!
//! Cursors are never persisted. The server only remembers the latest
//! position per client per space for as long as the process lives.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use validator::Validate;

use crate::ids::ClientId;
use crate::validate::{InvalidPayload, finite};

/// Latest known pointer position of one client in one space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, Validate)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct CursorPosition {
    /// The tab or session owning the cursor.
    pub client_id: ClientId,
    /// Horizontal position in canvas coordinates.
    #[validate(custom(function = "finite"))]
    pub x: f64,
    /// Vertical position in canvas coordinates.
    #[validate(custom(function = "finite"))]
    pub y: f64,
    /// Display name shown next to the pointer.
    #[validate(length(max = 64))]
    pub name: Option<String>,
    /// Pointer color.
    #[validate(length(max = 32))]
    pub color: Option<String>,
}

impl CursorPosition {
    /// An anonymous cursor at `(x, y)`.
    pub const fn new(client_id: ClientId, x: f64, y: f64) -> Self {
        Self {
            client_id,
            x,
            y,
            name: None,
            color: None,
        }
    }

    /// Validate coordinates and label lengths.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPayload`] describing the violated rules.
    pub fn check(&self) -> Result<(), InvalidPayload> {
        Ok(self.validate()?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_camel_case() {
        let cursor = CursorPosition {
            name: Some("Ana".into()),
            ..CursorPosition::new("tab-1".parse().unwrap(), 10.0, 20.0)
        };
        let json = serde_json::to_value(&cursor).unwrap();
        assert_eq!(json["clientId"], "tab-1");
        assert_eq!(json["name"], "Ana");
    }

    #[test]
    fn rejects_non_finite_coordinates() {
        let cursor = CursorPosition::new("tab-1".parse().unwrap(), f64::INFINITY, 0.0);
        assert!(cursor.check().is_err());
    }

    #[test]
    fn rejects_missing_client_id() {
        let json = r#"{"x": 1, "y": 2}"#;
        assert!(serde_json::from_str::<CursorPosition>(json).is_err());
    }
}
