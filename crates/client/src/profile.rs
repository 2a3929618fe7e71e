//! Saved session profiles.
//!
//! A profile is the record the settings store hands out for one server
//! entry: where to connect and which dialect to speak.

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;

/// One saved server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProfile {
    /// Store-assigned identifier. Also keys the connection manager.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// WebSocket URL of the server.
    pub url: String,
    /// Dialect the server speaks.
    pub protocol: Dialect,
    /// Keep the terminal at a fixed size instead of following the window.
    #[serde(rename = "fixSize", default)]
    pub fix_size: bool,
}

impl SessionProfile {
    /// Creates a profile with the standard dialect.
    pub fn new(id: u64, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            url: url.into(),
            protocol: Dialect::FullMultiplex,
            fix_size: false,
        }
    }

    /// Sets the dialect.
    pub fn with_protocol(mut self, protocol: Dialect) -> Self {
        self.protocol = protocol;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_wire_shape() {
        let profile: SessionProfile = serde_json::from_str(
            r#"{"id":3,"name":"nas","url":"ws://nas:32300/ws","protocol":"goTTYd","fixSize":true}"#,
        )
        .unwrap();
        assert_eq!(profile.id, 3);
        assert_eq!(profile.protocol, Dialect::SingleSessionLegacy);
        assert!(profile.fix_size);

        let json = serde_json::to_value(SessionProfile::new(1, "local", "ws://localhost:32300/ws"))
            .unwrap();
        assert_eq!(json["protocol"], "standard");
        assert_eq!(json["fixSize"], false);
    }

    #[test]
    fn test_fix_size_defaults_to_false() {
        let profile: SessionProfile =
            serde_json::from_str(r#"{"id":1,"name":"a","url":"ws://a","protocol":"standard"}"#)
                .unwrap();
        assert!(!profile.fix_size);
    }
}
