//! # Advertisement Names
//!
//! A main station advertises itself as `"<appID>:<storeID>"`. Sub stations
//! only act on records whose name splits into exactly those two parts, with
//! the expected application id and a non-empty store id.
//!
//! ```text
//! "q8ctuHjYpheAKBA3:S1"      → ServiceName { app_id, store_id: "S1" }
//! "wrongApp:S1"              → ignored (different application)
//! "q8ctuHjYpheAKBA3:"        → ignored (empty store)
//! "q8ctuHjYpheAKBA3:S1:x"    → ignored (three components)
//! "Office Printer"           → ignored
//! ```

use crate::error::{CoreError, CoreResult};

const SEPARATOR: char = ':';

/// Parsed `"<appID>:<storeID>"` record name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceName {
    app_id: String,
    store_id: String,
}

impl ServiceName {
    /// Builds the name a main station advertises under.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidServiceName`] if either part is empty or contains
    /// the separator.
    pub fn new(app_id: impl Into<String>, store_id: impl Into<String>) -> CoreResult<Self> {
        let app_id = app_id.into();
        let store_id = store_id.into();

        for (field, value) in [("app id", &app_id), ("store id", &store_id)] {
            if value.trim().is_empty() {
                return Err(CoreError::InvalidServiceName {
                    raw: format!("{}{}{}", app_id, SEPARATOR, store_id),
                    reason: format!("{} is empty", field),
                });
            }
            if value.contains(SEPARATOR) {
                return Err(CoreError::InvalidServiceName {
                    raw: format!("{}{}{}", app_id, SEPARATOR, store_id),
                    reason: format!("{} contains '{}'", field, SEPARATOR),
                });
            }
        }

        Ok(ServiceName { app_id, store_id })
    }

    /// Parses a discovered record name, keeping it only if it belongs to
    /// `expected_app_id`.
    pub fn parse(raw: &str, expected_app_id: &str) -> Option<Self> {
        let components: Vec<&str> = raw.split(SEPARATOR).collect();
        let [app_id, store_id] = components.as_slice() else {
            return None;
        };
        if *app_id != expected_app_id || store_id.is_empty() {
            return None;
        }
        Some(ServiceName {
            app_id: app_id.to_string(),
            store_id: store_id.to_string(),
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }
}

impl std::fmt::Display for ServiceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.app_id, SEPARATOR, self.store_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP: &str = "q8ctuHjYpheAKBA3";

    #[test]
    fn test_format() {
        let name = ServiceName::new(APP, "S1").unwrap();
        assert_eq!(name.to_string(), "q8ctuHjYpheAKBA3:S1");
    }

    #[test]
    fn test_new_rejects_empty_or_separator() {
        assert!(ServiceName::new(APP, "").is_err());
        assert!(ServiceName::new("", "S1").is_err());
        assert!(ServiceName::new(APP, "a:b").is_err());
    }

    #[test]
    fn test_parse_matching() {
        let name = ServiceName::parse("q8ctuHjYpheAKBA3:S1", APP).unwrap();
        assert_eq!(name.store_id(), "S1");
        assert_eq!(name.app_id(), APP);
    }

    #[test]
    fn test_parse_rejects_other_records() {
        assert!(ServiceName::parse("wrongApp:S1", APP).is_none());
        assert!(ServiceName::parse("q8ctuHjYpheAKBA3:", APP).is_none());
        assert!(ServiceName::parse("q8ctuHjYpheAKBA3:S1:x", APP).is_none());
        assert!(ServiceName::parse("Office Printer", APP).is_none());
        assert!(ServiceName::parse("", APP).is_none());
    }
}
