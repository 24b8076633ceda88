//! Module and extension registration types.
//!
//! A module is a registered hub participant identified by a unique
//! name. Extensions are modules supplied by third parties; they get an
//! extra error hook through which registration failures (duplicate or
//! bad names) are reported back to their author.

use std::sync::Arc;

use thiserror::Error;

/// Identity a module registers under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Unique logical name; empty names are refused at registration.
    pub name: String,
    /// Human-readable name reported in the hub's own shared state.
    pub friendly_name: String,
    pub version: String,
}

impl ModuleInfo {
    pub fn new(
        name: impl Into<String>,
        friendly_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            friendly_name: friendly_name.into(),
            version: version.into(),
        }
    }
}

/// Error codes surfaced through an extension's [`ModuleCallbacks::on_error`]
/// hook when registration is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtensionError {
    #[error("a module is already registered under the name {0}")]
    DuplicateName(String),
    #[error("module name must be non-empty")]
    BadName,
}

/// Lifecycle hooks a module may supply at registration.
///
/// `on_unregistered` fires exactly once when the module is removed from
/// the hub; `on_error` receives registration error codes in addition to
/// the hub's own error log line.
pub trait ModuleCallbacks: Send + Sync {
    fn on_unregistered(&self) {}
    fn on_error(&self, _error: ExtensionError) {}
}

/// No-op callbacks for modules that don't care about lifecycle.
pub struct NoCallbacks;

impl ModuleCallbacks for NoCallbacks {}

pub fn no_callbacks() -> Arc<dyn ModuleCallbacks> {
    Arc::new(NoCallbacks)
}

/// Cross-platform host layer embedding the SDK. Affects the reported
/// version string and the `wrapper` entry of the hub's shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapperType {
    #[default]
    None,
    ReactNative,
    Flutter,
    Cordova,
}

impl WrapperType {
    pub fn code(&self) -> &'static str {
        match self {
            WrapperType::None => "N",
            WrapperType::ReactNative => "R",
            WrapperType::Flutter => "F",
            WrapperType::Cordova => "C",
        }
    }

    pub fn friendly_name(&self) -> &'static str {
        match self {
            WrapperType::None => "None",
            WrapperType::ReactNative => "React Native",
            WrapperType::Flutter => "Flutter",
            WrapperType::Cordova => "Cordova",
        }
    }

    /// `<coreVersion>` for a plain host, `<coreVersion>-<code>` when a
    /// wrapper layer embeds the SDK.
    pub fn sdk_version(&self, core_version: &str) -> String {
        match self {
            WrapperType::None => core_version.to_string(),
            other => format!("{}-{}", core_version, other.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wrapper_codes() {
        assert_eq!(WrapperType::None.code(), "N");
        assert_eq!(WrapperType::ReactNative.code(), "R");
        assert_eq!(WrapperType::Flutter.code(), "F");
        assert_eq!(WrapperType::Cordova.code(), "C");
    }

    #[test]
    fn test_sdk_version_string() {
        assert_eq!(WrapperType::None.sdk_version("2.0.1"), "2.0.1");
        assert_eq!(WrapperType::Flutter.sdk_version("2.0.1"), "2.0.1-F");
    }
}
