//! Start-up configuration for the memory monitor.

/// Whether accounting should be active for this process.
///
/// Servers normally decide this from their own parameter system and pass the
/// result to [`crate::initialize`]; [`MonitorConfig::from_env`] is the
/// shortcut for binaries without one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MonitorConfig {
    pub enabled: bool,
}

impl MonitorConfig {
    pub const ENABLED: Self = Self { enabled: true };
    pub const DISABLED: Self = Self { enabled: false };

    /// Read the configuration from the `KS_MEMORY_TRACKING` environment
    /// variable. Unset or unparsable means disabled.
    pub fn from_env() -> Self {
        Self {
            enabled: env_var_bool("KS_MEMORY_TRACKING").unwrap_or(false),
        }
    }
}

fn env_var_bool(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match parse_bool(&value) {
        Some(enabled) => Some(enabled),
        None => {
            log::warn!(
                "Invalid value for environment variable {name}={value:?}. Expected 'on' or 'off'. It will be ignored"
            );
            None
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "0" | "false" | "off" | "no" => Some(false),
        "1" | "true" | "on" | "yes" => Some(true),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_parsing() {
        for on in ["1", "true", "ON", "Yes"] {
            assert_eq!(parse_bool(on), Some(true), "{on}");
        }
        for off in ["0", "false", "OFF", "No"] {
            assert_eq!(parse_bool(off), Some(false), "{off}");
        }
        for junk in ["", "2", "enabled", "tru"] {
            assert_eq!(parse_bool(junk), None, "{junk}");
        }
    }

    #[test]
    fn default_is_disabled() {
        assert_eq!(MonitorConfig::default(), MonitorConfig::DISABLED);
    }
}
