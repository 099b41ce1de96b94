//! Environment variable parsing with type safety.
//!
//! A small typed parser for `STH_` variables that collects errors instead
//! of failing on the first one, so a misconfigured run reports every
//! problem at once.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Value out of valid range.
    #[error("value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    /// Invalid duration format.
    #[error("invalid duration for {var}: '{value}'")]
    InvalidDuration { var: String, value: String },
}

/// Type-safe environment variable parser.
///
/// Collects errors during parsing so all issues can be reported at once.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Create a new parser with the STH_ prefix.
    pub fn new() -> Self {
        Self {
            prefix: "STH_",
            errors: Vec::new(),
        }
    }

    /// Get all accumulated errors.
    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    /// Check if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Get a string value with default.
    pub fn get_string(&mut self, name: &str, default: &str) -> String {
        env::var(self.var_name(name)).unwrap_or_else(|_| default.to_string())
    }

    /// Get an optional string value.
    pub fn get_opt_string(&mut self, name: &str) -> Option<String> {
        env::var(self.var_name(name))
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    /// Get a path value with default.
    pub fn get_path(&mut self, name: &str, default: PathBuf) -> PathBuf {
        match env::var(self.var_name(name)) {
            Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
            _ => default,
        }
    }

    /// Get a boolean value with default.
    ///
    /// Accepts: 1, true, yes, on (for true)
    ///          0, false, no, off, "" (for false)
    pub fn get_bool(&mut self, name: &str, default: bool) -> bool {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name,
                        expected: "boolean (true/false/1/0/yes/no)".to_string(),
                        value,
                    });
                    default
                }
            },
            Err(_) => default,
        }
    }

    /// Get a port value with default and range validation.
    pub fn get_port(&mut self, name: &str, default: u16) -> u16 {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.parse::<u16>() {
                Ok(n) if n >= 1024 => n,
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name,
                        value: n.to_string(),
                        min: "1024".to_string(),
                        max: u16::MAX.to_string(),
                    });
                    default
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name,
                        expected: "TCP port".to_string(),
                        value,
                    });
                    default
                }
            },
            Err(_) => default,
        }
    }

    /// Get a u32 value with default and range validation.
    pub fn get_u32_range(&mut self, name: &str, default: u32, min: u32, max: u32) -> u32 {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.parse::<u32>() {
                Ok(n) if n >= min && n <= max => n,
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name,
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    default
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name,
                        expected: "unsigned 32-bit integer".to_string(),
                        value,
                    });
                    default
                }
            },
            Err(_) => default,
        }
    }

    /// Get a duration value, parsed with humantime ("30s", "2m", ...).
    pub fn get_duration(&mut self, name: &str, default: Duration) -> Duration {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match humantime::parse_duration(&value) {
                Ok(d) => d,
                Err(_) => {
                    self.errors.push(EnvError::InvalidDuration {
                        var: var_name,
                        value,
                    });
                    default
                }
            },
            Err(_) => default,
        }
    }

    /// Get a comma-separated list of strings.
    pub fn get_string_list(&mut self, name: &str, default: &[&str]) -> Vec<String> {
        match env::var(self.var_name(name)) {
            Ok(value) => value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => default.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(unsafe_code)] // set_var/remove_var are unsafe in edition 2024
mod tests {
    use super::*;
    use serial_test::serial;

    // Env mutation is process-global; keep these serial.

    #[test]
    #[serial]
    fn test_get_string_default() {
        unsafe { env::remove_var("STH_MISSING_STRING") };
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_string("MISSING_STRING", "fallback"), "fallback");
        assert!(!parser.has_errors());
    }

    #[test]
    #[serial]
    fn test_get_bool_variants() {
        let mut parser = EnvParser::new();
        unsafe { env::set_var("STH_FLAG", "yes") };
        assert!(parser.get_bool("FLAG", false));
        unsafe { env::set_var("STH_FLAG", "off") };
        assert!(!parser.get_bool("FLAG", true));
        unsafe { env::set_var("STH_FLAG", "maybe") };
        assert!(!parser.get_bool("FLAG", false));
        assert!(parser.has_errors());
        unsafe { env::remove_var("STH_FLAG") };
    }

    #[test]
    #[serial]
    fn test_get_port_rejects_low_and_garbage() {
        let mut parser = EnvParser::new();
        unsafe { env::set_var("STH_PORT_A", "80") };
        unsafe { env::set_var("STH_PORT_B", "eighty") };
        assert_eq!(parser.get_port("PORT_A", 8108), 8108);
        assert_eq!(parser.get_port("PORT_B", 8108), 8108);
        // Both problems are collected, not just the first.
        assert_eq!(parser.errors().len(), 2);
        unsafe { env::remove_var("STH_PORT_A") };
        unsafe { env::remove_var("STH_PORT_B") };
    }

    #[test]
    #[serial]
    fn test_get_duration_humantime() {
        let mut parser = EnvParser::new();
        unsafe { env::set_var("STH_DUR", "45s") };
        assert_eq!(
            parser.get_duration("DUR", Duration::from_secs(1)),
            Duration::from_secs(45)
        );
        unsafe { env::set_var("STH_DUR", "not-a-duration") };
        assert_eq!(
            parser.get_duration("DUR", Duration::from_secs(1)),
            Duration::from_secs(1)
        );
        assert!(parser.has_errors());
        unsafe { env::remove_var("STH_DUR") };
    }

    #[test]
    #[serial]
    fn test_get_string_list_splits_and_trims() {
        let mut parser = EnvParser::new();
        unsafe { env::set_var("STH_ARGS", "test, --test , phases,--") };
        assert_eq!(
            parser.get_string_list("ARGS", &[]),
            vec!["test", "--test", "phases", "--"]
        );
        unsafe { env::remove_var("STH_ARGS") };
    }
}
