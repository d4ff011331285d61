//! Redaction of sensitive audit details

use std::net::IpAddr;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// Replacement for redacted values
pub const REDACTED: &str = "[REDACTED]";

const DEFAULT_SENSITIVE_KEYS: &str = r"(?i)(password|passwd|secret|token|api[_-]?key|authorization|credential|private[_-]?key|(^|[_-])pin$|cvv|card[_-]?number)";

/// Masks values stored under sensitive keys
#[derive(Debug, Clone)]
pub struct Redactor {
    patterns: Vec<Regex>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl Redactor {
    /// Built-in key patterns plus `extra` (case-insensitive regexes)
    ///
    /// Invalid extra patterns are skipped with a warning.
    #[must_use]
    pub fn new(extra: &[String]) -> Self {
        let mut patterns = Vec::with_capacity(extra.len() + 1);
        if let Ok(re) = Regex::new(DEFAULT_SENSITIVE_KEYS) {
            patterns.push(re);
        }
        for pattern in extra {
            match Regex::new(&format!("(?i){pattern}")) {
                Ok(re) => patterns.push(re),
                Err(e) => warn!(pattern = %pattern, error = %e, "Skipping invalid sensitive key pattern"),
            }
        }
        Self { patterns }
    }

    /// Whether `key` names a sensitive field
    #[must_use]
    pub fn is_sensitive(&self, key: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(key))
    }

    /// Replace every value under a sensitive key, recursively
    #[must_use]
    pub fn redact(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| {
                        if self.is_sensitive(&k) {
                            (k, Value::String(REDACTED.to_string()))
                        } else {
                            (k, self.redact(v))
                        }
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.redact(v)).collect()),
            other => other,
        }
    }
}

/// Coarsen an address: IPv4 to its /24, IPv6 to its /48
///
/// Unparseable input is replaced entirely.
#[must_use]
pub fn truncate_ip(ip: &str) -> String {
    match ip.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let [a, b, c, _] = v4.octets();
            format!("{a}.{b}.{c}.0")
        }
        Ok(IpAddr::V6(v6)) => {
            let s = v6.segments();
            format!("{:x}:{:x}:{:x}::", s[0], s[1], s[2])
        }
        Err(_) => REDACTED.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sensitive_keys_are_masked_recursively() {
        // GIVEN: details with credentials at several depths
        let redactor = Redactor::default();
        let details = json!({
            "amount": 250,
            "api_key": "sk_live_123",
            "provider": {
                "name": "paystack",
                "Authorization": "Bearer abc",
                "webhooks": [{"secret": "whsec"}]
            },
            "customer_pin": "1234"
        });

        // WHEN: redacted
        let redacted = redactor.redact(details);

        // THEN: only sensitive values are replaced
        assert_eq!(redacted["amount"], 250);
        assert_eq!(redacted["api_key"], REDACTED);
        assert_eq!(redacted["provider"]["name"], "paystack");
        assert_eq!(redacted["provider"]["Authorization"], REDACTED);
        assert_eq!(redacted["provider"]["webhooks"][0]["secret"], REDACTED);
        assert_eq!(redacted["customer_pin"], REDACTED);
    }

    #[test]
    fn pin_does_not_match_unrelated_words() {
        let redactor = Redactor::default();
        assert!(!redactor.is_sensitive("shipping_address"));
        assert!(!redactor.is_sensitive("spinner"));
        assert!(redactor.is_sensitive("pin"));
    }

    #[test]
    fn extra_patterns_extend_the_defaults() {
        let redactor = Redactor::new(&["^msisdn$".to_string(), "([invalid".to_string()]);
        assert!(redactor.is_sensitive("MSISDN"));
        assert!(redactor.is_sensitive("password"));
    }

    #[test]
    fn ipv4_is_truncated_to_slash_24() {
        assert_eq!(truncate_ip("197.248.10.77"), "197.248.10.0");
    }

    #[test]
    fn ipv6_is_truncated_to_slash_48() {
        assert_eq!(truncate_ip("2001:db8:85a3:8d3:1319:8a2e:370:7348"), "2001:db8:85a3::");
    }

    #[test]
    fn garbage_ip_is_redacted() {
        assert_eq!(truncate_ip("not-an-ip"), REDACTED);
    }
}
