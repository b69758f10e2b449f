//! Error classification by message substring.

use std::fmt::Display;

use vigil_core::ErrorKind;

/// Substring rules, checked in order against the upper-cased message.
/// The first rule with any matching needle wins.
const RULES: &[(ErrorKind, &[&str])] = &[
    (ErrorKind::Timeout, &["TIMEOUT", "EXCEEDED"]),
    (ErrorKind::Network, &["ECONNREFUSED", "ENOTFOUND", "NETWORK"]),
    (ErrorKind::BrowserCrash, &["CRASH", "EXITED"]),
    (ErrorKind::RateLimit, &["429", "RATE_LIMIT", "TOO_MANY"]),
    (ErrorKind::InvalidUrl, &["INVALID", "MALFORMED"]),
];

/// Classify an error by its display text.
pub fn classify<E: Display + ?Sized>(error: &E) -> ErrorKind {
    classify_message(&error.to_string())
}

/// Classify a raw error message. Matching is case-insensitive.
pub fn classify_message(message: &str) -> ErrorKind {
    let upper = message.to_uppercase();
    RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| upper.contains(n)))
        .map(|(kind, _)| *kind)
        .unwrap_or(ErrorKind::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_family() {
        for msg in [
            "Navigation timeout of 30000 ms exceeded",
            "TIMEOUT",
            "request TimeOut",
            "quota exceeded",
        ] {
            assert_eq!(classify_message(msg), ErrorKind::Timeout, "{msg}");
        }
    }

    #[test]
    fn network_family() {
        for msg in [
            "connect ECONNREFUSED 127.0.0.1:443",
            "getaddrinfo enotfound example.invalid",
            "Network is unreachable",
        ] {
            assert_eq!(classify_message(msg), ErrorKind::Network, "{msg}");
        }
    }

    #[test]
    fn crash_family() {
        assert_eq!(classify_message("Page crashed!"), ErrorKind::BrowserCrash);
        assert_eq!(classify_message("browser process exited"), ErrorKind::BrowserCrash);
    }

    #[test]
    fn rate_limit_family() {
        assert_eq!(classify_message("HTTP 429"), ErrorKind::RateLimit);
        assert_eq!(classify_message("rate_limit hit"), ErrorKind::RateLimit);
        assert_eq!(classify_message("Too_Many requests"), ErrorKind::RateLimit);
    }

    #[test]
    fn invalid_url_family() {
        assert_eq!(classify_message("Invalid URL"), ErrorKind::InvalidUrl);
        assert_eq!(classify_message("malformed input"), ErrorKind::InvalidUrl);
    }

    #[test]
    fn unmatched_is_unknown() {
        assert_eq!(classify_message("something odd happened"), ErrorKind::Unknown);
        assert_eq!(classify_message(""), ErrorKind::Unknown);
    }

    #[test]
    fn earlier_rules_win() {
        // Contains both a timeout and a network needle.
        assert_eq!(classify_message("network timeout"), ErrorKind::Timeout);
        // "invalid" loses to the crash rule.
        assert_eq!(classify_message("invalid state, renderer crashed"), ErrorKind::BrowserCrash);
    }

    #[test]
    fn classify_uses_display() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "ENOTFOUND host");
        assert_eq!(classify(&err), ErrorKind::Network);
    }
}
