//! Input validation for DOIs and URLs.
//!
//! These are the only operations in the crate that signal bad input through
//! `Err` rather than through a structured result: a malformed identifier is a
//! caller mistake, not a remote failure.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use url::{Host, Url};

static DOI_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^10\.[0-9]{4,}/\S+$").expect("DOI pattern is valid"));

static EMBEDDED_DOI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"10\.[0-9]{4,}/[^\s"'<>?#&]+"#).expect("embedded DOI pattern is valid")
});

const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi.org/",
    "doi:",
];

/// Validation error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid DOI format: {0}")]
    InvalidDoi(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Private or local URL rejected: {0}")]
    PrivateUrl(String),
}

/// Whether `s` is a bare DOI: `10.<4+ digit registrant>/<non-whitespace suffix>`
pub fn is_valid_doi(s: &str) -> bool {
    DOI_PATTERN.is_match(s)
}

/// Strip resolver and `doi:` prefixes and surrounding whitespace
pub fn normalize_doi(input: &str) -> String {
    let mut doi = input.trim();
    for prefix in DOI_PREFIXES {
        if doi
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        {
            doi = doi[prefix.len()..].trim_start();
            break;
        }
    }
    doi.trim().to_string()
}

/// Normalize and validate a DOI, returning the bare form
pub fn validate_doi(input: &str) -> Result<String, ValidationError> {
    let doi = normalize_doi(input);

    if doi.is_empty() {
        return Err(ValidationError::InvalidDoi("empty DOI".to_string()));
    }

    if !is_valid_doi(&doi) {
        return Err(ValidationError::InvalidDoi(doi));
    }

    Ok(doi)
}

/// Find the first DOI embedded in free text or a URL
pub fn find_doi(text: &str) -> Option<String> {
    EMBEDDED_DOI.find(text).map(|m| {
        m.as_str()
            .trim_end_matches(['.', ',', ';', ')', ']'])
            .to_string()
    })
}

/// Validate an http(s) URL and reject hosts on loopback or private networks
pub fn validate_url(input: &str) -> Result<Url, ValidationError> {
    let input = input.trim();

    if input.is_empty() {
        return Err(ValidationError::InvalidUrl("empty URL".to_string()));
    }

    if input.contains(['\0', '\n', '\r']) {
        return Err(ValidationError::InvalidUrl(
            "contains control characters".to_string(),
        ));
    }

    let parsed = Url::parse(input).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidationError::InvalidUrl(format!(
                "invalid scheme: {}",
                other
            )))
        }
    }

    let private = match parsed.host() {
        None => return Err(ValidationError::InvalidUrl("missing host".to_string())),
        Some(Host::Domain(domain)) => is_local_domain(domain),
        Some(Host::Ipv4(addr)) => is_private_v4(addr),
        Some(Host::Ipv6(addr)) => is_private_v6(addr),
    };

    if private {
        return Err(ValidationError::PrivateUrl(input.to_string()));
    }

    Ok(parsed)
}

fn is_local_domain(domain: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    domain == "localhost"
        || domain.ends_with(".localhost")
        || domain.ends_with(".local")
        || domain.ends_with(".internal")
}

fn is_private_v4(addr: Ipv4Addr) -> bool {
    addr.is_loopback()
        || addr.is_private()
        || addr.is_link_local()
        || addr.is_unspecified()
        || addr.is_broadcast()
}

fn is_private_v6(addr: Ipv6Addr) -> bool {
    if let Some(v4) = addr.to_ipv4_mapped() {
        return is_private_v4(v4);
    }
    let first = addr.segments()[0];
    addr.is_loopback()
        || addr.is_unspecified()
        // fc00::/7 unique local, fe80::/10 link local
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_doi() {
        assert!(is_valid_doi("10.1234/example.2023.5678"));
        assert!(is_valid_doi("10.1038/nature12345"));
        assert!(is_valid_doi("10.12345/a-b_c(1)"));

        assert!(!is_valid_doi("10.123/example"));
        assert!(!is_valid_doi("10.1234/   "));
        assert!(!is_valid_doi("10.1234/"));
        assert!(!is_valid_doi("10.1234/with space"));
        assert!(!is_valid_doi("9.1234/abc"));
        assert!(!is_valid_doi(""));
    }

    #[test]
    fn test_normalize_doi() {
        assert_eq!(normalize_doi("https://doi.org/10.1234/abc"), "10.1234/abc");
        assert_eq!(normalize_doi("DOI: 10.1234/abc"), "10.1234/abc");
        assert_eq!(normalize_doi("  http://dx.doi.org/10.1234/abc "), "10.1234/abc");
        assert_eq!(normalize_doi("10.1234/abc"), "10.1234/abc");
    }

    #[test]
    fn test_validate_doi() {
        assert_eq!(validate_doi("doi:10.1234/abc123").unwrap(), "10.1234/abc123");
        assert!(matches!(
            validate_doi(""),
            Err(ValidationError::InvalidDoi(_))
        ));
        assert!(matches!(
            validate_doi("10.12/abc"),
            Err(ValidationError::InvalidDoi(_))
        ));
    }

    #[test]
    fn test_non_ascii_input() {
        assert_eq!(normalize_doi("aééé"), "aééé");
        assert_eq!(normalize_doi("Café résumé"), "Café résumé");
        assert!(matches!(
            validate_doi("aééé"),
            Err(ValidationError::InvalidDoi(_))
        ));
        assert!(validate_doi("dοi:10.1234/abc").is_err());
    }

    #[test]
    fn test_registrant_must_be_ascii_digits() {
        assert!(!is_valid_doi("10.١٢٣٤/abc"));
        assert!(!is_valid_doi("10.１２３４/abc"));
        assert!(find_doi("see 10.١٢٣٤/abc").is_none());
    }

    #[test]
    fn test_find_doi() {
        assert_eq!(
            find_doi("https://link.example.com/article/10.1007/s00000-020-1234-5?ref=x").as_deref(),
            Some("10.1007/s00000-020-1234-5")
        );
        assert_eq!(
            find_doi("see doi 10.1234/abc.def.").as_deref(),
            Some("10.1234/abc.def")
        );
        assert!(find_doi("https://example.com/paper").is_none());
    }

    #[test]
    fn test_validate_url_valid() {
        assert!(validate_url("https://www.nature.com/articles/nature12345").is_ok());
        assert!(validate_url("http://example.org/paper?id=1").is_ok());
    }

    #[test]
    fn test_validate_url_invalid() {
        assert!(matches!(validate_url(""), Err(ValidationError::InvalidUrl(_))));
        assert!(matches!(
            validate_url("ftp://example.com"),
            Err(ValidationError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_url("not a url"),
            Err(ValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_validate_url_rejects_private_hosts() {
        for url in [
            "http://localhost:8000",
            "http://127.0.0.1/",
            "http://10.0.0.5/x",
            "http://172.20.1.1/",
            "http://192.168.1.1/",
            "http://169.254.169.254/latest/meta-data",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://printer.local/",
        ] {
            assert!(
                matches!(validate_url(url), Err(ValidationError::PrivateUrl(_))),
                "expected private rejection for {}",
                url
            );
        }
    }
}
