//! URL normalization for image requests.
//!
//! Object-store URLs carry signed tokens in the query string, so the query is
//! kept byte-for-byte. Only the parts that never reach the server change.

/// Error type for URL normalization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Normalize an image URL so equal resources produce equal cache keys.
///
/// Trims whitespace, defaults the scheme to `https`, lowercases the host and
/// drops the fragment. The query string is left untouched.
pub fn canonicalize(input: &str) -> Result<url::Url, UrlError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let with_scheme = if trimmed.contains("://") { trimmed.to_string() } else { format!("https://{trimmed}") };
    let mut parsed = url::Url::parse(&with_scheme).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(UrlError::UnsupportedScheme(parsed.scheme().to_string()));
    }

    let host = parsed.host_str().filter(|h| !h.is_empty()).ok_or(UrlError::MissingHost)?.to_lowercase();
    parsed.set_host(Some(&host)).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    parsed.set_fragment(None);

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_https() {
        let url = canonicalize("cdn.example.com/banners/spring.png").unwrap();
        assert_eq!(url.as_str(), "https://cdn.example.com/banners/spring.png");
    }

    #[test]
    fn test_lowercases_host_only() {
        let url = canonicalize("https://CDN.Example.COM/Banners/Spring.PNG").unwrap();
        assert_eq!(url.host_str(), Some("cdn.example.com"));
        assert_eq!(url.path(), "/Banners/Spring.PNG");
    }

    #[test]
    fn test_signed_query_is_preserved_verbatim() {
        let raw = "https://store.example.com/o/item-9.jpg?alt=media&token=Zx9%2Fq&Expires=17";
        let url = canonicalize(raw).unwrap();
        assert_eq!(url.query(), Some("alt=media&token=Zx9%2Fq&Expires=17"));
    }

    #[test]
    fn test_fragment_is_dropped() {
        let a = canonicalize("https://cdn.example.com/a.png#zoom").unwrap();
        let b = canonicalize("  https://cdn.example.com/a.png ").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_non_http_schemes() {
        assert!(matches!(canonicalize("file:///tmp/a.png"), Err(UrlError::UnsupportedScheme(_))));
        assert!(matches!(canonicalize("ftp://cdn.example.com/a.png"), Err(UrlError::UnsupportedScheme(_))));
    }

    #[test]
    fn test_rejects_empty_input() {
        assert!(matches!(canonicalize(""), Err(UrlError::Empty)));
        assert!(matches!(canonicalize("   "), Err(UrlError::Empty)));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(canonicalize("https://exa mple.com/a.png"), Err(UrlError::InvalidUrl(_))));
    }

    #[test]
    fn test_http_is_allowed() {
        assert_eq!(canonicalize("http://cdn.example.com/a.png").unwrap().scheme(), "http");
    }
}
