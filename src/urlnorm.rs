//! URL canonicalization for crawl deduplication.
//!
//! Two URLs that differ only in scheme/host casing, default-port notation,
//! or query parameter order must normalize to the same string. Path casing
//! is preserved: servers are allowed to treat `/About` and `/about` as
//! different resources, so collapsing it would merge distinct pages.

use url::Url;

/// Canonicalizes a URL for dedup comparison.
///
/// - scheme and host are lowercased
/// - explicit default ports (`:80` for http, `:443` for https) are dropped
/// - query parameters are sorted by key (blank values kept)
/// - the fragment is stripped
/// - an empty path becomes `/`
///
/// # Errors
///
/// Returns `url::ParseError` if the input is not an absolute URL.
pub fn normalize(raw: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(raw)?;

    // Url::parse already lowercases scheme/host and elides default ports.
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        url.set_query(Some(&query));
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_query_order_insensitive() {
        let a = normalize("HTTP://Example.COM:80/path?b=2&a=1").unwrap();
        let b = normalize("http://example.com:80/path?a=1&b=2").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "http://example.com/path?a=1&b=2");
    }

    #[test]
    fn test_default_port_dropped() {
        assert_eq!(
            normalize("https://example.com:443/x").unwrap(),
            "https://example.com/x"
        );
        // Non-default ports are kept.
        assert_eq!(
            normalize("http://example.com:8080/x").unwrap(),
            "http://example.com:8080/x"
        );
    }

    #[test]
    fn test_fragment_stripped() {
        assert_eq!(
            normalize("http://example.com/page#section").unwrap(),
            "http://example.com/page"
        );
    }

    #[test]
    fn test_empty_path_becomes_slash() {
        assert_eq!(normalize("http://example.com").unwrap(), "http://example.com/");
    }

    #[test]
    fn test_path_case_preserved() {
        let upper = normalize("http://example.com/About").unwrap();
        let lower = normalize("http://example.com/about").unwrap();
        assert_ne!(upper, lower);
    }

    #[test]
    fn test_blank_query_values_kept() {
        assert_eq!(
            normalize("http://example.com/?b=&a=1").unwrap(),
            "http://example.com/?a=1&b="
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(normalize("not a url").is_err());
    }
}
