use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Reasons a URL is refused before any request is made.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    #[error("Localhost not allowed")]
    Localhost,
}

/// Parse `url_str` and refuse anything that is not a public http(s) target.
///
/// Feed documents are untrusted, so every link they carry goes through this
/// before the page fetcher touches it (SSRF guard).
///
/// ```
/// use almanac::util::validate_url;
///
/// assert!(validate_url("https://example.com/post").is_ok());
/// assert!(validate_url("http://127.0.0.1/admin").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlValidationError::UnsupportedScheme(url.scheme().to_owned()));
    }

    let Some(host) = url.host_str() else {
        return Ok(url);
    };
    if host.eq_ignore_ascii_case("localhost") {
        return Err(UrlValidationError::Localhost);
    }

    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if ip.is_loopback() {
            return Err(UrlValidationError::Localhost);
        }
        if is_private_ip(&ip) {
            return Err(UrlValidationError::PrivateIp(ip.to_string()));
        }
    }

    Ok(url)
}

/// Host (authority without credentials or port) of `url_str`.
///
/// Falls back to a plain scan between `://` and the next `/` when the string
/// does not parse as a URL, and to an empty string when neither works.
pub fn domain_of(url_str: &str) -> String {
    if let Ok(url) = Url::parse(url_str.trim()) {
        if let Some(host) = url.host_str() {
            return host.to_string();
        }
    }

    let after_scheme = url_str
        .find("://")
        .map(|i| &url_str[i + 3..])
        .unwrap_or(url_str);
    let authority = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    host.split(':').next().unwrap_or_default().trim().to_string()
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            if v6.is_unspecified() {
                return true;
            }
            let first = v6.segments()[0];
            // fc00::/7 unique local, fe80::/10 link local
            (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_urls_accepted() {
        assert!(validate_url("https://example.com/article").is_ok());
        assert!(validate_url("http://news.example.org:8080/rss").is_ok());
    }

    #[test]
    fn test_non_http_schemes_rejected() {
        assert!(matches!(
            validate_url("ftp://example.com"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(validate_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_loopback_and_private_rejected() {
        assert!(matches!(
            validate_url("http://localhost/x"),
            Err(UrlValidationError::Localhost)
        ));
        assert!(validate_url("http://127.0.0.1/x").is_err());
        assert!(validate_url("http://[::1]/x").is_err());
        assert!(validate_url("http://10.0.0.1/x").is_err());
        assert!(validate_url("http://192.168.1.1:8080/x").is_err());
        assert!(validate_url("http://169.254.1.1/x").is_err());
        assert!(validate_url("http://[fe80::1]/x").is_err());
        assert!(validate_url("http://0.0.0.0/x").is_err());
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("https://www.example.com/a/b?c=d"), "www.example.com");
        assert_eq!(domain_of("http://user:pw@example.org:81/"), "example.org");
        assert_eq!(domain_of("not a url://odd.host/path"), "odd.host");
        assert_eq!(domain_of(""), "");
    }
}
