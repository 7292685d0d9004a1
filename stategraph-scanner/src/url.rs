//! Canonical URL forms used for state identity and queue deduplication.

use url::Url;

/// Normalize a URL: drop the fragment and any default port, strip trailing
/// slashes (except on the root path) and sort query parameters by key.
///
/// Input that does not parse is returned unchanged.
pub fn normalize(input: &str) -> String {
    let Ok(mut url) = Url::parse(input) else {
        return input.to_string();
    };

    // Default ports are already elided by the parser.
    url.set_fragment(None);

    let path = url.path().to_string();
    if path != "/" && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        url.set_path(if trimmed.is_empty() { "/" } else { trimmed });
    }

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    url.to_string()
}

/// Coarse key for queue-level dedup: lowercased scheme, host, port and path,
/// ignoring query, fragment and trailing slashes.
pub fn canonical_key(input: &str) -> String {
    match Url::parse(input) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default();
            let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
            let path = url.path().trim_end_matches('/');
            format!("{}://{}{}{}", url.scheme(), host, port, path).to_lowercase()
        }
        Err(_) => input.trim_end_matches('/').to_lowercase(),
    }
}

/// Same host (and port) as the base URL.
pub fn is_internal(target: &str, base: &str) -> bool {
    match (Url::parse(target), Url::parse(base)) {
        (Ok(t), Ok(b)) => {
            t.host_str().is_some()
                && t.host_str() == b.host_str()
                && t.port_or_known_default() == b.port_or_known_default()
        }
        _ => false,
    }
}

/// Internal, and the target path lies at or under the base path.
pub fn is_internal_subtree(target: &str, base: &str) -> bool {
    if !is_internal(target, base) {
        return false;
    }
    let (Ok(t), Ok(b)) = (Url::parse(target), Url::parse(base)) else {
        return false;
    };
    let base_path = b.path().trim_end_matches('/');
    if base_path.is_empty() {
        return true;
    }
    let target_path = t.path();
    target_path == base_path
        || target_path
            .strip_prefix(base_path)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Resolve an href found on `from` into an absolute, fragment-free URL.
/// Script, mail, phone and fragment-only links resolve to nothing.
pub fn resolve(href: &str, from: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with('#')
    {
        return None;
    }

    let base = Url::parse(from).ok()?;
    let mut resolved = base.join(href).ok()?;
    resolved.set_fragment(None);

    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

/// Split a URL into its origin and route (path plus query).
pub fn site_and_route(input: &str) -> (String, String) {
    match Url::parse(&normalize(input)) {
        Ok(url) => {
            let site = url.origin().ascii_serialization();
            let route = match url.query() {
                Some(q) => format!("{}?{}", url.path(), q),
                None => url.path().to_string(),
            };
            let route = if route.is_empty() { "/".to_string() } else { route };
            (site, route)
        }
        Err(_) => (String::new(), input.to_string()),
    }
}

pub fn build_url(site: &str, route: &str) -> String {
    let site = site.trim_end_matches('/');
    if route.starts_with('/') {
        normalize(&format!("{}{}", site, route))
    } else {
        normalize(&format!("{}/{}", site, route))
    }
}
