//! Endpoint URL helpers.
//!
//! Base URLs come from user configuration and may or may not carry trailing
//! slashes; these helpers keep joined endpoints free of doubled separators.

/// Strips trailing slashes from a configured base URL.
///
/// ```
/// use neuralcore::utils::url::trim_base_url;
///
/// assert_eq!(trim_base_url("http://localhost:8000//"), "http://localhost:8000");
/// ```
pub fn trim_base_url(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}

/// Joins a base URL and an endpoint path with exactly one slash.
///
/// ```
/// use neuralcore::utils::url::endpoint_url;
///
/// assert_eq!(
///     endpoint_url("http://localhost:8000/", "/api/chat"),
///     "http://localhost:8000/api/chat"
/// );
/// ```
pub fn endpoint_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        trim_base_url(base_url),
        path.trim_start_matches('/')
    )
}

/// URL of the host root, used for reachability probes.
pub fn root_url(base_url: &str) -> String {
    format!("{}/", trim_base_url(base_url))
}
