//! Channel URL construction.

use crate::error::{WsError, WsResult};
use url::Url;

/// Path of the task-status channel on the dashboard server.
pub const TASK_STATUS_PATH: &str = "/ws/tasks/status/";

/// Build the channel URL for `page_origin` with `token` as a query parameter.
///
/// The page scheme is mirrored: `http` -> `ws`, `https` -> `wss`.
/// `ws`/`wss` origins are accepted unchanged.
pub fn channel_url(page_origin: &str, token: &str) -> WsResult<Url> {
    let origin = Url::parse(page_origin)?;

    let scheme = match origin.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(WsError::InvalidUrl(format!(
                "unsupported scheme '{other}' in {page_origin}"
            )))
        }
    };

    let host = origin
        .host_str()
        .ok_or_else(|| WsError::InvalidUrl(format!("missing host in {page_origin}")))?;

    let authority = match origin.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut url = Url::parse(&format!("{scheme}://{authority}{TASK_STATUS_PATH}"))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

/// URL without query or fragment, safe to log.
pub fn redacted(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.set_fragment(None);
    clean.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insecure_page_uses_ws() {
        let url = channel_url("http://localhost:8000", "tok1").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws/tasks/status/?token=tok1");
    }

    #[test]
    fn test_secure_page_uses_wss() {
        let url = channel_url("https://dashboard.example.com/tasks/12?tab=logs", "abc").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://dashboard.example.com/ws/tasks/status/?token=abc"
        );
    }

    #[test]
    fn test_token_is_encoded() {
        let url = channel_url("https://example.com", "a b&c=d").unwrap();
        let token = url
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned());
        assert_eq!(token.as_deref(), Some("a b&c=d"));
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(matches!(
            channel_url("ftp://example.com", "tok"),
            Err(WsError::InvalidUrl(_))
        ));
        assert!(channel_url("not a url", "tok").is_err());
    }

    #[test]
    fn test_redacted_strips_token() {
        let url = channel_url("https://example.com", "secret").unwrap();
        let shown = redacted(&url);
        assert!(!shown.contains("secret"));
        assert_eq!(shown, "wss://example.com/ws/tasks/status/");
    }
}
