use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/v\d+/?$").unwrap_or_else(|err| panic!("invalid version pattern: {err}"))
});

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Base URL for an OpenAI-style API. Falls back to `default` when nothing is
/// configured and appends `/v1` unless a version is present. A trailing `#`
/// disables the rewrite and is stripped.
pub fn api_base_url(configured: &str, default: &str) -> String {
    let trimmed = configured.trim();
    let raw = if trimmed.is_empty() {
        default.trim()
    } else {
        trimmed
    };
    if raw.is_empty() {
        return String::new();
    }

    if let Some(verbatim) = raw.strip_suffix('#') {
        return verbatim.trim_end_matches('/').to_string();
    }

    if VERSION_SUFFIX_RE.is_match(raw) || raw.contains("/v1/") {
        raw.trim_end_matches('/').to_string()
    } else {
        format!("{}/v1", raw.trim_end_matches('/'))
    }
}

/// Root URL of an Ollama server, without any OpenAI compatibility suffix.
pub fn ollama_root_url(configured: &str) -> String {
    let trimmed = configured.trim().trim_end_matches('/');
    let root = VERSION_SUFFIX_RE.replace(trimmed, "");
    root.trim_end_matches('/').to_string()
}

/// Joins a base URL and an endpoint path with exactly one slash.
pub fn endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_v1_when_missing() {
        assert_eq!(
            api_base_url("https://api.deepseek.com", OPENAI_BASE_URL),
            "https://api.deepseek.com/v1"
        );
    }

    #[test]
    fn empty_config_uses_default() {
        assert_eq!(api_base_url("  ", OPENAI_BASE_URL), OPENAI_BASE_URL);
    }

    #[test]
    fn keeps_existing_version() {
        assert_eq!(
            api_base_url("http://localhost:1234/v2/", OPENAI_BASE_URL),
            "http://localhost:1234/v2"
        );
    }

    #[test]
    fn hash_suffix_keeps_url_verbatim() {
        assert_eq!(
            api_base_url("https://proxy.example.com/openai#", OPENAI_BASE_URL),
            "https://proxy.example.com/openai"
        );
    }

    #[test]
    fn ollama_root_drops_compat_suffix() {
        assert_eq!(
            ollama_root_url("http://localhost:11434/v1/"),
            "http://localhost:11434"
        );
        assert_eq!(ollama_root_url("http://gpu-box:11434"), "http://gpu-box:11434");
    }

    #[test]
    fn endpoint_joins_with_one_slash() {
        assert_eq!(
            endpoint("https://api.openai.com/v1/", "/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
    }
}
