//! Optional machine translation into a destination room's locale.
//!
//! Before text goes to the service, fragments that must survive verbatim
//! (links, @mentions, #room references, emoji shortcodes) are swapped for
//! numbered `<span translate="no">` markers, and swapped back afterwards.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use crossbar_config::TranslationConfig;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{TranslateError, TranslateResult};

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, locale: &str) -> TranslateResult<String>;
}

/// A LibreTranslate-compatible `/translate` endpoint.
pub struct HttpTranslator {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: Option<String>,
}

impl HttpTranslator {
    /// `None` when no endpoint is configured.
    pub fn from_config(config: &TranslationConfig) -> TranslateResult<Option<Self>> {
        let Some(endpoint) = config.endpoint.as_deref().filter(|url| !url.is_empty()) else {
            return Ok(None);
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds.max(1)))
            .build()?;
        Ok(Some(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
        }))
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str, locale: &str) -> TranslateResult<String> {
        let request = TranslateRequest {
            q: text,
            source: "auto",
            target: locale,
            format: "html",
            api_key: self.api_key.as_deref(),
        };
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response: TranslateResponse = builder
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response
            .translated_text
            .filter(|text| !text.is_empty())
            .ok_or(TranslateError::EmptyResponse)
    }
}

fn protected_fragment() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"https?://[^\s<>"]+|[@#][\w.\-:]+|:[a-z0-9_+\-]+:"#).ok()
    })
    .as_ref()
}

fn marker() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<span translate="no">(\d+)</span>"#).ok())
        .as_ref()
}

/// Text with its verbatim fragments swapped out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protected {
    pub text: String,
    pub fragments: Vec<String>,
}

/// The service parses `format: html`, so plain text around the markers is
/// escaped on the way out and unescaped on the way back.
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

pub fn protect(text: &str) -> Protected {
    let Some(pattern) = protected_fragment() else {
        return Protected {
            text: escape_html(text),
            fragments: Vec::new(),
        };
    };

    let mut fragments = Vec::new();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for found in pattern.find_iter(text) {
        out.push_str(&escape_html(&text[last..found.start()]));
        out.push_str(&format!(r#"<span translate="no">{}</span>"#, fragments.len()));
        fragments.push(found.as_str().to_string());
        last = found.end();
    }
    out.push_str(&escape_html(&text[last..]));
    Protected { text: out, fragments }
}

/// Put fragments back and unescape the rest. Markers the service mangled
/// into unknown indices stay.
pub fn restore(text: &str, fragments: &[String]) -> String {
    let Some(pattern) = marker() else {
        return unescape_html(text);
    };

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in pattern.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&unescape_html(&text[last..whole.start()]));
        let fragment = caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|index| fragments.get(index));
        out.push_str(fragment.map_or(whole.as_str(), String::as_str));
        last = whole.end();
    }
    out.push_str(&unescape_html(&text[last..]));
    out
}

/// Translate with protection. Any failure falls back to the original text.
pub async fn translate_guarded(translator: &dyn Translator, text: &str, locale: &str) -> String {
    if text.trim().is_empty() || locale.is_empty() {
        return text.to_string();
    }
    let protected = protect(text);
    match translator.translate(&protected.text, locale).await {
        Ok(translated) => {
            debug!(locale, "translated message body");
            restore(&translated, &protected.fragments)
        }
        Err(error) => {
            warn!(locale, %error, "translation failed, relaying original text");
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn protect_and_restore_keep_fragments() {
        let text = "see https://example.com/a?b=1 @alice in #rust :smile:";
        let protected = protect(text);
        assert_eq!(protected.fragments.len(), 4);
        assert!(!protected.text.contains("https://"));
        assert!(protected.text.starts_with(r#"see <span translate="no">0</span>"#));
        assert_eq!(restore(&protected.text, &protected.fragments), text);
    }

    #[test]
    fn restore_leaves_unknown_markers() {
        let text = r#"hola <span translate="no">7</span>"#;
        assert_eq!(restore(text, &["x".to_string()]), text);
    }

    #[test]
    fn markup_characters_in_plain_text_survive() {
        let text = "if a < b && c > d see https://example.com/?x=1&y=2";
        let protected = protect(text);
        assert!(protected
            .text
            .starts_with("if a &lt; b &amp;&amp; c &gt; d see <span"));
        assert_eq!(protected.fragments, vec!["https://example.com/?x=1&y=2"]);
        assert_eq!(restore(&protected.text, &protected.fragments), text);
    }

    #[test]
    fn restore_unescapes_entities_from_the_service() {
        let translated = r#"si a &lt; b &amp; c, dit &quot;oui&quot; <span translate="no">0</span>"#;
        assert_eq!(
            restore(translated, &["@bob".to_string()]),
            r#"si a < b & c, dit "oui" @bob"#
        );
        assert_eq!(restore("l&#39;eau &amp;lt;", &[]), "l'eau &lt;");
    }

    #[tokio::test]
    async fn http_translator_posts_libretranslate_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/translate")
                .header("authorization", "Bearer secret")
                .json_body(json!({
                    "q": r#"hello <span translate="no">0</span>"#,
                    "source": "auto",
                    "target": "es",
                    "format": "html",
                    "api_key": "secret"
                }));
            then.status(200)
                .json_body(json!({"translatedText": r#"hola <span translate="no">0</span>"#}));
        });

        let translator = HttpTranslator::from_config(&TranslationConfig {
            endpoint: Some(server.url("/translate")),
            api_key: Some("secret".to_string()),
            request_timeout_seconds: 5,
        })
        .unwrap()
        .unwrap();

        let out = translate_guarded(&translator, "hello @bob", "es").await;
        mock.assert();
        assert_eq!(out, "hola @bob");
    }

    #[tokio::test]
    async fn service_errors_fall_back_to_original() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/translate");
            then.status(500);
        });

        let translator = HttpTranslator::from_config(&TranslationConfig {
            endpoint: Some(server.url("/translate")),
            api_key: None,
            request_timeout_seconds: 5,
        })
        .unwrap()
        .unwrap();
        assert_eq!(translate_guarded(&translator, "hello", "fr").await, "hello");
    }

    #[test]
    fn no_endpoint_means_no_translator() {
        assert!(HttpTranslator::from_config(&TranslationConfig::default())
            .unwrap()
            .is_none());
    }
}
