//! Research lookup proxied through the server so clients avoid cross-origin calls.
//!
//! Wikipedia summaries are tried first, then the DuckDuckGo instant answer
//! (abstract, then first related topic). When both come up empty the caller
//! still gets a friendly canned answer.

use reqwest::Url;
use serde::Serialize;
use serde_json::Value;

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchAnswer {
    pub source: String,
    pub title: String,
    pub content: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct SearchClient {
    client: reqwest::Client,
    wikipedia_api_url: String,
    duckduckgo_api_url: String,
}

impl SearchClient {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(config.search_timeout)
            .build()
            .map_err(|error| AppError::internal(format!("failed to build search client: {error}")))?;
        Ok(Self {
            client,
            wikipedia_api_url: config.wikipedia_api_url.clone(),
            duckduckgo_api_url: config.duckduckgo_api_url.clone(),
        })
    }

    /// Never fails: upstream errors fall through to the next source.
    pub async fn lookup(&self, query: &str) -> SearchAnswer {
        match self.wikipedia(query).await {
            Ok(Some(answer)) => return answer,
            Ok(None) => {}
            Err(error) => tracing::info!(%error, "Wikipedia search failed"),
        }
        match self.duckduckgo(query).await {
            Ok(Some(answer)) => return answer,
            Ok(None) => {}
            Err(error) => tracing::info!(%error, "DuckDuckGo search failed"),
        }
        fallback_answer(query)
    }

    async fn wikipedia(&self, query: &str) -> Result<Option<SearchAnswer>, String> {
        let mut url = Url::parse(&self.wikipedia_api_url).map_err(|error| error.to_string())?;
        url.path_segments_mut()
            .map_err(|()| "Wikipedia API URL cannot take a path".to_string())?
            .pop_if_empty()
            .push(query);

        let Some(payload) = self.fetch_json(url).await? else {
            return Ok(None);
        };
        Ok(parse_wikipedia(&payload))
    }

    async fn duckduckgo(&self, query: &str) -> Result<Option<SearchAnswer>, String> {
        let url = Url::parse_with_params(
            &self.duckduckgo_api_url,
            &[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ],
        )
        .map_err(|error| error.to_string())?;

        let Some(payload) = self.fetch_json(url).await? else {
            return Ok(None);
        };
        Ok(parse_duckduckgo(&payload, query))
    }

    /// `None` for a non-success status, which is an ordinary "no answer".
    async fn fetch_json(&self, url: Url) -> Result<Option<Value>, String> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|error| error.to_string())?;
        if !response.status().is_success() {
            return Ok(None);
        }
        response
            .json::<Value>()
            .await
            .map(Some)
            .map_err(|error| error.to_string())
    }
}

pub fn parse_wikipedia(payload: &Value) -> Option<SearchAnswer> {
    let extract = non_empty_str(payload.get("extract"))?;
    Some(SearchAnswer {
        source: "Wikipedia".to_string(),
        title: non_empty_str(payload.get("title")).unwrap_or_default().to_string(),
        content: extract.to_string(),
        url: non_empty_str(payload.pointer("/content_urls/desktop/page"))
            .unwrap_or_default()
            .to_string(),
    })
}

pub fn parse_duckduckgo(payload: &Value, query: &str) -> Option<SearchAnswer> {
    if let Some(text) = non_empty_str(payload.get("AbstractText")) {
        return Some(SearchAnswer {
            source: non_empty_str(payload.get("AbstractSource"))
                .unwrap_or("Web Search")
                .to_string(),
            title: non_empty_str(payload.get("Heading"))
                .unwrap_or(query)
                .to_string(),
            content: text.to_string(),
            url: non_empty_str(payload.get("AbstractURL"))
                .unwrap_or_default()
                .to_string(),
        });
    }

    let topic = payload.get("RelatedTopics")?.as_array()?.first()?;
    let text = non_empty_str(topic.get("Text"))?;
    let first_url = non_empty_str(topic.get("FirstURL"));
    let title = first_url
        .and_then(|url| url.rsplit('/').next())
        .filter(|segment| !segment.is_empty())
        .map_or_else(|| query.to_string(), |segment| segment.replace('_', " "));

    Some(SearchAnswer {
        source: "DuckDuckGo".to_string(),
        title,
        content: text.to_string(),
        url: first_url.unwrap_or_default().to_string(),
    })
}

pub fn fallback_answer(query: &str) -> SearchAnswer {
    SearchAnswer {
        source: "Knowledge Base".to_string(),
        title: query.to_string(),
        content: format!(
            "I searched for \"{query}\" but couldn't find specific information from external \
             sources at the moment.\n\n\
             **Tips:**\n\
             - Be more specific with your question\n\
             - Break complex topics into smaller questions\n\
             - Try different keywords, such as \"What is ...?\" or \"Who was ...?\""
        ),
        url: String::new(),
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn wikipedia_summary_with_extract_is_an_answer() {
        let payload = json!({
            "title": "Rust (programming language)",
            "extract": "Rust is a general-purpose programming language.",
            "content_urls": {"desktop": {"page": "https://en.wikipedia.org/wiki/Rust"}}
        });
        assert_eq!(
            parse_wikipedia(&payload),
            Some(SearchAnswer {
                source: "Wikipedia".to_string(),
                title: "Rust (programming language)".to_string(),
                content: "Rust is a general-purpose programming language.".to_string(),
                url: "https://en.wikipedia.org/wiki/Rust".to_string(),
            })
        );
        assert_eq!(parse_wikipedia(&json!({"title": "Empty", "extract": ""})), None);
    }

    #[test]
    fn duckduckgo_prefers_abstract() {
        let payload = json!({
            "AbstractText": "An abstract.",
            "AbstractSource": "Encyclopedia",
            "Heading": "",
            "RelatedTopics": [{"Text": "ignored", "FirstURL": "https://duckduckgo.com/x"}]
        });
        let answer = parse_duckduckgo(&payload, "query").unwrap();
        assert_eq!(answer.source, "Encyclopedia");
        assert_eq!(answer.title, "query");
        assert_eq!(answer.content, "An abstract.");
    }

    #[test]
    fn duckduckgo_falls_back_to_first_related_topic() {
        let payload = json!({
            "AbstractText": "",
            "RelatedTopics": [{"Text": "Family trees chart ancestry.", "FirstURL": "https://duckduckgo.com/Family_tree"}]
        });
        let answer = parse_duckduckgo(&payload, "genealogy").unwrap();
        assert_eq!(answer.source, "DuckDuckGo");
        assert_eq!(answer.title, "Family tree");
        assert_eq!(answer.url, "https://duckduckgo.com/Family_tree");

        assert_eq!(parse_duckduckgo(&json!({"RelatedTopics": []}), "q"), None);
    }

    #[tokio::test]
    async fn unreachable_sources_yield_fallback() {
        let config = AppConfig {
            wikipedia_api_url: "http://127.0.0.1:9/summary".to_string(),
            duckduckgo_api_url: "http://127.0.0.1:9/".to_string(),
            search_timeout: std::time::Duration::from_secs(1),
            ..AppConfig::from_lookup(|_| None).unwrap()
        };
        let client = SearchClient::from_config(&config).unwrap();

        let answer = client.lookup("grandma's recipes").await;
        assert_eq!(answer, fallback_answer("grandma's recipes"));
        assert!(answer.content.contains("grandma's recipes"));
    }
}
