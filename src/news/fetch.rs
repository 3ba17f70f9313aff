//! Hot-news collection over plain HTTP.
//!
//! Fetches the configured portal page, pulls out anchor links as hot
//! topics, then fetches each linked article and strips it down to text.
//! Fetch failures skip the item with a warning; the pipeline works with
//! whatever survived.

use std::time::Duration;

use regex::Regex;
use reqwest::Client;

use crate::core::errors::ApiError;

#[derive(Debug, Clone)]
pub struct ScrapedArticle {
    pub topic: String,
    pub page_title: String,
    pub text: String,
    pub url: String,
    pub site: String,
}

#[derive(Clone)]
pub struct HotNewsFetcher {
    client: Client,
    portal_url: String,
}

impl HotNewsFetcher {
    pub fn new(portal_url: String, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36")
            .build()
            .unwrap_or_default();
        Self { client, portal_url }
    }

    /// (topic text, article url) pairs from the portal front page.
    pub async fn fetch_hot_topics(&self) -> Result<Vec<(String, String)>, ApiError> {
        let html = self.fetch_page(&self.portal_url).await?;
        Ok(extract_anchors(&html))
    }

    pub async fn fetch_article(&self, topic: &str, url: &str) -> Result<ScrapedArticle, ApiError> {
        let html = self.fetch_page(url).await?;
        let page_title = extract_title(&html).unwrap_or_else(|| topic.to_string());
        let text = strip_html_tags(&html);
        let site = site_of(url);

        Ok(ScrapedArticle {
            topic: topic.to_string(),
            page_title,
            text,
            url: url.to_string(),
            site,
        })
    }

    /// Best-effort collection across topics; individual failures are
    /// logged and skipped.
    pub async fn collect(&self, max_topics: usize, max_per_topic: usize) -> Vec<ScrapedArticle> {
        let topics = match self.fetch_hot_topics().await {
            Ok(topics) => topics,
            Err(err) => {
                tracing::warn!("Failed to fetch hot topic list: {}", err);
                return Vec::new();
            }
        };

        let mut articles = Vec::new();
        let mut per_topic: std::collections::HashMap<String, usize> =
            std::collections::HashMap::new();
        let mut seen_topics = std::collections::HashSet::new();

        for (topic, url) in topics {
            if !seen_topics.contains(&topic) && seen_topics.len() >= max_topics {
                continue;
            }
            let count = per_topic.entry(topic.clone()).or_insert(0);
            if *count >= max_per_topic {
                continue;
            }
            seen_topics.insert(topic.clone());

            match self.fetch_article(&topic, &url).await {
                Ok(article) => {
                    *count += 1;
                    articles.push(article);
                }
                Err(err) => {
                    tracing::warn!("Failed to fetch article {}: {}", url, err);
                }
            }
        }

        articles
    }

    async fn fetch_page(&self, url: &str) -> Result<String, ApiError> {
        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ApiError::upstream)?;
        if !res.status().is_success() {
            return Err(ApiError::Upstream(format!(
                "fetch of {} failed with {}",
                url,
                res.status()
            )));
        }
        res.text().await.map_err(ApiError::upstream)
    }
}

/// Absolute http(s) anchors with non-empty text.
pub(crate) fn extract_anchors(html: &str) -> Vec<(String, String)> {
    // anchors whose body is plain text (possibly wrapped in spans)
    let re = Regex::new(r#"(?s)<a[^>]*href="(https?://[^"]+)"[^>]*>(.*?)</a>"#).unwrap();
    let tag_re = Regex::new(r"<[^>]*>").unwrap();

    let mut anchors = Vec::new();
    for cap in re.captures_iter(html) {
        let href = cap[1].to_string();
        let text = tag_re.replace_all(&cap[2], "").trim().to_string();
        if text.is_empty() {
            continue;
        }
        anchors.push((text, href));
    }
    anchors
}

pub(crate) fn extract_title(html: &str) -> Option<String> {
    let re = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap();
    re.captures(html)
        .map(|cap| cap[1].trim().to_string())
        .filter(|t| !t.is_empty())
}

fn site_of(url: &str) -> String {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or("")
        .to_string()
}

/// Simple HTML tag stripper, script/style aware.
pub(crate) fn strip_html_tags(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    let mut in_script = false;
    let mut in_style = false;

    let html_lower = html.to_lowercase();
    let chars: Vec<char> = html.chars().collect();
    let chars_lower: Vec<char> = html_lower.chars().collect();

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];

        if i + 7 < chars.len() {
            let tag: String = chars_lower[i..i + 7].iter().collect();
            if tag == "<script" {
                in_script = true;
            } else if i + 6 < chars.len()
                && chars_lower[i..i + 6].iter().collect::<String>() == "<style"
            {
                in_style = true;
            }
        }

        if in_script && i + 9 <= chars.len() {
            let tag: String = chars_lower[i..i + 9].iter().collect();
            if tag == "</script>" {
                in_script = false;
                i += 9;
                continue;
            }
        }
        if in_style && i + 8 <= chars.len() {
            let tag: String = chars_lower[i..i + 8].iter().collect();
            if tag == "</style>" {
                in_style = false;
                i += 8;
                continue;
            }
        }

        if in_script || in_style {
            i += 1;
            continue;
        }

        if c == '<' {
            in_tag = true;
        } else if c == '>' {
            in_tag = false;
        } else if !in_tag {
            result.push(c);
        }

        i += 1;
    }

    let lines: Vec<&str> = result
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_scripts_and_styles() {
        let html = r#"
            <html>
            <head><script>var x = 1;</script><style>p { color: red }</style></head>
            <body>
                <h1>Hello</h1>
                <p>World</p>
            </body>
            </html>
        "#;

        let text = strip_html_tags(html);
        assert!(text.contains("Hello"));
        assert!(text.contains("World"));
        assert!(!text.contains("<"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn anchors_are_extracted_with_text() {
        let html = r#"
            <a href="https://example.com/a">First story</a>
            <a href="/relative">skipped</a>
            <a href="http://example.com/b"><span>Second</span> story</a>
            <a href="https://example.com/c">   </a>
        "#;
        let anchors = extract_anchors(html);
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[0], ("First story".to_string(), "https://example.com/a".to_string()));
        assert_eq!(anchors[1].0, "Second story");
    }

    #[test]
    fn title_extraction() {
        assert_eq!(
            extract_title("<html><title> A headline </title></html>"),
            Some("A headline".to_string())
        );
        assert_eq!(extract_title("<html><body>no title</body></html>"), None);
    }

    #[test]
    fn site_of_strips_scheme_and_path() {
        assert_eq!(site_of("https://news.example.com/a/b"), "news.example.com");
        assert_eq!(site_of("http://example.com"), "example.com");
    }
}
