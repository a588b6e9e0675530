//! Hitokoto: a random short quote from hitokoto.cn.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::provider::FetchContext;
use crate::provider::FetchError;
use crate::provider::FieldDescriptor;
use crate::provider::FieldValues;
use crate::provider::Payload;
use crate::provider::Provider;
use crate::provider::Rendered;
use crate::provider::SensorDescriptor;
use super::or_unknown;
use super::send_json;

const DEFAULT_URL: &str = "https://v1.hitokoto.cn/";

/// Category name -> the single-letter code the API expects.
const CATEGORIES: &[(&str, &str)] = &[
    ("anime", "a"),
    ("comic", "b"),
    ("game", "c"),
    ("literature", "d"),
    ("original", "e"),
    ("internet", "f"),
    ("other", "g"),
    ("film", "h"),
    ("poetry", "i"),
    ("netease", "j"),
    ("philosophy", "k"),
    ("wit", "l"),
];

const CATEGORY_NAMES: &[&str] = &[
    "anime",
    "comic",
    "game",
    "literature",
    "original",
    "internet",
    "other",
    "film",
    "poetry",
    "netease",
    "philosophy",
    "wit",
];

const SCHEMA: &[FieldDescriptor] = &[
    FieldDescriptor::text("url", "API URL").with_default(DEFAULT_URL),
    FieldDescriptor::select("category", "Category", CATEGORY_NAMES).with_default("philosophy"),
];

const SENSORS: &[SensorDescriptor] = &[SensorDescriptor {
    key: "quote",
    name: "Hitokoto",
    icon: "mdi:format-quote-close",
    unit: None,
}];

#[derive(Debug, Clone, Default, Deserialize)]
struct Quote {
    hitokoto: Option<String>,
    from: Option<String>,
    from_who: Option<String>,
    #[serde(rename = "type")]
    category: Option<String>,
}

pub struct Hitokoto;

fn category_code(name: &str) -> Option<&'static str> {
    CATEGORIES.iter().find(|(n, _)| *n == name).map(|(_, c)| *c)
}

fn category_name(code: &str) -> Option<&'static str> {
    CATEGORIES.iter().find(|(_, c)| *c == code).map(|(n, _)| *n)
}

#[async_trait]
impl Provider for Hitokoto {
    fn id(&self) -> &'static str {
        "hitokoto"
    }

    fn display_name(&self) -> &'static str {
        "Hitokoto"
    }

    fn icon(&self) -> &'static str {
        "mdi:format-quote-close"
    }

    fn config_schema(&self) -> &'static [FieldDescriptor] {
        SCHEMA
    }

    fn sensors(&self) -> &'static [SensorDescriptor] {
        SENSORS
    }

    fn default_interval(&self) -> Duration {
        Duration::from_secs(10 * 60)
    }

    async fn fetch(&self, ctx: &FetchContext, fields: &FieldValues) -> Result<Payload, FetchError> {
        let url = fields.text("url").unwrap_or(DEFAULT_URL);
        let category = fields.text("category").unwrap_or("philosophy");
        let code = category_code(category)
            .ok_or_else(|| FetchError::config(format!("unknown category '{}'", category)))?;

        let quote: Quote = send_json(
            ctx.client
                .get(url)
                .query(&[("c", code)])
                .timeout(ctx.timeout),
        )
        .await?;

        Ok(Payload::new(quote))
    }

    fn render(&self, payload: &Payload) -> Rendered {
        let Some(quote) = payload.downcast_ref::<Quote>() else {
            return self.placeholder(crate::provider::UNKNOWN);
        };

        let mut text = or_unknown(quote.hitokoto.as_deref());
        if let Some(who) = quote.from_who.as_deref().filter(|w| !w.is_empty()) {
            text.push_str(&format!("\n—— {}", who));
        }
        if let Some(from) = quote.from.as_deref().filter(|f| !f.is_empty()) {
            text.push_str(&format!("\n「{}」", from));
        }

        Rendered::default()
            .value("quote", text)
            .attribute("from", &quote.from)
            .attribute("from_who", &quote.from_who)
            .attribute(
                "category",
                quote.category.as_deref().and_then(category_name),
            )
            .attribute("api_source", "hitokoto.cn")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_category_tables_agree() {
        let names: Vec<_> = CATEGORIES.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, CATEGORY_NAMES);
        for name in CATEGORY_NAMES {
            let code = category_code(name).unwrap();
            assert_eq!(category_name(code), Some(*name));
        }
    }

    fn ctx() -> FetchContext {
        FetchContext {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_fetch_quote() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .match_query(mockito::Matcher::UrlEncoded("c".into(), "d".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "hitokoto": "Stay hungry, stay foolish.",
                    "from": "Stanford commencement",
                    "from_who": "Steve Jobs",
                    "type": "d"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let fields = FieldValues::new()
            .with("url", server.url())
            .with("category", "literature")
            .resolve(SCHEMA)
            .unwrap();

        let payload = Hitokoto.fetch(&ctx(), &fields).await.unwrap();
        let rendered = Hitokoto.render(&payload);

        mock.assert_async().await;
        insta::assert_snapshot!(rendered.values["quote"], @r"
        Stay hungry, stay foolish.
        —— Steve Jobs
        「Stanford commencement」
        ");
        assert_eq!(rendered.attributes["category"], "literature");
        assert_eq!(rendered.attributes["api_source"], "hitokoto.cn");
    }

    #[tokio::test]
    async fn test_server_error_is_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/")
            .match_query(mockito::Matcher::Any)
            .with_status(502)
            .create_async()
            .await;

        let fields = FieldValues::new().with("url", server.url());
        let err = Hitokoto.fetch(&ctx(), &fields).await.unwrap_err();

        assert!(matches!(err, FetchError::Status(502)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("<html>rate limited</html>")
            .create_async()
            .await;

        let fields = FieldValues::new().with("url", server.url());
        let err = Hitokoto.fetch(&ctx(), &fields).await.unwrap_err();

        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[test]
    fn test_render_partial_quote() {
        let rendered = Hitokoto.render(&Payload::new(Quote::default()));

        assert_eq!(rendered.values["quote"], "unknown");
        assert!(rendered.attributes.get("from").is_none());
    }
}
