//! Daily poetry from jinrishici.com.
//!
//! The sentence endpoint wants an `X-User-Token` header. A token is requested
//! once and reused until the API rejects it.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::provider::FetchContext;
use crate::provider::FetchError;
use crate::provider::FieldDescriptor;
use crate::provider::FieldValues;
use crate::provider::Payload;
use crate::provider::Provider;
use crate::provider::Rendered;
use crate::provider::SensorDescriptor;
use crate::provider::UNKNOWN;
use super::or_unknown;
use super::send_json;

const DEFAULT_URL: &str = "https://v2.jinrishici.com/sentence";
const DEFAULT_TOKEN_URL: &str = "https://v2.jinrishici.com/token";

const SCHEMA: &[FieldDescriptor] = &[
    FieldDescriptor::text("url", "Sentence URL").with_default(DEFAULT_URL),
    FieldDescriptor::text("token_url", "Token URL").with_default(DEFAULT_TOKEN_URL),
];

const SENSORS: &[SensorDescriptor] = &[SensorDescriptor {
    key: "verse",
    name: "Daily poetry",
    icon: "mdi:book-open-variant",
    unit: None,
}];

#[derive(Debug, Deserialize)]
struct TokenResponse {
    status: String,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentenceResponse {
    status: String,
    data: Option<Sentence>,
    err_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Sentence {
    content: Option<String>,
    #[serde(default)]
    origin: Origin,
}

#[derive(Debug, Default, Deserialize)]
struct Origin {
    title: Option<String>,
    dynasty: Option<String>,
    author: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct Poem {
    content: Option<String>,
    title: Option<String>,
    dynasty: Option<String>,
    author: Option<String>,
}

pub struct Poetry {
    token: Mutex<Option<String>>,
}

impl Poetry {
    pub fn new() -> Self {
        Self {
            token: Mutex::new(None),
        }
    }

    async fn token(&self, ctx: &FetchContext, token_url: &str) -> Result<String, FetchError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        debug!("[poetry] Requesting token");
        let response: TokenResponse =
            send_json(ctx.client.get(token_url).timeout(ctx.timeout)).await?;

        if response.status != "success" {
            return Err(FetchError::auth(format!(
                "token request returned status '{}'",
                response.status
            )));
        }

        let token = response
            .data
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FetchError::parse("token response has no token"))?;

        *cached = Some(token.clone());
        Ok(token)
    }
}

impl Default for Poetry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for Poetry {
    fn id(&self) -> &'static str {
        "poetry"
    }

    fn display_name(&self) -> &'static str {
        "Daily poetry"
    }

    fn icon(&self) -> &'static str {
        "mdi:book-open-variant"
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
        let token_url = fields.text("token_url").unwrap_or(DEFAULT_TOKEN_URL);

        let token = self.token(ctx, token_url).await?;

        let response: SentenceResponse = send_json(
            ctx.client
                .get(url)
                .header("X-User-Token", token)
                .timeout(ctx.timeout),
        )
        .await?;

        // Error bodies from this API almost always mean the token is bad
        if response.status != "success" {
            return Err(FetchError::auth(
                response
                    .err_message
                    .unwrap_or_else(|| format!("status '{}'", response.status)),
            ));
        }

        let sentence = response
            .data
            .ok_or_else(|| FetchError::parse("response has no data"))?;

        Ok(Payload::new(Poem {
            content: sentence.content,
            title: sentence.origin.title,
            dynasty: sentence.origin.dynasty,
            author: sentence.origin.author,
        }))
    }

    async fn invalidate_credentials(&self) {
        self.token.lock().await.take();
    }

    fn render(&self, payload: &Payload) -> Rendered {
        let Some(poem) = payload.downcast_ref::<Poem>() else {
            return self.placeholder(UNKNOWN);
        };

        let verse = format!(
            "{}\n—— {}·{}\n《{}》",
            or_unknown(poem.content.as_deref()),
            or_unknown(poem.dynasty.as_deref()),
            or_unknown(poem.author.as_deref()),
            or_unknown(poem.title.as_deref()),
        );

        Rendered::default()
            .value("verse", verse)
            .attribute("content", &poem.content)
            .attribute("dynasty", &poem.dynasty)
            .attribute("author", &poem.author)
            .attribute("origin", &poem.title)
            .attribute("api_source", "jinrishici.com")
    }
}
