//! Three day forecast from QWeather.
//!
//! `location` may be a QWeather location id, a `lon,lat` pair, or a place name.
//! Place names go through the geo lookup once and the resolved id is cached.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
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

const DEFAULT_URL: &str = "https://devapi.qweather.com/v7/weather/3d";
const DEFAULT_GEO_URL: &str = "https://geoapi.qweather.com/v2/city/lookup";

const LANGUAGES: &[&str] = &["zh", "zh-hant", "en", "ja", "ko", "fr", "de", "es", "ru"];

const SCHEMA: &[FieldDescriptor] = &[
    FieldDescriptor::text("url", "Forecast URL").with_default(DEFAULT_URL),
    FieldDescriptor::text("geo_url", "Geo lookup URL").with_default(DEFAULT_GEO_URL),
    FieldDescriptor::text("location", "Location").required(),
    FieldDescriptor::secret("api_key", "API key").required(),
    FieldDescriptor::select("lang", "Language", LANGUAGES).with_default("zh"),
];

const SENSORS: &[SensorDescriptor] = &[
    SensorDescriptor {
        key: "today",
        name: "Weather today",
        icon: "mdi:calendar-today",
        unit: None,
    },
    SensorDescriptor {
        key: "tomorrow",
        name: "Weather tomorrow",
        icon: "mdi:calendar-arrow-right",
        unit: None,
    },
    SensorDescriptor {
        key: "day_after",
        name: "Weather day after tomorrow",
        icon: "mdi:calendar-end",
        unit: None,
    },
];

#[derive(Debug, Deserialize)]
struct GeoResponse {
    code: String,
    #[serde(default)]
    location: Vec<GeoLocation>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeoLocation {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForecastResponse {
    code: String,
    update_time: Option<String>,
    #[serde(default)]
    daily: Vec<Day>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct Day {
    fx_date: Option<String>,
    text_day: Option<String>,
    text_night: Option<String>,
    temp_min: Option<String>,
    temp_max: Option<String>,
    humidity: Option<String>,
    precip: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct Forecast {
    location: String,
    update_time: Option<String>,
    days: Vec<Day>,
}

pub struct Weather {
    /// Place name -> resolved location.
    locations: Mutex<HashMap<String, GeoLocation>>,
}

impl Weather {
    pub fn new() -> Self {
        Self {
            locations: Mutex::new(HashMap::new()),
        }
    }

    async fn resolve_location(
        &self,
        ctx: &FetchContext,
        geo_url: &str,
        location: &str,
        api_key: &str,
    ) -> Result<GeoLocation, FetchError> {
        if is_direct(location) {
            return Ok(GeoLocation {
                id: location.to_string(),
                name: location.to_string(),
            });
        }

        let cached = self.cache().get(location).cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        debug!("[weather] Looking up location '{}'", location);
        let response: GeoResponse = send_json(
            ctx.client
                .get(geo_url)
                .query(&[("location", location), ("key", api_key)])
                .timeout(ctx.timeout),
        )
        .await?;
        check_code(&response.code)?;

        let resolved = response
            .location
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::config(format!("no location matches '{}'", location)))?;

        self.cache().insert(location.to_string(), resolved.clone());
        Ok(resolved)
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, GeoLocation>> {
        self.locations.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Weather {
    fn default() -> Self {
        Self::new()
    }
}

/// Location ids and `lon,lat` pairs are accepted by the forecast API as is.
fn is_direct(location: &str) -> bool {
    if location.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    match location.split_once(',') {
        Some((lon, lat)) => lon.trim().parse::<f64>().is_ok() && lat.trim().parse::<f64>().is_ok(),
        None => false,
    }
}

fn check_code(code: &str) -> Result<(), FetchError> {
    match code {
        "200" => Ok(()),
        "401" | "402" | "403" => Err(FetchError::auth(format!("QWeather returned code {}", code))),
        other => Err(FetchError::parse(format!("QWeather returned code {}", other))),
    }
}

fn describe(day: Option<&Day>) -> String {
    let Some(day) = day else {
        return UNKNOWN.to_string();
    };

    format!(
        "{}/{}\n{}~{}°C\nhumidity {}%\nprecip {}mm",
        or_unknown(day.text_day.as_deref()),
        or_unknown(day.text_night.as_deref()),
        or_unknown(day.temp_min.as_deref()),
        or_unknown(day.temp_max.as_deref()),
        or_unknown(day.humidity.as_deref()),
        day.precip.as_deref().unwrap_or("0"),
    )
}

#[async_trait]
impl Provider for Weather {
    fn id(&self) -> &'static str {
        "weather"
    }

    fn display_name(&self) -> &'static str {
        "Weather"
    }

    fn icon(&self) -> &'static str {
        "mdi:weather-partly-cloudy"
    }

    fn config_schema(&self) -> &'static [FieldDescriptor] {
        SCHEMA
    }

    fn sensors(&self) -> &'static [SensorDescriptor] {
        SENSORS
    }

    fn default_interval(&self) -> Duration {
        Duration::from_secs(30 * 60)
    }

    async fn fetch(&self, ctx: &FetchContext, fields: &FieldValues) -> Result<Payload, FetchError> {
        let url = fields.text("url").unwrap_or(DEFAULT_URL);
        let geo_url = fields.text("geo_url").unwrap_or(DEFAULT_GEO_URL);
        let lang = fields.text("lang").unwrap_or("zh");
        let location = fields
            .text("location")
            .ok_or_else(|| FetchError::config("location is not set"))?;
        let api_key = fields
            .text("api_key")
            .ok_or_else(|| FetchError::config("api_key is not set"))?;

        let resolved = self
            .resolve_location(ctx, geo_url, location, api_key)
            .await?;

        let response: ForecastResponse = send_json(
            ctx.client
                .get(url)
                .query(&[
                    ("location", resolved.id.as_str()),
                    ("key", api_key),
                    ("lang", lang),
                    ("unit", "m"),
                ])
                .timeout(ctx.timeout),
        )
        .await?;
        check_code(&response.code)?;

        Ok(Payload::new(Forecast {
            location: resolved.name,
            update_time: response.update_time,
            days: response.daily,
        }))
    }

    async fn invalidate_credentials(&self) {
        self.cache().clear();
    }

    fn render(&self, payload: &Payload) -> Rendered {
        let Some(forecast) = payload.downcast_ref::<Forecast>() else {
            return self.placeholder(UNKNOWN);
        };

        SENSORS
            .iter()
            .enumerate()
            .fold(Rendered::default(), |rendered, (i, sensor)| {
                rendered.value(sensor.key, describe(forecast.days.get(i)))
            })
            .attribute("location", &forecast.location)
            .attribute("update_time", &forecast.update_time)
            .attribute("forecast", &forecast.days)
            .attribute("api_source", "qweather.com")
    }
}
