//! Current weather lookup (OpenWeatherMap current-weather endpoint)
//!
//! Only `weather[0].main` is used. Fetch failures never stop the control
//! loop: the last known condition is kept and the failure is counted.

use crate::domain::types::WeatherCondition;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<WeatherCondition>;
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    #[serde(default)]
    weather: Vec<WeatherEntry>,
}

#[derive(Debug, Deserialize)]
struct WeatherEntry {
    main: String,
}

/// Extract the condition from a current-weather JSON body
pub fn parse_weather_body(body: &str) -> anyhow::Result<WeatherCondition> {
    let response: WeatherResponse =
        serde_json::from_str(body).context("Failed to parse weather response")?;
    match response.weather.first() {
        Some(entry) => Ok(WeatherCondition::parse(&entry.main)),
        None => bail!("weather response has no conditions"),
    }
}

pub struct OpenWeatherProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    city: String,
}

impl OpenWeatherProvider {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.weather_timeout())
            .build()
            .context("Failed to build weather HTTP client")?;
        Ok(Self {
            client,
            base_url: config.weather_base_url().to_string(),
            api_key: config.weather_api_key().to_string(),
            city: config.weather_city().to_string(),
        })
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    async fn fetch(&self) -> anyhow::Result<WeatherCondition> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("q", self.city.as_str()), ("appid", self.api_key.as_str())])
            .send()
            .await
            .context("weather request failed")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read weather response")?;
        if !status.is_success() {
            bail!("weather provider returned {}: {}", status.as_u16(), body.trim());
        }
        parse_weather_body(&body)
    }
}

/// Provider used when weather lookups are disabled
pub struct StaticWeather(pub WeatherCondition);

#[async_trait]
impl WeatherProvider for StaticWeather {
    async fn fetch(&self) -> anyhow::Result<WeatherCondition> {
        Ok(self.0.clone())
    }
}

/// Caches the provider's answer for `refresh` and falls back to the last
/// known condition on errors
pub struct WeatherService {
    provider: Box<dyn WeatherProvider>,
    refresh: Duration,
    current: WeatherCondition,
    fetched_at: Option<Instant>,
    metrics: Arc<Metrics>,
}

impl WeatherService {
    pub fn new(provider: Box<dyn WeatherProvider>, refresh: Duration, metrics: Arc<Metrics>) -> Self {
        Self { provider, refresh, current: WeatherCondition::Unknown, fetched_at: None, metrics }
    }

    /// Build the service described by `config`
    pub fn from_config(config: &Config, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let provider: Box<dyn WeatherProvider> = if config.weather_enabled() {
            Box::new(OpenWeatherProvider::new(config)?)
        } else {
            info!("weather_lookup_disabled");
            Box::new(StaticWeather(WeatherCondition::Clear))
        };
        Ok(Self::new(provider, config.weather_refresh(), metrics))
    }

    fn is_stale(&self) -> bool {
        match self.fetched_at {
            None => true,
            Some(at) => self.refresh.is_zero() || at.elapsed() >= self.refresh,
        }
    }

    /// Condition for this tick
    pub async fn current(&mut self) -> WeatherCondition {
        if self.is_stale() {
            // A failed attempt also waits a full refresh interval
            self.fetched_at = Some(Instant::now());
            match self.provider.fetch().await {
                Ok(condition) => {
                    self.metrics.record_weather_fetch(true);
                    if condition != self.current {
                        info!(from = %self.current, to = %condition, "weather_changed");
                    } else {
                        debug!(weather = %condition, "weather_refreshed");
                    }
                    self.current = condition;
                }
                Err(e) => {
                    self.metrics.record_weather_fetch(false);
                    warn!(
                        error = %format!("{:#}", e),
                        keeping = %self.current,
                        "weather_fetch_failed"
                    );
                }
            }
        }
        self.current.clone()
    }
}
