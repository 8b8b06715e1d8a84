//! The `weather` tool: current conditions and multi-day forecasts from
//! OpenWeatherMap.

use super::args::{opt_u32, parse_args};
use super::core::{Tool, ToolArgs, ToolFuture};
use super::rate_limit::RateLimit;
use crate::error::ToolError;
use crate::{ToolDef, json_schema_for};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{debug, info};

const MAX_FORECAST_DAYS: u32 = 7;

/// OpenWeatherMap settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub api_key: Option<String>,
    /// Default: `https://api.openweathermap.org/data/2.5`.
    pub base_url: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openweathermap.org/data/2.5".into(),
        }
    }
}

#[derive(Deserialize, JsonSchema)]
struct WeatherArgs {
    /// Location to get weather for: city name, 5-digit US zip code, or 'lat,lon' coordinates.
    location: String,
    /// Number of days to forecast (0 for current weather only, max 7).
    #[serde(default, deserialize_with = "opt_u32")]
    #[schemars(with = "Option<u32>")]
    forecast_days: Option<u32>,
    /// Unit system: 'metric' (default) or 'imperial'.
    #[serde(default)]
    units: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Units {
    Metric,
    Imperial,
}

impl Units {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("imperial") => Units::Imperial,
            _ => Units::Metric,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
        }
    }

    fn temp(self) -> &'static str {
        match self {
            Units::Metric => "°C",
            Units::Imperial => "°F",
        }
    }

    fn speed(self) -> &'static str {
        match self {
            Units::Metric => "m/s",
            Units::Imperial => "mph",
        }
    }
}

// ── Response shapes ────────────────────────────────────────────────

#[derive(Deserialize, Debug, Default)]
struct Main {
    temp: Option<f64>,
    feels_like: Option<f64>,
    temp_min: Option<f64>,
    temp_max: Option<f64>,
    humidity: Option<f64>,
    pressure: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
struct Condition {
    id: Option<i64>,
    #[serde(default)]
    description: String,
    icon: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct Wind {
    speed: Option<f64>,
    deg: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
struct Clouds {
    all: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
struct Sys {
    #[serde(default)]
    country: String,
    sunrise: Option<i64>,
    sunset: Option<i64>,
}

#[derive(Deserialize, Debug)]
struct CurrentResponse {
    name: Option<String>,
    #[serde(default)]
    main: Main,
    #[serde(default)]
    weather: Vec<Condition>,
    #[serde(default)]
    wind: Wind,
    #[serde(default)]
    clouds: Clouds,
    #[serde(default)]
    sys: Sys,
    dt: Option<i64>,
    /// Shift from UTC in seconds.
    #[serde(default)]
    timezone: i64,
}

#[derive(Deserialize, Debug)]
struct ForecastResponse {
    #[serde(default)]
    list: Vec<ForecastItem>,
    #[serde(default)]
    city: City,
}

#[derive(Deserialize, Debug)]
struct ForecastItem {
    dt: i64,
    #[serde(default)]
    main: Main,
    #[serde(default)]
    weather: Vec<Condition>,
    #[serde(default)]
    wind: Wind,
    #[serde(default)]
    clouds: Clouds,
}

#[derive(Deserialize, Debug, Default)]
struct City {
    name: Option<String>,
    #[serde(default)]
    country: String,
    #[serde(default)]
    timezone: i64,
}

// ── Tool ───────────────────────────────────────────────────────────

/// The `weather` tool.
#[derive(Debug, Clone)]
pub struct WeatherTool {
    config: WeatherConfig,
    client: reqwest::Client,
}

impl WeatherTool {
    pub fn new(config: WeatherConfig) -> Self {
        Self {
            config,
            client: super::http_client(),
        }
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        location: &str,
        units: Units,
        api_key: &str,
    ) -> Result<T, ToolError> {
        let mut params = location_params(location);
        params.push(("appid", api_key.to_string()));
        params.push(("units", units.as_str().to_string()));
        let url = reqwest::Url::parse_with_params(
            &format!("{}/{endpoint}", self.config.base_url.trim_end_matches('/')),
            &params,
        )
        .map_err(|e| ToolError::Unavailable(format!("invalid weather API URL: {e}")))?;

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ToolError::Unavailable(format!("Location '{location}' not found")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ToolError::Unavailable(format!(
                "Weather API returned status code {}: {text}",
                status.as_u16()
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ToolError::Unavailable(format!("unexpected weather API response: {e}")))
    }

    async fn current(&self, location: &str, units: Units, api_key: &str) -> Result<Value, ToolError> {
        let data: CurrentResponse = self.fetch("weather", location, units, api_key).await?;
        let condition = data.weather.into_iter().next().unwrap_or_default();
        let local_time = |ts: Option<i64>| {
            ts.and_then(|t| DateTime::<Utc>::from_timestamp(t + data.timezone, 0))
                .map_or_else(|| "N/A".to_string(), |d| d.format("%H:%M").to_string())
        };
        Ok(json!({
            "location": data.name.unwrap_or_else(|| location.to_string()),
            "country": data.sys.country,
            "description": capitalize(&condition.description),
            "temperature": with_unit(data.main.temp, units.temp()),
            "feels_like": with_unit(data.main.feels_like, units.temp()),
            "humidity": with_unit(data.main.humidity, "%"),
            "pressure": with_unit(data.main.pressure, "hPa"),
            "wind_speed": with_unit(data.wind.speed, units.speed()),
            "wind_direction": wind_direction(data.wind.deg),
            "cloudiness": with_unit(data.clouds.all, "%"),
            "sunrise": local_time(data.sys.sunrise),
            "sunset": local_time(data.sys.sunset),
            "weather_id": condition.id,
            "icon": condition.icon,
            "units": units.as_str(),
            "timestamp": data.dt,
        }))
    }

    async fn forecast(
        &self,
        location: &str,
        days: u32,
        units: Units,
        api_key: &str,
    ) -> Result<Value, ToolError> {
        let data: ForecastResponse = self.fetch("forecast", location, units, api_key).await?;
        let shift = data.city.timezone;

        let mut by_date: BTreeMap<String, Vec<ForecastItem>> = BTreeMap::new();
        for item in data.list {
            let Some(local) = DateTime::<Utc>::from_timestamp(item.dt + shift, 0) else {
                continue;
            };
            by_date
                .entry(local.format("%Y-%m-%d").to_string())
                .or_default()
                .push(item);
        }

        let forecast: Vec<Value> = by_date
            .into_iter()
            .take(days as usize)
            .map(|(date, items)| summarize_day(&date, &items, shift, units))
            .collect();

        Ok(json!({
            "location": data.city.name.unwrap_or_else(|| location.to_string()),
            "country": data.city.country,
            "forecast_days": forecast.len(),
            "units": units.as_str(),
            "forecast": forecast,
        }))
    }
}

impl Tool for WeatherTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "weather",
            "Get current weather conditions or forecasts for a location",
            json_schema_for::<WeatherArgs>(),
        )
    }

    fn execute<'a>(&'a self, arguments: &'a ToolArgs) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: WeatherArgs = parse_args(arguments)?;
            let location = args.location.trim();
            if location.is_empty() {
                return Err(ToolError::invalid("location must not be empty"));
            }
            let days = args.forecast_days.unwrap_or(0).min(MAX_FORECAST_DAYS);
            let units = Units::parse(args.units.as_deref());

            let Some(api_key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) else {
                return Err(ToolError::Unavailable(
                    "No OpenWeatherMap API key configured. Set OPENWEATHERMAP_API_KEY to enable weather lookups."
                        .into(),
                ));
            };

            info!("Getting weather for '{location}' (forecast days: {days})");
            if days == 0 {
                self.current(location, units, api_key).await
            } else {
                self.forecast(location, days, units, api_key).await
            }
        })
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        Some(RateLimit::per_minute(10))
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// `lat,lon` coordinates, a 5-digit US zip, or a free-text place name.
fn location_params(location: &str) -> Vec<(&'static str, String)> {
    if let Some((lat, lon)) = location.split_once(',') {
        let numeric = |s: &str| s.trim().parse::<f64>().is_ok();
        if numeric(lat) && numeric(lon) {
            return vec![("lat", lat.trim().into()), ("lon", lon.trim().into())];
        }
    }
    if location.len() == 5 && location.chars().all(|c| c.is_ascii_digit()) {
        return vec![("zip", location.into())];
    }
    vec![("q", location.into())]
}

fn summarize_day(date: &str, items: &[ForecastItem], shift: i64, units: Units) -> Value {
    let min = items
        .iter()
        .filter_map(|i| i.main.temp_min.or(i.main.temp))
        .fold(f64::INFINITY, f64::min);
    let max = items
        .iter()
        .filter_map(|i| i.main.temp_max.or(i.main.temp))
        .fold(f64::NEG_INFINITY, f64::max);
    let avg = |f: &dyn Fn(&ForecastItem) -> Option<f64>| {
        let values: Vec<f64> = items.iter().filter_map(f).collect();
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    };
    let humidity = avg(&|i| i.main.humidity);
    let wind = avg(&|i| i.wind.speed);

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for item in items {
        if let Some(c) = item.weather.first() {
            *counts.entry(c.description.as_str()).or_default() += 1;
        }
    }
    let description = counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(d, _)| capitalize(d))
        .unwrap_or_default();

    let details: Vec<Value> = items
        .iter()
        .map(|item| {
            let condition = item.weather.first();
            let time = DateTime::<Utc>::from_timestamp(item.dt + shift, 0)
                .map(|d| d.format("%H:%M").to_string())
                .unwrap_or_default();
            json!({
                "time": time,
                "temp": with_unit(item.main.temp, units.temp()),
                "description": capitalize(condition.map_or("", |c| c.description.as_str())),
                "humidity": with_unit(item.main.humidity, "%"),
                "wind": with_unit(item.wind.speed, units.speed()),
                "clouds": with_unit(item.clouds.all, "%"),
                "icon": condition.and_then(|c| c.icon.clone()),
            })
        })
        .collect();

    let day_name = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|d| d.format("%A").to_string())
        .unwrap_or_default();
    debug!("Forecast {date}: {} samples", items.len());

    json!({
        "date": date,
        "day_name": day_name,
        "min_temp": with_unit(min.is_finite().then_some(min), units.temp()),
        "max_temp": with_unit(max.is_finite().then_some(max), units.temp()),
        "description": description,
        "humidity": format!("{}%", humidity as i64),
        "wind": format!("{wind:.1} {}", units.speed()),
        "details": details,
    })
}

fn with_unit(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) if unit == "%" => format!("{v}%"),
        Some(v) => format!("{v} {unit}"),
        None if unit == "%" => "N/A%".into(),
        None => format!("N/A {unit}"),
    }
}

/// 16-point compass direction for a bearing in degrees.
pub fn wind_direction(degrees: Option<f64>) -> &'static str {
    const DIRECTIONS: [&str; 16] = [
        "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW",
        "NW", "NNW",
    ];
    match degrees {
        Some(d) if d.is_finite() => {
            let index = (d.rem_euclid(360.0) / 22.5).round() as usize % 16;
            DIRECTIONS[index]
        }
        _ => "Unknown",
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tool_for(server: &MockServer) -> WeatherTool {
        WeatherTool::new(WeatherConfig {
            api_key: Some("owm-key".into()),
            base_url: server.uri(),
        })
    }

    fn args(v: Value) -> ToolArgs {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn location_kinds() {
        assert_eq!(
            location_params("51.5, -0.12"),
            vec![("lat", "51.5".to_string()), ("lon", "-0.12".to_string())]
        );
        assert_eq!(location_params("10001"), vec![("zip", "10001".to_string())]);
        assert_eq!(
            location_params("Paris, FR"),
            vec![("q", "Paris, FR".to_string())]
        );
    }

    #[test]
    fn compass() {
        assert_eq!(wind_direction(Some(0.0)), "N");
        assert_eq!(wind_direction(Some(350.0)), "N");
        assert_eq!(wind_direction(Some(90.0)), "E");
        assert_eq!(wind_direction(Some(202.5)), "SSW");
        assert_eq!(wind_direction(None), "Unknown");
    }

    #[tokio::test]
    async fn without_key_is_unavailable() {
        let tool = WeatherTool::new(WeatherConfig::default());
        let err = tool
            .execute(&args(json!({"location": "Oslo"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("OPENWEATHERMAP_API_KEY"));
    }

    #[tokio::test]
    async fn current_weather() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/weather"))
            .and(query_param("q", "London"))
            .and(query_param("appid", "owm-key"))
            .and(query_param("units", "metric"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "London",
                "main": {"temp": 12.5, "feels_like": 11.0, "humidity": 80, "pressure": 1012},
                "weather": [{"id": 500, "description": "light rain", "icon": "10d"}],
                "wind": {"speed": 4.1, "deg": 225},
                "clouds": {"all": 90},
                "sys": {"country": "GB", "sunrise": 1710482400, "sunset": 1710525600},
                "dt": 1710500000,
                "timezone": 0
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = tool_for(&server)
            .execute(&args(json!({"location": "London"})))
            .await
            .unwrap();
        assert_eq!(result["location"], "London");
        assert_eq!(result["description"], "Light rain");
        assert_eq!(result["temperature"], "12.5 °C");
        assert_eq!(result["humidity"], "80%");
        assert_eq!(result["wind_direction"], "SW");
        assert_eq!(result["sunrise"], "06:00");
    }

    #[tokio::test]
    async fn forecast_groups_by_day_and_string_days_work() {
        let server = MockServer::start().await;
        let item = |dt: i64, temp: f64, desc: &str| {
            json!({
                "dt": dt,
                "main": {"temp": temp, "temp_min": temp - 1.0, "temp_max": temp + 1.0, "humidity": 50},
                "weather": [{"description": desc, "icon": "01d"}],
                "wind": {"speed": 2.0},
                "clouds": {"all": 10}
            })
        };
        // 2024-03-15 00:00 UTC = 1710460800
        let day1 = 1_710_460_800;
        let day2 = day1 + 86_400;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .and(query_param("units", "imperial"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "city": {"name": "Oslo", "country": "NO", "timezone": 0},
                "list": [
                    item(day1 + 3600, 40.0, "clear sky"),
                    item(day1 + 7200, 44.0, "clear sky"),
                    item(day1 + 10800, 42.0, "few clouds"),
                    item(day2 + 3600, 50.0, "rain"),
                ]
            })))
            .mount(&server)
            .await;

        let result = tool_for(&server)
            .execute(&args(json!({"location": "Oslo", "forecast_days": "1", "units": "imperial"})))
            .await
            .unwrap();
        assert_eq!(result["forecast_days"], 1);
        let day = &result["forecast"][0];
        assert_eq!(day["date"], "2024-03-15");
        assert_eq!(day["day_name"], "Friday");
        assert_eq!(day["min_temp"], "39 °F");
        assert_eq!(day["max_temp"], "45 °F");
        assert_eq!(day["description"], "Clear sky");
        assert_eq!(day["details"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unknown_location() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("city not found"))
            .mount(&server)
            .await;

        let err = tool_for(&server)
            .execute(&args(json!({"location": "Atlantis"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Location 'Atlantis' not found");
    }

    #[test]
    fn rate_limited_to_ten_per_minute() {
        let tool = WeatherTool::new(WeatherConfig::default());
        assert_eq!(tool.rate_limit(), Some(RateLimit::per_minute(10)));
    }
}
