//! Outbound client for the NASA open APIs.

use anyhow::Context;
use reqwest::{Client, Response};
use serde_json::Value;
use time::{Date, OffsetDateTime};
use tracing::{debug, warn};

use super::dto::{
    format_date, ApiHealth, ApiStatus, ApodParams, Coordinates, EarthImagery, EarthParams,
    EpicImages, MarsParams, NeoParams,
};
use super::error::UpstreamError;
use crate::config::NasaConfig;

const EARTH_MESSAGE: &str = "Image URL provided. Use this URL to view the satellite image.";

pub type UpstreamResult<T> = Result<T, UpstreamError>;

#[derive(Clone)]
pub struct NasaClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl NasaClient {
    pub fn new(cfg: &NasaConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(cfg.timeout())
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()
            .context("Failed to build NASA http client")?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, path: &str, query: &[(&'static str, String)]) -> UpstreamResult<Response> {
        debug!(method = "GET", path, "nasa request");
        let resp = self
            .client
            .get(self.url(path))
            .query(&[("api_key", self.api_key.as_str())])
            .query(query)
            .send()
            .await
            .map_err(|e| {
                warn!(path, error = %e, "nasa request failed");
                UpstreamError::from_transport(&e)
            })?;

        let status = resp.status();
        debug!(path, status = %status, "nasa response");
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.bytes().await.unwrap_or_default();
        let err = UpstreamError::from_response(status.as_u16(), &body);
        warn!(path, status = err.status, message = %err.message, "nasa error response");
        Err(err)
    }

    async fn get_json(&self, path: &str, query: &[(&'static str, String)]) -> UpstreamResult<Value> {
        self.send(path, query)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| {
                warn!(path, error = %e, "nasa response decode failed");
                UpstreamError::from_transport(&e)
            })
    }

    pub async fn apod(&self, params: &ApodParams) -> UpstreamResult<Value> {
        self.get_json("/planetary/apod", &params.query()).await
    }

    pub async fn mars_rover_photos(&self, params: &MarsParams) -> UpstreamResult<Value> {
        let path = format!("/mars-photos/api/v1/rovers/{}/photos", params.rover);
        self.get_json(&path, &params.query()).await
    }

    pub async fn near_earth_objects(&self, params: &NeoParams) -> UpstreamResult<Value> {
        self.get_json("/neo/rest/v1/feed", &params.query()).await
    }

    /// The imagery endpoint answers with the image itself; only the final
    /// URL after redirects is handed back.
    pub async fn earth_imagery(&self, params: &EarthParams) -> UpstreamResult<EarthImagery> {
        let resp = self.send("/planetary/earth/imagery", &params.query()).await?;
        Ok(EarthImagery {
            url: resp.url().to_string(),
            coordinates: Coordinates {
                lat: params.lat,
                lon: params.lon,
            },
            date: format_date(params.date),
            message: EARTH_MESSAGE.to_string(),
        })
    }

    pub async fn epic_images(&self, date: Date) -> UpstreamResult<EpicImages> {
        let day = format_date(date);
        let feed = self
            .get_json(&format!("/EPIC/api/natural/date/{day}"), &[])
            .await?;

        let images: Vec<Value> = match feed {
            Value::Array(entries) => entries
                .into_iter()
                .map(|mut entry| {
                    let url = entry
                        .get("image")
                        .and_then(Value::as_str)
                        .map(|image| self.epic_image_url(date, image));
                    if let (Some(url), Some(obj)) = (url, entry.as_object_mut()) {
                        obj.insert("image_url".into(), Value::String(url));
                    }
                    entry
                })
                .collect(),
            _ => Vec::new(),
        };

        Ok(EpicImages {
            date: day,
            total_images: images.len(),
            images,
        })
    }

    pub fn epic_image_url(&self, date: Date, image: &str) -> String {
        format!(
            "{}/EPIC/archive/natural/{:04}/{:02}/{:02}/png/{}.png?api_key={}",
            self.base_url,
            date.year(),
            u8::from(date.month()),
            date.day(),
            image,
            self.api_key
        )
    }

    /// Probes the APOD endpoint; never fails.
    pub async fn status(&self) -> ApiStatus {
        let timestamp = OffsetDateTime::now_utc();
        match self.send("/planetary/apod", &[]).await {
            Ok(_) => ApiStatus {
                status: ApiHealth::Operational,
                error: None,
                timestamp,
            },
            Err(e) => ApiStatus {
                status: ApiHealth::Error,
                error: Some(e.message),
                timestamp,
            },
        }
    }
}
