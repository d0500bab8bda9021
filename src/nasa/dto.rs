//! Inbound query shapes for the NASA routes and their resolved,
//! validated counterparts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{format_description::FormatItem, macros::format_description, Date, Duration};

use crate::users::validate::{FieldError, ValidationError};

pub const DEFAULT_ROVER: &str = "curiosity";
pub const DEFAULT_SOL: u32 = 1000;
pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_DIM: f64 = 0.15;
pub const NEO_WINDOW_DAYS: i64 = 7;

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

pub fn parse_date(field: &'static str, raw: &str) -> Result<Date, ValidationError> {
    Date::parse(raw.trim(), DATE_FORMAT)
        .map_err(|_| ValidationError::field(field, format!("{field} must be a date in YYYY-MM-DD format")))
}

pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

fn present(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn optional_date(field: &'static str, raw: Option<String>) -> Result<Option<Date>, ValidationError> {
    present(raw).map(|s| parse_date(field, &s)).transpose()
}

fn non_negative(field: &'static str, raw: Option<String>, default: u32) -> Result<u32, ValidationError> {
    match present(raw) {
        None => Ok(default),
        Some(s) => s.parse::<u32>().map_err(|_| {
            ValidationError::field(field, format!("{field} must be a non-negative integer"))
        }),
    }
}

fn number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn flag(field: &'static str, raw: Option<String>) -> Result<Option<bool>, ValidationError> {
    match present(raw).map(|s| s.to_ascii_lowercase()) {
        None => Ok(None),
        Some(s) if s == "true" || s == "1" => Ok(Some(true)),
        Some(s) if s == "false" || s == "0" => Ok(Some(false)),
        Some(_) => Err(ValidationError::field(field, format!("{field} must be true or false"))),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ApodQuery {
    pub hd: Option<String>,
    pub thumbs: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApodParams {
    pub date: Option<Date>,
    pub hd: Option<bool>,
    pub thumbs: Option<bool>,
}

impl ApodParams {
    pub fn resolve(date: Option<String>, q: ApodQuery) -> Result<Self, ValidationError> {
        Ok(Self {
            date: optional_date("date", date)?,
            hd: flag("hd", q.hd)?,
            thumbs: flag("thumbs", q.thumbs)?,
        })
    }

    /// Only the fields that were actually supplied.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut qp = Vec::with_capacity(3);
        if let Some(d) = self.date {
            qp.push(("date", format_date(d)));
        }
        if let Some(hd) = self.hd {
            qp.push(("hd", hd.to_string()));
        }
        if let Some(thumbs) = self.thumbs {
            qp.push(("thumbs", thumbs.to_string()));
        }
        qp
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MarsQuery {
    pub camera: Option<String>,
    pub page: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarsParams {
    pub rover: String,
    pub sol: u32,
    pub camera: Option<String>,
    pub page: u32,
}

impl MarsParams {
    pub fn resolve(
        rover: Option<String>,
        sol: Option<String>,
        q: MarsQuery,
    ) -> Result<Self, ValidationError> {
        let rover = present(rover)
            .map(|r| r.to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_ROVER.to_string());
        let mut fields = Vec::new();
        if !rover.chars().all(|c| c.is_ascii_alphabetic()) {
            fields.push(FieldError {
                field: "rover",
                message: "rover must contain letters only".into(),
            });
        }
        let sol = non_negative("sol", sol, DEFAULT_SOL);
        let page = non_negative("page", q.page, DEFAULT_PAGE);
        for r in [&sol, &page] {
            if let Err(e) = r {
                fields.extend(e.fields.iter().cloned());
            }
        }
        if !fields.is_empty() {
            return Err(collect(fields));
        }
        Ok(Self {
            rover,
            sol: sol.unwrap_or(DEFAULT_SOL),
            camera: present(q.camera).map(|c| c.to_ascii_lowercase()),
            page: page.unwrap_or(DEFAULT_PAGE),
        })
    }

    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut qp = vec![("sol", self.sol.to_string())];
        if let Some(camera) = &self.camera {
            qp.push(("camera", camera.clone()));
        }
        qp.push(("page", self.page.to_string()));
        qp
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct NeoQuery {
    pub detailed_view: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NeoParams {
    pub start: Date,
    pub end: Date,
    pub detailed_view: bool,
}

impl NeoParams {
    /// Without an explicit range the window is the week ending `today`.
    pub fn resolve(
        range: Option<(String, String)>,
        q: NeoQuery,
        today: Date,
    ) -> Result<Self, ValidationError> {
        let (start, end) = match range {
            Some((s, e)) => (parse_date("start_date", &s)?, parse_date("end_date", &e)?),
            None => (today - Duration::days(NEO_WINDOW_DAYS), today),
        };
        if start > end {
            return Err(ValidationError::field(
                "start_date",
                "start_date must not be after end_date",
            ));
        }
        Ok(Self {
            start,
            end,
            detailed_view: flag("detailed_view", q.detailed_view)?.unwrap_or(false),
        })
    }

    pub fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("start_date", format_date(self.start)),
            ("end_date", format_date(self.end)),
            ("detailed_view", self.detailed_view.to_string()),
        ]
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EarthQuery {
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub date: Option<String>,
    pub dim: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EarthParams {
    pub lat: f64,
    pub lon: f64,
    pub date: Date,
    pub dim: f64,
}

impl EarthParams {
    pub fn resolve(q: EarthQuery, today: Date) -> Result<Self, ValidationError> {
        let lat = q.lat.as_deref().and_then(number);
        let lon = q.lon.as_deref().and_then(number);
        let (lat, lon) = match (lat, lon) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                let mut fields = Vec::new();
                if lat.is_none() {
                    fields.push(FieldError {
                        field: "lat",
                        message: "lat must be a number".into(),
                    });
                }
                if lon.is_none() {
                    fields.push(FieldError {
                        field: "lon",
                        message: "lon must be a number".into(),
                    });
                }
                return Err(ValidationError {
                    message: "Latitude and Longitude are required parameters".into(),
                    fields,
                });
            }
        };
        if !(-90.0..=90.0).contains(&lat) {
            return Err(ValidationError::field("lat", "lat must be between -90 and 90"));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(ValidationError::field("lon", "lon must be between -180 and 180"));
        }
        let dim = match present(q.dim) {
            None => DEFAULT_DIM,
            Some(s) => number(&s)
                .filter(|d| *d > 0.0)
                .ok_or_else(|| ValidationError::field("dim", "dim must be a positive number"))?,
        };
        Ok(Self {
            lat,
            lon,
            date: optional_date("date", q.date)?.unwrap_or(today),
            dim,
        })
    }

    pub fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("lat", self.lat.to_string()),
            ("lon", self.lon.to_string()),
            ("date", format_date(self.date)),
            ("dim", self.dim.to_string()),
        ]
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EpicQuery {
    pub date: Option<String>,
}

impl EpicQuery {
    pub fn resolve(self, today: Date) -> Result<Date, ValidationError> {
        Ok(optional_date("date", self.date)?.unwrap_or(today))
    }
}

fn collect(fields: Vec<FieldError>) -> ValidationError {
    let message = if fields.len() == 1 {
        fields[0].message.clone()
    } else {
        "Validation failed".to_string()
    };
    ValidationError { message, fields }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EarthImagery {
    pub url: String,
    pub coordinates: Coordinates,
    pub date: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpicImages {
    pub date: String,
    pub images: Vec<Value>,
    pub total_images: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiHealth {
    Operational,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiStatus {
    pub status: ApiHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: time::OffsetDateTime,
}
