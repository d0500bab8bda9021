use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{debug, instrument};

use super::dto::{
    format_date, ApodParams, ApodQuery, EarthParams, EarthQuery, EpicQuery, MarsParams, MarsQuery,
    NeoParams, NeoQuery,
};
use crate::{
    auth::{extractors::MaybeAuthUser, services},
    error::AppResult,
    state::AppState,
};

pub fn nasa_routes() -> Router<AppState> {
    Router::new()
        .route("/nasa", get(index))
        .route("/nasa/status", get(status))
        .route("/nasa/apod", get(apod_latest))
        .route("/nasa/apod/:date", get(apod_on))
        .route("/nasa/mars-rovers", get(mars_default))
        .route("/nasa/mars-rovers/:rover", get(mars_rover))
        .route("/nasa/mars-rovers/:rover/:sol", get(mars_rover_sol))
        .route("/nasa/neo", get(neo_week))
        .route("/nasa/neo/:start_date/:end_date", get(neo_range))
        .route("/nasa/earth", get(earth))
        .route("/nasa/epic", get(epic))
}

/// Counts the request against the caller, when there is one.
async fn track(state: &AppState, caller: &MaybeAuthUser) -> AppResult<()> {
    if let MaybeAuthUser(Some(user)) = caller {
        let usage = services::record_api_usage(state.users.as_ref(), user.id, OffsetDateTime::now_utc()).await?;
        debug!(user_id = %user.id, monthly = usage.monthly_requests, "api usage recorded");
    }
    Ok(())
}

fn today() -> time::Date {
    OffsetDateTime::now_utc().date()
}

async fn apod(
    state: AppState,
    caller: MaybeAuthUser,
    date: Option<String>,
    q: ApodQuery,
) -> AppResult<Json<Value>> {
    let params = ApodParams::resolve(date, q)?;
    track(&state, &caller).await?;
    let data = state.nasa.apod(&params).await?;
    Ok(Json(json!({
        "success": true,
        "data": data,
        "source": "NASA APOD API",
    })))
}

#[instrument(skip(state, caller, q))]
pub async fn apod_latest(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Query(q): Query<ApodQuery>,
) -> AppResult<Json<Value>> {
    apod(state, caller, None, q).await
}

#[instrument(skip(state, caller, q))]
pub async fn apod_on(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Path(date): Path<String>,
    Query(q): Query<ApodQuery>,
) -> AppResult<Json<Value>> {
    apod(state, caller, Some(date), q).await
}

async fn mars(
    state: AppState,
    caller: MaybeAuthUser,
    rover: Option<String>,
    sol: Option<String>,
    q: MarsQuery,
) -> AppResult<Json<Value>> {
    let params = MarsParams::resolve(rover, sol, q)?;
    track(&state, &caller).await?;
    let data = state.nasa.mars_rover_photos(&params).await?;
    Ok(Json(json!({
        "success": true,
        "data": data,
        "source": "NASA Mars Rover Photos API",
        "rover": params.rover,
        "sol": params.sol,
    })))
}

#[instrument(skip(state, caller, q))]
pub async fn mars_default(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Query(q): Query<MarsQuery>,
) -> AppResult<Json<Value>> {
    mars(state, caller, None, None, q).await
}

#[instrument(skip(state, caller, q))]
pub async fn mars_rover(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Path(rover): Path<String>,
    Query(q): Query<MarsQuery>,
) -> AppResult<Json<Value>> {
    mars(state, caller, Some(rover), None, q).await
}

#[instrument(skip(state, caller, q))]
pub async fn mars_rover_sol(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Path((rover, sol)): Path<(String, String)>,
    Query(q): Query<MarsQuery>,
) -> AppResult<Json<Value>> {
    mars(state, caller, Some(rover), Some(sol), q).await
}

async fn neo(
    state: AppState,
    caller: MaybeAuthUser,
    range: Option<(String, String)>,
    q: NeoQuery,
) -> AppResult<Json<Value>> {
    let params = NeoParams::resolve(range, q, today())?;
    track(&state, &caller).await?;
    let data = state.nasa.near_earth_objects(&params).await?;
    Ok(Json(json!({
        "success": true,
        "data": data,
        "source": "NASA NEO API",
        "date_range": {
            "start": format_date(params.start),
            "end": format_date(params.end),
        },
    })))
}

#[instrument(skip(state, caller, q))]
pub async fn neo_week(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Query(q): Query<NeoQuery>,
) -> AppResult<Json<Value>> {
    neo(state, caller, None, q).await
}

#[instrument(skip(state, caller, q))]
pub async fn neo_range(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Path(range): Path<(String, String)>,
    Query(q): Query<NeoQuery>,
) -> AppResult<Json<Value>> {
    neo(state, caller, Some(range), q).await
}

#[instrument(skip(state, caller, q))]
pub async fn earth(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Query(q): Query<EarthQuery>,
) -> AppResult<Json<Value>> {
    let params = EarthParams::resolve(q, today())?;
    track(&state, &caller).await?;
    let data = state.nasa.earth_imagery(&params).await?;
    Ok(Json(json!({
        "success": true,
        "data": data,
        "source": "NASA Earth Imagery API",
        "coordinates": {
            "latitude": params.lat,
            "longitude": params.lon,
        },
    })))
}

#[instrument(skip(state, caller, q))]
pub async fn epic(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Query(q): Query<EpicQuery>,
) -> AppResult<Json<Value>> {
    let date = q.resolve(today())?;
    track(&state, &caller).await?;
    let data = state.nasa.epic_images(date).await?;
    Ok(Json(json!({
        "success": true,
        "data": data,
        "source": "NASA EPIC API",
        "date": format_date(date),
    })))
}

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let status = state.nasa.status().await;
    Json(json!({
        "success": true,
        "data": status,
    }))
}

pub async fn index() -> Json<Value> {
    Json(json!({
        "message": "NASA API Endpoints",
        "available_endpoints": {
            "apod": {
                "path": "/api/nasa/apod[/:date]",
                "description": "Astronomy Picture of the Day",
                "parameters": {
                    "date": "YYYY-MM-DD format (optional)",
                    "hd": "true|false (optional)",
                    "thumbs": "true|false (optional)",
                },
            },
            "mars_rovers": {
                "path": "/api/nasa/mars-rovers[/:rover[/:sol]]",
                "description": "Mars Rover Photos",
                "parameters": {
                    "rover": "curiosity, opportunity, spirit (optional, default curiosity)",
                    "sol": "Martian sol (day) number (optional, default 1000)",
                    "camera": "camera abbreviation (optional)",
                    "page": "page number (optional, default 1)",
                },
            },
            "neo": {
                "path": "/api/nasa/neo[/:start_date/:end_date]",
                "description": "Near Earth Objects",
                "parameters": {
                    "start_date": "YYYY-MM-DD format (optional, default 7 days ago)",
                    "end_date": "YYYY-MM-DD format (optional, default today)",
                    "detailed_view": "true|false (optional)",
                },
            },
            "earth": {
                "path": "/api/nasa/earth",
                "description": "Earth Imagery",
                "parameters": {
                    "lat": "Latitude (required)",
                    "lon": "Longitude (required)",
                    "date": "YYYY-MM-DD format (optional)",
                    "dim": "Tile width in degrees (optional, default 0.15)",
                },
            },
            "epic": {
                "path": "/api/nasa/epic",
                "description": "EPIC Earth Images",
                "parameters": {
                    "date": "YYYY-MM-DD format (optional)",
                },
            },
            "status": {
                "path": "/api/nasa/status",
                "description": "Upstream availability probe",
            },
        },
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use serde_json::json;

    use crate::{
        app::build_app,
        state::AppState,
        test_support::{send, spawn_upstream, REJECTED_APOD_DATE},
    };

    #[tokio::test]
    async fn apod_by_date_wraps_upstream_payload() {
        let upstream = spawn_upstream().await;
        let app = build_app(AppState::fake(&upstream.base));
        let (status, body) = send(&app, Method::GET, "/api/nasa/apod/2024-01-01?hd=true", None, None).await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);
        assert_eq!(body["source"], "NASA APOD API");
        assert_eq!(body["data"]["date"], "2024-01-01");
        assert_eq!(body["data"]["query"]["api_key"], "TEST_KEY");
        assert_eq!(body["data"]["query"]["hd"], "true");
        assert!(body["data"]["query"].get("thumbs").is_none());
        assert_eq!(upstream.hits(), 1);
    }

    #[tokio::test]
    async fn upstream_error_passes_status_and_message_through() {
        let upstream = spawn_upstream().await;
        let app = build_app(AppState::fake(&upstream.base));
        let uri = format!("/api/nasa/apod/{REJECTED_APOD_DATE}");
        let (status, body) = send(&app, Method::GET, &uri, None, None).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["message"], "Date must be between Jun 16, 1995 and today.");
        assert_eq!(body["error"]["details"]["code"], 400);
    }

    #[tokio::test]
    async fn bad_date_is_rejected_before_upstream() {
        let upstream = spawn_upstream().await;
        let app = build_app(AppState::fake(&upstream.base));
        let (status, body) = send(&app, Method::GET, "/api/nasa/apod/01-01-2024", None, None).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["details"][0]["field"], "date");
        assert_eq!(upstream.hits(), 0);
    }

    #[tokio::test]
    async fn mars_defaults_to_curiosity_sol_1000() {
        let upstream = spawn_upstream().await;
        let app = build_app(AppState::fake(&upstream.base));
        let (status, body) = send(&app, Method::GET, "/api/nasa/mars-rovers", None, None).await;
        assert_eq!(status, 200);
        assert_eq!(body["rover"], "curiosity");
        assert_eq!(body["sol"], 1000);
        assert_eq!(body["data"]["rover"], "curiosity");
        assert_eq!(body["data"]["query"]["sol"], "1000");
        assert_eq!(body["data"]["query"]["page"], "1");

        let (_, body) = send(&app, Method::GET, "/api/nasa/mars-rovers/spirit/12?camera=NAVCAM", None, None).await;
        assert_eq!(body["data"]["rover"], "spirit");
        assert_eq!(body["data"]["query"]["sol"], "12");
        assert_eq!(body["data"]["query"]["camera"], "navcam");
    }

    #[tokio::test]
    async fn neo_sends_resolved_window() {
        let upstream = spawn_upstream().await;
        let app = build_app(AppState::fake(&upstream.base));
        let (status, body) = send(&app, Method::GET, "/api/nasa/neo/2024-01-01/2024-01-07", None, None).await;
        assert_eq!(status, 200);
        assert_eq!(body["date_range"], json!({"start": "2024-01-01", "end": "2024-01-07"}));
        assert_eq!(body["data"]["query"]["end_date"], "2024-01-07");
        assert_eq!(body["data"]["query"]["detailed_view"], "false");

        let (_, body) = send(&app, Method::GET, "/api/nasa/neo", None, None).await;
        assert_eq!(body["data"]["query"]["start_date"], body["date_range"]["start"]);
        assert_eq!(body["data"]["query"]["end_date"], body["date_range"]["end"]);
    }

    #[tokio::test]
    async fn earth_without_lon_makes_no_outbound_call() {
        let upstream = spawn_upstream().await;
        let app = build_app(AppState::fake(&upstream.base));
        let (status, body) = send(&app, Method::GET, "/api/nasa/earth?lat=29.78", None, None).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["message"], "Latitude and Longitude are required parameters");
        assert_eq!(upstream.hits(), 0);
    }

    #[tokio::test]
    async fn earth_reports_final_image_url() {
        let upstream = spawn_upstream().await;
        let app = build_app(AppState::fake(&upstream.base));
        let (status, body) = send(
            &app,
            Method::GET,
            "/api/nasa/earth?lat=29.78&lon=-95.33&date=2024-02-01",
            None,
            None,
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["url"], format!("{}/earth-assets/LC08.png", upstream.base));
        assert_eq!(body["data"]["coordinates"], json!({"lat": 29.78, "lon": -95.33}));
        assert_eq!(body["data"]["date"], "2024-02-01");
        assert_eq!(body["coordinates"]["longitude"], -95.33);
    }

    #[tokio::test]
    async fn epic_entries_get_archive_urls() {
        let upstream = spawn_upstream().await;
        let app = build_app(AppState::fake(&upstream.base));
        let (status, body) = send(&app, Method::GET, "/api/nasa/epic?date=2024-01-05", None, None).await;
        assert_eq!(status, 200);
        assert_eq!(body["date"], "2024-01-05");
        assert_eq!(body["data"]["total_images"], 2);
        assert_eq!(
            body["data"]["images"][0]["image_url"],
            format!(
                "{}/EPIC/archive/natural/2024/01/05/png/epic_1b_20240105003633.png?api_key=TEST_KEY",
                upstream.base
            )
        );
        assert_eq!(body["data"]["images"][1]["caption"], "second");
    }

    #[tokio::test]
    async fn connection_refused_is_503_on_every_route() {
        let app = build_app(AppState::fake("http://127.0.0.1:1"));
        for uri in [
            "/api/nasa/apod",
            "/api/nasa/mars-rovers",
            "/api/nasa/neo",
            "/api/nasa/earth?lat=1&lon=2",
            "/api/nasa/epic",
        ] {
            let (status, body) = send(&app, Method::GET, uri, None, None).await;
            assert_eq!(status, 503, "{uri}");
            assert_eq!(body["error"]["message"], "Service temporarily unavailable");
            assert_eq!(body["path"], uri);
        }
    }

    #[tokio::test]
    async fn authenticated_calls_are_counted() {
        let upstream = spawn_upstream().await;
        let app = build_app(AppState::fake(&upstream.base));
        let (_, body) = send(
            &app,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({"username": "counter", "email": "count@example.com", "password": "hunter22"})),
        )
        .await;
        let token = body["data"]["accessToken"].as_str().unwrap().to_string();

        send(&app, Method::GET, "/api/nasa/apod", Some(&token), None).await;
        send(&app, Method::GET, "/api/nasa/epic", Some(&token), None).await;
        send(&app, Method::GET, "/api/nasa/apod", None, None).await;

        let (_, me) = send(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
        assert_eq!(me["data"]["apiUsage"]["totalRequests"], 2);
        assert_eq!(me["data"]["apiUsage"]["monthlyRequests"], 2);
        assert!(me["data"]["apiUsage"]["lastRequestAt"].is_string());
    }

    #[tokio::test]
    async fn invalid_token_on_data_route_is_401() {
        let upstream = spawn_upstream().await;
        let app = build_app(AppState::fake(&upstream.base));
        let (status, _) = send(&app, Method::GET, "/api/nasa/apod", Some("not-a-jwt"), None).await;
        assert_eq!(status, 401);
        assert_eq!(upstream.hits(), 0);
    }

    #[tokio::test]
    async fn index_and_status() {
        let upstream = spawn_upstream().await;
        let app = build_app(AppState::fake(&upstream.base));
        let (status, body) = send(&app, Method::GET, "/api/nasa", None, None).await;
        assert_eq!(status, 200);
        assert!(body["available_endpoints"]["epic"].is_object());

        let (_, body) = send(&app, Method::GET, "/api/nasa/status", None, None).await;
        assert_eq!(body["data"]["status"], "operational");

        let offline = build_app(AppState::fake("http://127.0.0.1:1"));
        let (status, body) = send(&offline, Method::GET, "/api/nasa/status", None, None).await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["status"], "error");
    }
}
