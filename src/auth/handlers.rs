use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{
        AuthPayload, ChangePasswordRequest, LoginRequest, PublicUser, RefreshRequest,
        RegisterRequest, SetActiveRequest, UpdateProfileRequest,
    },
    error::AuthError,
    extractors::{AuthUser, RequireAdmin},
    services::{self, RegisterInput},
};
use crate::{
    error::{AppJson, AppResult},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/logout-all", post(logout_all))
        .route("/auth/me", get(get_me).patch(update_me))
        .route("/auth/change-password", post(change_password))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/tokens/sweep", post(sweep_tokens))
        .route("/admin/users/:id/active", patch(set_user_active))
        .route("/admin/users/:id", delete(delete_user))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let now = OffsetDateTime::now_utc();
    let user = services::register(
        state.users.as_ref(),
        RegisterInput {
            username: payload.username,
            email: payload.email,
            password: payload.password,
            profile: payload.profile,
            preferences: payload.preferences,
        },
        now,
    )
    .await?;
    let pair = services::issue_token_pair(state.users.as_ref(), &state.jwt, &user, now).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "User registered successfully",
            "data": AuthPayload {
                user: user.into(),
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
        })),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<Json<Value>> {
    let now = OffsetDateTime::now_utc();
    let user = services::authenticate(state.users.as_ref(), &payload.email, &payload.password, now).await?;
    let pair = services::issue_token_pair(state.users.as_ref(), &state.jwt, &user, now).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Login successful",
        "data": AuthPayload {
            user: user.into(),
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        },
    })))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RefreshRequest>,
) -> AppResult<Json<Value>> {
    let (user, pair) = services::rotate_refresh_token(
        state.users.as_ref(),
        &state.jwt,
        &payload.refresh_token,
        OffsetDateTime::now_utc(),
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "data": AuthPayload {
            user: user.into(),
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        },
    })))
}

#[instrument(skip(state, payload), fields(user_id = %caller.id))]
pub async fn logout(
    State(state): State<AppState>,
    caller: AuthUser,
    AppJson(payload): AppJson<RefreshRequest>,
) -> AppResult<Json<Value>> {
    let revoked = services::revoke_token(state.users.as_ref(), caller.id, &payload.refresh_token).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Logged out",
        "data": {"revoked": revoked},
    })))
}

#[instrument(skip(state), fields(user_id = %caller.id))]
pub async fn logout_all(State(state): State<AppState>, caller: AuthUser) -> AppResult<Json<Value>> {
    let revoked = services::revoke_all_tokens(state.users.as_ref(), caller.id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Logged out from all sessions",
        "data": {"revoked": revoked},
    })))
}

#[instrument(skip(state), fields(user_id = %caller.id))]
pub async fn get_me(State(state): State<AppState>, caller: AuthUser) -> AppResult<Json<Value>> {
    let user = state
        .users
        .find_by_id(caller.id)
        .await
        .map_err(AuthError::from)?
        .ok_or(AuthError::NotFound("user"))?;

    Ok(Json(json!({
        "success": true,
        "data": PublicUser::from(user),
    })))
}

#[instrument(skip(state, payload), fields(user_id = %caller.id))]
pub async fn update_me(
    State(state): State<AppState>,
    caller: AuthUser,
    AppJson(payload): AppJson<UpdateProfileRequest>,
) -> AppResult<Json<Value>> {
    let user = services::update_profile(
        state.users.as_ref(),
        caller.id,
        payload.profile,
        payload.preferences,
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Profile updated",
        "data": PublicUser::from(user),
    })))
}

#[instrument(skip(state, payload), fields(user_id = %caller.id))]
pub async fn change_password(
    State(state): State<AppState>,
    caller: AuthUser,
    AppJson(payload): AppJson<ChangePasswordRequest>,
) -> AppResult<Json<Value>> {
    services::change_password(
        state.users.as_ref(),
        caller.id,
        &payload.current_password,
        &payload.new_password,
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Password changed; all sessions have been signed out",
    })))
}

#[instrument(skip(state), fields(admin_id = %admin.id))]
pub async fn sweep_tokens(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
) -> AppResult<Json<Value>> {
    let removed = services::sweep_expired_tokens(state.users.as_ref(), OffsetDateTime::now_utc()).await?;
    info!(removed, admin = %admin.username, "manual token sweep");
    Ok(Json(json!({
        "success": true,
        "data": {"removed": removed},
    })))
}

#[instrument(skip(state, payload), fields(admin_id = %admin.id))]
pub async fn set_user_active(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(user_id): Path<Uuid>,
    AppJson(payload): AppJson<SetActiveRequest>,
) -> AppResult<Json<Value>> {
    let user = services::set_account_active(state.users.as_ref(), user_id, payload.is_active).await?;
    Ok(Json(json!({
        "success": true,
        "data": PublicUser::from(user),
    })))
}

#[instrument(skip(state), fields(admin_id = %admin.id))]
pub async fn delete_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    services::delete_account(state.users.as_ref(), user_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "User deleted",
    })))
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use serde_json::json;

    use crate::{
        app::build_app,
        auth::password::hash_password,
        state::AppState,
        test_support::send,
        users::{NewUser, Preferences, Profile, Role},
    };
    use time::OffsetDateTime;

    const OFFLINE: &str = "http://127.0.0.1:1";

    fn register_body(username: &str, email: &str) -> serde_json::Value {
        json!({"username": username, "email": email, "password": "hunter22"})
    }

    async fn registered(app: &axum::Router) -> (String, String) {
        let (status, body) = send(
            app,
            Method::POST,
            "/api/auth/register",
            None,
            Some(register_body("stargazer", "user@example.com")),
        )
        .await;
        assert_eq!(status, 201, "{body}");
        (
            body["data"]["accessToken"].as_str().unwrap().to_string(),
            body["data"]["refreshToken"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn register_returns_tokens_and_public_user() {
        let app = build_app(AppState::fake(OFFLINE));
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/auth/register",
            None,
            Some(register_body("stargazer", "User@Example.com")),
        )
        .await;
        assert_eq!(status, 201);
        assert_eq!(body["success"], true);
        let user = &body["data"]["user"];
        assert_eq!(user["email"], "user@example.com");
        assert_eq!(user["role"], "user");
        assert_eq!(user["preferences"]["notificationsEnabled"], true);
        assert!(user.get("passwordHash").is_none());
        assert!(body["data"]["accessToken"].is_string());

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/auth/register",
            None,
            Some(register_body("another", "user@example.com")),
        )
        .await;
        assert_eq!(status, 409);
        assert_eq!(body["error"]["message"], "Email already registered");
    }

    #[tokio::test]
    async fn register_validation_lists_fields() {
        let app = build_app(AppState::fake(OFFLINE));
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({"username": "ab", "email": "bad", "password": "1"})),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["details"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn malformed_json_is_a_400_envelope() {
        let app = build_app(AppState::fake(OFFLINE));
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"email": "user@example.com"})),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);
        assert_eq!(body["path"], "/api/auth/login");
        assert_eq!(body["method"], "POST");
    }

    #[tokio::test]
    async fn sixth_login_is_locked_even_with_right_password() {
        let app = build_app(AppState::fake(OFFLINE));
        registered(&app).await;
        let wrong = json!({"email": "user@example.com", "password": "not-the-one"});
        for _ in 0..5 {
            let (status, body) = send(&app, Method::POST, "/api/auth/login", None, Some(wrong.clone())).await;
            assert_eq!(status, 401);
            assert_eq!(body["error"]["message"], "Invalid login credentials");
        }
        let right = json!({"email": "user@example.com", "password": "hunter22"});
        let (status, body) = send(&app, Method::POST, "/api/auth/login", None, Some(right)).await;
        assert_eq!(status, 403);
        assert_eq!(
            body["error"]["message"],
            "Account is temporarily locked due to too many failed login attempts"
        );
    }

    #[tokio::test]
    async fn refresh_rotates_and_old_token_dies() {
        let app = build_app(AppState::fake(OFFLINE));
        let (_, refresh) = registered(&app).await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/auth/refresh",
            None,
            Some(json!({"refreshToken": refresh})),
        )
        .await;
        assert_eq!(status, 200);
        let rotated = body["data"]["refreshToken"].as_str().unwrap().to_string();
        assert_ne!(rotated, refresh);

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/auth/refresh",
            None,
            Some(json!({"refreshToken": refresh})),
        )
        .await;
        assert_eq!(status, 401);
    }

    #[tokio::test]
    async fn access_token_is_not_a_refresh_token() {
        let app = build_app(AppState::fake(OFFLINE));
        let (access, _) = registered(&app).await;
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/auth/refresh",
            None,
            Some(json!({"refreshToken": access})),
        )
        .await;
        assert_eq!(status, 401);
    }

    #[tokio::test]
    async fn logout_revokes_refresh_token() {
        let app = build_app(AppState::fake(OFFLINE));
        let (access, refresh) = registered(&app).await;
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/auth/logout",
            Some(&access),
            Some(json!({"refreshToken": refresh})),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["revoked"], true);

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/auth/refresh",
            None,
            Some(json!({"refreshToken": refresh})),
        )
        .await;
        assert_eq!(status, 401);
    }

    #[tokio::test]
    async fn logout_all_clears_every_session() {
        let app = build_app(AppState::fake(OFFLINE));
        let (access, _) = registered(&app).await;
        let login = json!({"email": "user@example.com", "password": "hunter22"});
        send(&app, Method::POST, "/api/auth/login", None, Some(login)).await;

        let (status, body) = send(&app, Method::POST, "/api/auth/logout-all", Some(&access), None).await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["revoked"], 2);
    }

    #[tokio::test]
    async fn me_requires_a_valid_token() {
        let app = build_app(AppState::fake(OFFLINE));
        let (status, body) = send(&app, Method::GET, "/api/auth/me", None, None).await;
        assert_eq!(status, 401);
        assert_eq!(body["error"]["message"], "Access token required");

        let (status, _) = send(&app, Method::GET, "/api/auth/me", Some("garbage"), None).await;
        assert_eq!(status, 401);

        let (access, _) = registered(&app).await;
        let (status, body) = send(&app, Method::GET, "/api/auth/me", Some(&access), None).await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["username"], "stargazer");
        assert_eq!(body["data"]["apiUsage"]["totalRequests"], 0);
    }

    #[tokio::test]
    async fn patch_me_updates_profile() {
        let app = build_app(AppState::fake(OFFLINE));
        let (access, _) = registered(&app).await;
        let (status, body) = send(
            &app,
            Method::PATCH,
            "/api/auth/me",
            Some(&access),
            Some(json!({
                "profile": {"firstName": "Vera", "bio": "Dark matter"},
                "preferences": {"favoriteAstronomyTopics": ["neo", "epic"]},
            })),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["profile"]["firstName"], "Vera");
        assert_eq!(body["data"]["preferences"]["favoriteAstronomyTopics"], json!(["neo", "epic"]));

        let (status, body) = send(
            &app,
            Method::PATCH,
            "/api/auth/me",
            Some(&access),
            Some(json!({"profile": {"bio": "x".repeat(501)}})),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["details"][0]["field"], "profile.bio");
    }

    #[tokio::test]
    async fn change_password_signs_out_everywhere() {
        let app = build_app(AppState::fake(OFFLINE));
        let (access, refresh) = registered(&app).await;
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/auth/change-password",
            Some(&access),
            Some(json!({"currentPassword": "hunter22", "newPassword": "orbital-9"})),
        )
        .await;
        assert_eq!(status, 200);

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/auth/refresh",
            None,
            Some(json!({"refreshToken": refresh})),
        )
        .await;
        assert_eq!(status, 401);

        let login = json!({"email": "user@example.com", "password": "orbital-9"});
        let (status, _) = send(&app, Method::POST, "/api/auth/login", None, Some(login)).await;
        assert_eq!(status, 200);
    }

    async fn admin_access(state: &AppState, app: &axum::Router) -> String {
        state
            .users
            .create(
                NewUser {
                    username: "mission-control".into(),
                    email: "admin@example.com".into(),
                    password_hash: hash_password("admin-pass").unwrap(),
                    role: Role::Admin,
                    profile: Profile::default(),
                    preferences: Preferences::default(),
                },
                OffsetDateTime::now_utc(),
            )
            .await
            .unwrap();
        let login = json!({"email": "admin@example.com", "password": "admin-pass"});
        let (_, body) = send(app, Method::POST, "/api/auth/login", None, Some(login)).await;
        body["data"]["accessToken"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn admin_deactivates_and_deletes_users() {
        let state = AppState::fake(OFFLINE);
        let app = build_app(state.clone());
        let admin = admin_access(&state, &app).await;
        let (user_access, refresh) = registered(&app).await;
        let (_, me) = send(&app, Method::GET, "/api/auth/me", Some(&user_access), None).await;
        let id = me["data"]["id"].as_str().unwrap().to_string();
        let active_uri = format!("/api/admin/users/{id}/active");

        let (status, _) = send(&app, Method::PATCH, &active_uri, Some(&user_access), Some(json!({"isActive": false}))).await;
        assert_eq!(status, 403);

        let (status, body) = send(&app, Method::PATCH, &active_uri, Some(&admin), Some(json!({"isActive": false}))).await;
        assert_eq!(status, 200, "{body}");
        assert_eq!(body["data"]["isActive"], false);

        let login = json!({"email": "user@example.com", "password": "hunter22"});
        let (status, _) = send(&app, Method::POST, "/api/auth/login", None, Some(login)).await;
        assert_eq!(status, 403);
        let (status, _) = send(&app, Method::POST, "/api/auth/refresh", None, Some(json!({"refreshToken": refresh}))).await;
        assert_eq!(status, 401);

        let user_uri = format!("/api/admin/users/{id}");
        let (status, _) = send(&app, Method::DELETE, &user_uri, Some(&admin), None).await;
        assert_eq!(status, 200);
        let (status, body) = send(&app, Method::DELETE, &user_uri, Some(&admin), None).await;
        assert_eq!(status, 404);
        assert_eq!(body["error"]["message"], "User not found");

        let (status, body) = send(&app, Method::DELETE, "/api/admin/users/not-a-uuid", Some(&admin), None).await;
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn sweep_is_admin_only() {
        let state = AppState::fake(OFFLINE);
        let app = build_app(state.clone());
        let admin = admin_access(&state, &app).await;

        let (user_access, _) = registered(&app).await;
        let (status, _) = send(&app, Method::POST, "/api/admin/tokens/sweep", Some(&user_access), None).await;
        assert_eq!(status, 403);

        let (status, body) = send(&app, Method::POST, "/api/admin/tokens/sweep", Some(&admin), None).await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["removed"], 0);
    }
}
