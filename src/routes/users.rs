use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::models::{PublicUser, UserSummary};
use crate::error::AppResult;
use crate::extractors::{CurrentUser, JsonBody};
use crate::media::{is_data_url, ImageUpload, UploadFolder};
use crate::state::AppState;
use crate::store::non_blank;
use crate::store::users::{FollowState, ProfileUpdate};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/profile/{username}", get(profile))
        .route("/users/update", post(update))
        .route("/users/follow/{id}", post(follow))
        .route("/users/{username}/followers", get(followers))
        .route("/users/{username}/following", get(following))
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub profile_picture: Option<String>,
}

/// GET /api/users/profile/{username}
async fn profile(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(username): Path<String>,
) -> AppResult<Json<PublicUser>> {
    Ok(Json(state.users.get_by_username(&username)?))
}

/// POST /api/users/update
async fn update(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    JsonBody(body): JsonBody<UpdateProfileRequest>,
) -> AppResult<Json<Value>> {
    // Reject taken email/username before anything is uploaded.
    state.users.ensure_available(
        &user.id,
        body.email.as_deref(),
        body.username.as_deref(),
    )?;

    let profile_picture = match non_blank(body.profile_picture.as_deref()) {
        Some(value) if is_data_url(&value) => {
            let image = ImageUpload::from_data_url(&value)?;
            Some(
                state
                    .images
                    .upload(image, UploadFolder::ProfilePictures)
                    .await?,
            )
        }
        other => other,
    };

    let updated = state.users.update_profile(
        &user.id,
        &ProfileUpdate {
            name: body.name,
            email: body.email,
            username: body.username,
            bio: body.bio,
            location: body.location,
            website: body.website,
            profile_picture,
        },
    )?;
    tracing::info!("Updated profile of {}", updated.username);

    Ok(Json(json!({
        "message": "profile updated successfully",
        "user": updated,
    })))
}

/// POST /api/users/follow/{id}
async fn follow(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(target_id): Path<String>,
) -> AppResult<Json<Value>> {
    let outcome = state.users.toggle_follow(&user.id, &target_id)?;
    let message = match outcome {
        FollowState::Followed => "User followed successfully",
        FollowState::Unfollowed => "User unfollowed successfully",
    };
    Ok(Json(json!({ "message": message, "state": outcome })))
}

/// GET /api/users/{username}/followers
async fn followers(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(username): Path<String>,
) -> AppResult<Json<Vec<UserSummary>>> {
    Ok(Json(state.users.followers(&username)?))
}

/// GET /api/users/{username}/following
async fn following(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(username): Path<String>,
) -> AppResult<Json<Vec<UserSummary>>> {
    Ok(Json(state.users.following(&username)?))
}
