use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::models::Post;
use crate::error::AppResult;
use crate::extractors::{CurrentUser, FormData, JsonBody};
use crate::media::{ImageUpload, UploadFolder};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts", post(create))
        .route("/posts/all", get(all))
        .route("/posts/following", get(following))
        .route("/posts/user/{username}", get(by_user))
        .route("/posts/liked/{username}", get(liked))
        .route("/posts/like/{id}", post(like))
        .route("/posts/comment/{id}", post(comment))
        .route("/posts/{id}", get(show).delete(remove))
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct CommentRequest {
    pub text: String,
}

/// Fields of the create-post form: `text` and an optional `img` file.
#[derive(Default)]
struct NewPostForm {
    text: Option<String>,
    image: Option<ImageUpload>,
}

impl NewPostForm {
    async fn read(FormData(mut multipart): FormData) -> AppResult<Self> {
        let mut form = NewPostForm::default();

        while let Some(field) = multipart.next_field().await? {
            match field.name() {
                Some("text") => form.text = Some(field.text().await?),
                Some("img") => {
                    let content_type = match field.content_type() {
                        Some(ct) => ct.to_string(),
                        None => mime_guess::from_path(field.file_name().unwrap_or_default())
                            .first_or_octet_stream()
                            .to_string(),
                    };
                    let bytes = field.bytes().await?;
                    // An empty file input means no image.
                    if !bytes.is_empty() {
                        form.image = Some(ImageUpload {
                            content_type,
                            bytes: bytes.to_vec(),
                        });
                    }
                }
                _ => {}
            }
        }

        Ok(form)
    }
}

/// POST /api/posts
async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    form: FormData,
) -> AppResult<(StatusCode, Json<Post>)> {
    let form = NewPostForm::read(form).await?;

    let image_url = match form.image {
        Some(image) => Some(state.images.upload(image, UploadFolder::Posts).await?),
        None => None,
    };

    let post = state
        .posts
        .create(&user.id, form.text.as_deref(), image_url.as_deref())?;
    Ok((StatusCode::CREATED, Json(post)))
}

/// GET /api/posts/all
async fn all(State(state): State<AppState>, _user: CurrentUser) -> AppResult<Json<Vec<Post>>> {
    Ok(Json(state.posts.all()?))
}

/// GET /api/posts/following
async fn following(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Vec<Post>>> {
    Ok(Json(state.posts.following_feed(&user.id)?))
}

/// GET /api/posts/user/{username}
async fn by_user(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(username): Path<String>,
) -> AppResult<Json<Vec<Post>>> {
    Ok(Json(state.posts.by_author(&username)?))
}

/// GET /api/posts/liked/{username}
async fn liked(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(username): Path<String>,
) -> AppResult<Json<Vec<Post>>> {
    Ok(Json(state.posts.liked_by(&username)?))
}

/// GET /api/posts/{id}
async fn show(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Post>> {
    Ok(Json(state.posts.get(&id)?))
}

/// DELETE /api/posts/{id}
async fn remove(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    state.posts.delete(&id, &user.id)?;
    Ok(Json(json!({ "message": "Post deleted successfully!" })))
}

/// POST /api/posts/like/{id}
async fn like(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let outcome = state.posts.toggle_like(&id, &user.id)?;
    let message = if outcome.liked {
        "Post liked."
    } else {
        "Post unliked."
    };
    Ok(Json(json!({
        "message": message,
        "liked": outcome.liked,
        "likes": outcome.likes,
    })))
}

/// POST /api/posts/comment/{id}
async fn comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<CommentRequest>,
) -> AppResult<Json<Value>> {
    let comment = state.posts.add_comment(&id, &user.id, &body.text)?;
    Ok(Json(json!({
        "message": "Comment added successfully!",
        "comment": comment,
    })))
}
