use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Multipart, Request};
use axum::http::request::Parts;
use axum::Json;
use serde::de::DeserializeOwned;

use crate::auth::cookie::get_cookie_value;
use crate::db::models::PublicUser;
use crate::error::AppError;
use crate::state::AppState;

/// The user behind the request's session cookie.
/// Rejects with 401 when the cookie is missing, the token does not verify, or
/// the account no longer exists.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub PublicUser);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = get_cookie_value(&parts.headers, &state.config.auth.cookie_name)
            .ok_or_else(|| AppError::Unauthorized("Unauthorized: No Token Provided".into()))?;

        let claims = state.tokens.verify(token)?;

        match state.users.find_by_id(&claims.id)? {
            Some(user) => Ok(CurrentUser(user)),
            None => {
                tracing::warn!("Session token for unknown user {}", claims.id);
                Err(AppError::Unauthorized("Unauthorized: User not found".into()))
            }
        }
    }
}

/// `Json<T>` whose rejections use the API's error body instead of axum's
/// plain-text default.
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

/// `multipart/form-data` body with rejections mapped to 400.
pub struct FormData(pub Multipart);

impl<S> FromRequest<S> for FormData
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Multipart::from_request(req, state)
            .await
            .map(FormData)
            .map_err(|rejection| {
                AppError::BadRequest(format!("Invalid form data: {}", rejection.body_text()))
            })
    }
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => {
            AppError::BadRequest("Expected a JSON request body".into())
        }
        other => AppError::BadRequest(format!("Invalid JSON: {}", other.body_text())),
    }
}
