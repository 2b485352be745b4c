use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use crate::auth::tokens::parse_authorization;
use crate::db::models::UserId;
use crate::error::AppError;
use crate::state::AppState;

/// Represents the currently authenticated user.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub is_staff: bool,
    /// The token this request authenticated with
    pub token: String,
}

/// Extractor that requires a valid `Authorization` token.
/// Returns 401 when the header is missing or the token is unknown.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthenticated)?;
        let token = parse_authorization(header).ok_or(AppError::InvalidToken)?;

        let user = state
            .store
            .user_for_token(token)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AppError::InvalidToken)?;

        Ok(CurrentUser {
            id: user.id,
            email: user.email,
            username: user.username,
            is_staff: user.is_staff,
            token: token.to_string(),
        })
    }
}
