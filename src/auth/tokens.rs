use rand::Rng;

use crate::db::models::UserId;
use crate::repository::{RepositoryError, TokenRepository};

/// 32 random bytes as 64 lowercase hex characters.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// The user's existing token, or a fresh one.
pub async fn issue_token<R: TokenRepository + ?Sized>(
    repo: &R,
    user_id: UserId,
) -> Result<String, RepositoryError> {
    repo.get_or_create_token(user_id, &generate_token()).await
}

/// Read `Authorization: Token <key>` (or `Bearer <key>`).
pub fn parse_authorization(value: &str) -> Option<&str> {
    let (scheme, key) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("token") && !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let key = key.trim();
    (!key.is_empty() && !key.contains(' ')).then_some(key)
}
