//! Per-object access rules. Authentication is enforced by the extractor;
//! these only decide whether an authenticated actor may act on a target.

use axum::http::Method;

use crate::db::models::{Comment, Post, User};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;

pub fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

pub fn can_modify_post(actor: &CurrentUser, method: &Method, post: &Post) -> bool {
    is_safe_method(method) || post.creator_id == actor.id
}

pub fn can_modify_comment(actor: &CurrentUser, method: &Method, comment: &Comment) -> bool {
    is_safe_method(method) || comment.writer_id == actor.id
}

pub fn can_modify_user(actor: &CurrentUser, method: &Method, user: &User) -> bool {
    is_safe_method(method) || user.id == actor.id
}

/// Anyone may read tags; only staff may create them.
pub fn can_access_tags(actor: &CurrentUser, method: &Method) -> bool {
    is_safe_method(method) || actor.is_staff
}

pub fn ensure(allowed: bool) -> AppResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn actor(id: i64, is_staff: bool) -> CurrentUser {
        CurrentUser {
            id,
            email: format!("u{}@example.com", id),
            username: format!("u{}", id),
            is_staff,
            token: "t".into(),
        }
    }

    fn post_by(creator_id: i64) -> Post {
        Post {
            id: 1,
            title: "t".into(),
            content: String::new(),
            image: None,
            creator_id,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn only_creator_mutates_post() {
        let post = post_by(1);
        assert!(can_modify_post(&actor(2, false), &Method::GET, &post));
        assert!(!can_modify_post(&actor(2, false), &Method::PATCH, &post));
        assert!(!can_modify_post(&actor(2, true), &Method::DELETE, &post));
        assert!(can_modify_post(&actor(1, false), &Method::PUT, &post));
    }

    #[test]
    fn only_writer_mutates_comment() {
        let comment = Comment {
            id: 1,
            content: "c".into(),
            writer_id: 5,
            post_id: 1,
            created_at: Utc::now(),
        };
        assert!(can_modify_comment(&actor(6, false), &Method::GET, &comment));
        assert!(!can_modify_comment(&actor(6, false), &Method::PUT, &comment));
        assert!(can_modify_comment(&actor(5, false), &Method::DELETE, &comment));
    }

    #[test]
    fn tag_creation_requires_staff() {
        assert!(can_access_tags(&actor(1, false), &Method::GET));
        assert!(!can_access_tags(&actor(1, false), &Method::POST));
        assert!(can_access_tags(&actor(1, true), &Method::POST));
    }

    #[test]
    fn ensure_maps_to_forbidden() {
        assert!(ensure(true).is_ok());
        assert!(matches!(ensure(false), Err(AppError::Forbidden)));
    }
}
