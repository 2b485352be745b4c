//! Filtering and page-number pagination for post and user listings.
//!
//! Filters are plain values; the repository turns them into SQL. Listing
//! order is fixed per resource: posts by `created_at`, then title; users by
//! email.

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::config::PaginationConfig;
use crate::db::models::{TagId, UserId};
use crate::error::AppError;
use crate::forms::FieldErrors;

/// Which slice of posts a listing starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostScope {
    #[default]
    All,
    CreatedBy(UserId),
    LikedBy(UserId),
    /// Posts whose creator is followed by the given user
    FollowedBy(UserId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFilter {
    /// Case-insensitive substring of the title
    pub title: Option<String>,
    /// Keep posts carrying at least one of these tags
    pub tag_ids: Option<Vec<TagId>>,
    pub scope: PostScope,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    /// Case-insensitive substring of the username
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostListQuery {
    pub title: Option<String>,
    pub tags: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserListQuery {
    pub username: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

/// Parse a comma-separated id list such as `4,7`.
pub fn parse_tag_ids(raw: &str) -> Result<Vec<TagId>, String> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<TagId>()
                .map_err(|_| format!("\"{}\" is not a valid tag id.", part.trim()))
        })
        .collect()
}

impl PostFilter {
    pub fn from_query(query: &PostListQuery, scope: PostScope) -> Result<Self, FieldErrors> {
        let tag_ids = match non_empty(&query.tags) {
            Some(raw) => match parse_tag_ids(&raw) {
                Ok(ids) => Some(ids),
                Err(msg) => return Err(FieldErrors::single("tags", msg)),
            },
            None => None,
        };

        Ok(Self {
            title: non_empty(&query.title),
            tag_ids,
            scope,
        })
    }

    /// Query parameters to carry over into next/previous links.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(title) = &self.title {
            pairs.push(("title", title.clone()));
        }
        if let Some(ids) = &self.tag_ids {
            let joined = ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            pairs.push(("tags", joined));
        }
        pairs
    }
}

impl UserFilter {
    pub fn from_query(query: &UserListQuery) -> Self {
        Self {
            username: non_empty(&query.username),
        }
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        self.username
            .iter()
            .map(|u| ("username", u.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    /// Page numbers that do not parse are rejected; a bad page size falls
    /// back to the default and an oversized one is clamped.
    pub fn from_query(
        page: Option<&str>,
        page_size: Option<&str>,
        config: &PaginationConfig,
    ) -> Result<Self, AppError> {
        let page = match page {
            None | Some("") => 1,
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n >= 1 => n,
                _ => return Err(AppError::InvalidPage),
            },
        };

        let page_size = page_size
            .and_then(|raw| raw.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .map(|n| n.min(config.max_page_size))
            .unwrap_or(config.page_size);

        Ok(Self { page, page_size })
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    /// Total pages for `count` rows; an empty listing still has one page.
    pub fn num_pages(&self, count: i64) -> i64 {
        let size = i64::from(self.page_size);
        ((count + size - 1) / size).max(1)
    }

    pub fn validate_against(&self, count: i64) -> Result<(), AppError> {
        if i64::from(self.page) > self.num_pages(count) {
            return Err(AppError::InvalidPage);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub count: i64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(
        results: Vec<T>,
        count: i64,
        request: &PageRequest,
        path: &str,
        pairs: &[(&'static str, String)],
    ) -> Self {
        let num_pages = request.num_pages(count);
        let page = i64::from(request.page);

        let next = (page < num_pages).then(|| page_link(path, pairs, request, page + 1));
        let previous = (page > 1).then(|| page_link(path, pairs, request, page - 1));

        Self {
            count,
            next,
            previous,
            results,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            next: self.next,
            previous: self.previous,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}

fn page_link(
    path: &str,
    pairs: &[(&'static str, String)],
    request: &PageRequest,
    page: i64,
) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        query.append_pair(key, value);
    }
    query.append_pair("page", &page.to_string());
    query.append_pair("page_size", &request.page_size.to_string());
    format!("{}?{}", path, query.finish())
}
