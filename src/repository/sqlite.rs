use std::collections::HashMap;

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};

use super::*;
use crate::db::{format_timestamp, now_timestamp, parse_date, parse_timestamp};
use crate::filters::PostScope;
use crate::relations::{Edge, Relation};
use crate::state::DbPool;

/// SQLite implementation of every repository trait.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: DbPool,
}

impl SqliteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = "id, email, username, password_hash, avatar, bio, birthday, \
                            is_staff, is_superuser, is_active, date_joined";

const POST_COLUMNS: &str = "p.id, p.title, p.content, p.image, p.creator_id, p.created_at, \
                            (SELECT COUNT(*) FROM post_likes l WHERE l.post_id = p.id)";

const COMMENT_COLUMNS: &str = "id, content, writer_id, post_id, created_at";

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    let birthday: Option<String> = row.get(6)?;
    let date_joined: String = row.get(10)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
        avatar: row.get(4)?,
        bio: row.get(5)?,
        birthday: birthday.map(|raw| parse_date(6, &raw)).transpose()?,
        is_staff: row.get(7)?,
        is_superuser: row.get(8)?,
        is_active: row.get(9)?,
        date_joined: parse_timestamp(10, &date_joined)?,
    })
}

/// Reads `POST_COLUMNS`: the post and its like count.
fn post_from_row(row: &Row) -> rusqlite::Result<(Post, i64)> {
    let created_at: String = row.get(5)?;
    let post = Post {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        image: row.get(3)?,
        creator_id: row.get(4)?,
        created_at: parse_timestamp(5, &created_at)?,
    };
    Ok((post, row.get(6)?))
}

fn comment_from_row(row: &Row) -> rusqlite::Result<Comment> {
    let created_at: String = row.get(4)?;
    Ok(Comment {
        id: row.get(0)?,
        content: row.get(1)?,
        writer_id: row.get(2)?,
        post_id: row.get(3)?,
        created_at: parse_timestamp(4, &created_at)?,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

// --- Synchronous helpers; each runs on a connection the caller already holds ---

fn load_user(conn: &Connection, id: UserId) -> Result<Option<User>, RepositoryError> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    Ok(conn.query_row(&sql, params![id], user_from_row).optional()?)
}

fn load_tags(
    conn: &Connection,
    post_ids: &[PostId],
) -> Result<HashMap<PostId, Vec<Tag>>, RepositoryError> {
    let mut by_post: HashMap<PostId, Vec<Tag>> = HashMap::new();
    if post_ids.is_empty() {
        return Ok(by_post);
    }

    let sql = format!(
        "SELECT pt.post_id, t.id, t.name FROM post_tags pt
         JOIN tags t ON t.id = pt.tag_id
         WHERE pt.post_id IN ({})
         ORDER BY t.id",
        placeholders(post_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(post_ids.iter()), |row| {
        Ok((
            row.get::<_, PostId>(0)?,
            Tag {
                id: row.get(1)?,
                name: row.get(2)?,
            },
        ))
    })?;
    for row in rows {
        let (post_id, tag) = row?;
        by_post.entry(post_id).or_default().push(tag);
    }
    Ok(by_post)
}

fn with_tags(
    conn: &Connection,
    rows: Vec<(Post, i64)>,
) -> Result<Vec<PostRecord>, RepositoryError> {
    let ids: Vec<PostId> = rows.iter().map(|(p, _)| p.id).collect();
    let mut tags = load_tags(conn, &ids)?;
    Ok(rows
        .into_iter()
        .map(|(post, count_likes)| PostRecord {
            tags: tags.remove(&post.id).unwrap_or_default(),
            post,
            count_likes,
        })
        .collect())
}

fn load_post(conn: &Connection, id: PostId) -> Result<Option<PostRecord>, RepositoryError> {
    let sql = format!("SELECT {} FROM posts p WHERE p.id = ?1", POST_COLUMNS);
    let Some(row) = conn.query_row(&sql, params![id], post_from_row).optional()? else {
        return Ok(None);
    };
    Ok(with_tags(conn, vec![row])?.pop())
}

fn tag_exists(conn: &Connection, id: TagId) -> Result<bool, RepositoryError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) > 0 FROM tags WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?)
}

fn replace_tags(conn: &Connection, post_id: PostId, tag_ids: &[TagId]) -> Result<(), RepositoryError> {
    conn.execute("DELETE FROM post_tags WHERE post_id = ?1", params![post_id])?;
    for tag_id in tag_ids {
        if !tag_exists(conn, *tag_id)? {
            return Err(RepositoryError::NotFound(format!("tag {}", tag_id)));
        }
        conn.execute(
            "INSERT OR IGNORE INTO post_tags (post_id, tag_id) VALUES (?1, ?2)",
            params![post_id, tag_id],
        )?;
    }
    Ok(())
}

/// WHERE clause and bound values for a post filter over alias `p`.
fn post_filter_sql(filter: &PostFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(title) = &filter.title {
        clauses.push("instr(casefold(p.title), ?) > 0".to_string());
        values.push(Value::Text(title.to_lowercase()));
    }

    if let Some(tag_ids) = &filter.tag_ids {
        if tag_ids.is_empty() {
            clauses.push("0".to_string());
        } else {
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM post_tags pt WHERE pt.post_id = p.id AND pt.tag_id IN ({}))",
                placeholders(tag_ids.len())
            ));
            values.extend(tag_ids.iter().map(|id| Value::Integer(*id)));
        }
    }

    match filter.scope {
        PostScope::All => {}
        PostScope::CreatedBy(user) => {
            clauses.push("p.creator_id = ?".to_string());
            values.push(Value::Integer(user));
        }
        PostScope::LikedBy(user) => {
            clauses.push(
                "EXISTS (SELECT 1 FROM post_likes l WHERE l.post_id = p.id AND l.user_id = ?)"
                    .to_string(),
            );
            values.push(Value::Integer(user));
        }
        PostScope::FollowedBy(user) => {
            clauses.push(
                "p.creator_id IN (SELECT followed_id FROM user_follows WHERE follower_id = ?)"
                    .to_string(),
            );
            values.push(Value::Integer(user));
        }
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (where_sql, values)
}

fn user_filter_sql(filter: &UserFilter) -> (String, Vec<Value>) {
    match &filter.username {
        Some(username) => (
            "WHERE instr(casefold(username), ?) > 0".to_string(),
            vec![Value::Text(username.to_lowercase())],
        ),
        None => (String::new(), Vec::new()),
    }
}

fn edge_table(relation: Relation) -> (&'static str, &'static str, &'static str) {
    match relation {
        Relation::Likes => ("post_likes", "user_id", "post_id"),
        Relation::Follows => ("user_follows", "follower_id", "followed_id"),
    }
}

#[async_trait]
impl UserRepository for SqliteRepository {
    async fn create_user(&self, user: NewUser) -> Result<User, RepositoryError> {
        let conn = self.pool.get()?;

        let inserted = conn.execute(
            "INSERT INTO users (email, username, password_hash, bio, birthday,
                                is_staff, is_superuser, is_active, date_joined)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)",
            params![
                user.email,
                user.username,
                user.password_hash,
                user.bio,
                user.birthday.map(|d| d.format("%Y-%m-%d").to_string()),
                user.is_staff,
                user.is_superuser,
                now_timestamp(),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(RepositoryError::Conflict(
                    "user with this email address already exists.".into(),
                ))
            }
            Err(e) => return Err(e.into()),
        }

        let id = conn.last_insert_rowid();
        load_user(&conn, id)?.ok_or_else(|| RepositoryError::NotFound(format!("user {}", id)))
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let conn = self.pool.get()?;
        load_user(&conn, id)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS);
        Ok(conn.query_row(&sql, params![email], user_from_row).optional()?)
    }

    async fn count_users(&self, filter: &UserFilter) -> Result<i64, RepositoryError> {
        let conn = self.pool.get()?;
        let (where_sql, values) = user_filter_sql(filter);
        let sql = format!("SELECT COUNT(*) FROM users {}", where_sql);
        Ok(conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?)
    }

    async fn list_users(
        &self,
        filter: &UserFilter,
        page: &PageRequest,
    ) -> Result<Vec<User>, RepositoryError> {
        let conn = self.pool.get()?;
        let (where_sql, mut values) = user_filter_sql(filter);
        values.push(Value::Integer(page.limit()));
        values.push(Value::Integer(page.offset()));

        let sql = format!(
            "SELECT {} FROM users {} ORDER BY email, id LIMIT ? OFFSET ?",
            USER_COLUMNS, where_sql
        );
        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map(params_from_iter(values), user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    async fn update_user(&self, id: UserId, changes: UserChanges) -> Result<User, RepositoryError> {
        let conn = self.pool.get()?;
        let mut user =
            load_user(&conn, id)?.ok_or_else(|| RepositoryError::NotFound(format!("user {}", id)))?;

        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(username) = changes.username {
            user.username = username;
        }
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        if let Some(avatar) = changes.avatar {
            user.avatar = avatar;
        }
        if let Some(bio) = changes.bio {
            user.bio = bio;
        }
        if let Some(birthday) = changes.birthday {
            user.birthday = birthday;
        }

        let updated = conn.execute(
            "UPDATE users SET email = ?1, username = ?2, password_hash = ?3,
                              avatar = ?4, bio = ?5, birthday = ?6
             WHERE id = ?7",
            params![
                user.email,
                user.username,
                user.password_hash,
                user.avatar,
                user.bio,
                user.birthday.map(|d| d.format("%Y-%m-%d").to_string()),
                id,
            ],
        );
        match updated {
            Ok(_) => Ok(user),
            Err(e) if is_constraint_violation(&e) => Err(RepositoryError::Conflict(
                "user with this email address already exists.".into(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_user(&self, id: UserId) -> Result<bool, RepositoryError> {
        let conn = self.pool.get()?;
        let rows = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }
}

#[async_trait]
impl TokenRepository for SqliteRepository {
    async fn get_or_create_token(
        &self,
        user_id: UserId,
        candidate: &str,
    ) -> Result<String, RepositoryError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO auth_tokens (key, user_id, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO NOTHING",
            params![candidate, user_id, now_timestamp()],
        )?;
        Ok(conn.query_row(
            "SELECT key FROM auth_tokens WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?)
    }

    async fn user_for_token(&self, key: &str) -> Result<Option<User>, RepositoryError> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT {} FROM users WHERE id = (SELECT user_id FROM auth_tokens WHERE key = ?1)",
            USER_COLUMNS
        );
        Ok(conn.query_row(&sql, params![key], user_from_row).optional()?)
    }

    async fn delete_token(&self, key: &str) -> Result<bool, RepositoryError> {
        let conn = self.pool.get()?;
        let rows = conn.execute("DELETE FROM auth_tokens WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }
}

#[async_trait]
impl PostRepository for SqliteRepository {
    async fn create_post(&self, post: NewPost) -> Result<PostRecord, RepositoryError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO posts (title, content, image, creator_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                post.title,
                post.content,
                post.image,
                post.creator_id,
                now_timestamp()
            ],
        )?;
        let id = tx.last_insert_rowid();
        replace_tags(&tx, id, &post.tag_ids)?;
        let record = load_post(&tx, id)?;
        tx.commit()?;

        record.ok_or_else(|| RepositoryError::NotFound(format!("post {}", id)))
    }

    async fn insert_post(
        &self,
        title: &str,
        content: &str,
        image: Option<&str>,
        creator_id: UserId,
    ) -> Result<Post, RepositoryError> {
        let conn = self.pool.get()?;
        let created_at = chrono::Utc::now();
        let inserted = conn.execute(
            "INSERT INTO posts (title, content, image, creator_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![title, content, image, creator_id, format_timestamp(&created_at)],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(RepositoryError::NotFound(format!("user {}", creator_id)))
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Post {
            id: conn.last_insert_rowid(),
            title: title.to_string(),
            content: content.to_string(),
            image: image.map(str::to_string),
            creator_id,
            created_at,
        })
    }

    async fn attach_tag(&self, post_id: PostId, tag_id: TagId) -> Result<(), RepositoryError> {
        let conn = self.pool.get()?;
        if !tag_exists(&conn, tag_id)? {
            return Err(RepositoryError::NotFound(format!("tag {}", tag_id)));
        }
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO post_tags (post_id, tag_id) VALUES (?1, ?2)",
            params![post_id, tag_id],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => {
                Err(RepositoryError::NotFound(format!("post {}", post_id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn touch_post(&self, id: PostId) -> Result<(), RepositoryError> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE posts SET created_at = ?1 WHERE id = ?2",
            params![now_timestamp(), id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound(format!("post {}", id)));
        }
        Ok(())
    }

    async fn find_post(&self, id: PostId) -> Result<Option<PostRecord>, RepositoryError> {
        let conn = self.pool.get()?;
        load_post(&conn, id)
    }

    async fn count_posts(&self, filter: &PostFilter) -> Result<i64, RepositoryError> {
        let conn = self.pool.get()?;
        let (where_sql, values) = post_filter_sql(filter);
        let sql = format!("SELECT COUNT(*) FROM posts p {}", where_sql);
        Ok(conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?)
    }

    async fn list_posts(
        &self,
        filter: &PostFilter,
        page: &PageRequest,
    ) -> Result<Vec<PostRecord>, RepositoryError> {
        let conn = self.pool.get()?;
        let (where_sql, mut values) = post_filter_sql(filter);
        values.push(Value::Integer(page.limit()));
        values.push(Value::Integer(page.offset()));

        let sql = format!(
            "SELECT {} FROM posts p {} ORDER BY p.created_at, p.title, p.id LIMIT ? OFFSET ?",
            POST_COLUMNS, where_sql
        );
        let rows = {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values), post_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        with_tags(&conn, rows)
    }

    async fn update_post(
        &self,
        id: PostId,
        changes: PostChanges,
    ) -> Result<PostRecord, RepositoryError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let mut post = load_post(&tx, id)?
            .ok_or_else(|| RepositoryError::NotFound(format!("post {}", id)))?
            .post;
        if let Some(title) = changes.title {
            post.title = title;
        }
        if let Some(content) = changes.content {
            post.content = content;
        }
        if let Some(image) = changes.image {
            post.image = image;
        }

        tx.execute(
            "UPDATE posts SET title = ?1, content = ?2, image = ?3, created_at = ?4 WHERE id = ?5",
            params![post.title, post.content, post.image, now_timestamp(), id],
        )?;
        if let Some(tag_ids) = &changes.tag_ids {
            replace_tags(&tx, id, tag_ids)?;
        }
        let record = load_post(&tx, id)?;
        tx.commit()?;

        record.ok_or_else(|| RepositoryError::NotFound(format!("post {}", id)))
    }

    async fn delete_post(&self, id: PostId) -> Result<bool, RepositoryError> {
        let conn = self.pool.get()?;
        let rows = conn.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }
}

#[async_trait]
impl TagRepository for SqliteRepository {
    async fn create_tag(&self, name: &str) -> Result<Tag, RepositoryError> {
        let conn = self.pool.get()?;
        conn.execute("INSERT INTO tags (name) VALUES (?1)", params![name])?;
        Ok(Tag {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, RepositoryError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT id, name FROM tags ORDER BY id")?;
        let tags = stmt
            .query_map([], |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    async fn missing_tags(&self, ids: &[TagId]) -> Result<Vec<TagId>, RepositoryError> {
        let conn = self.pool.get()?;
        let mut missing = Vec::new();
        for id in ids {
            if !tag_exists(&conn, *id)? {
                missing.push(*id);
            }
        }
        Ok(missing)
    }
}

#[async_trait]
impl CommentRepository for SqliteRepository {
    async fn create_comment(&self, comment: NewComment) -> Result<Comment, RepositoryError> {
        let conn = self.pool.get()?;
        let created_at = chrono::Utc::now();
        let inserted = conn.execute(
            "INSERT INTO comments (content, writer_id, post_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                comment.content,
                comment.writer_id,
                comment.post_id,
                format_timestamp(&created_at)
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(RepositoryError::NotFound(format!("post {}", comment.post_id)))
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Comment {
            id: conn.last_insert_rowid(),
            content: comment.content,
            writer_id: comment.writer_id,
            post_id: comment.post_id,
            created_at,
        })
    }

    async fn find_comment(&self, id: CommentId) -> Result<Option<Comment>, RepositoryError> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {} FROM comments WHERE id = ?1", COMMENT_COLUMNS);
        Ok(conn.query_row(&sql, params![id], comment_from_row).optional()?)
    }

    async fn list_comments(&self, post_id: PostId) -> Result<Vec<Comment>, RepositoryError> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT {} FROM comments WHERE post_id = ?1 ORDER BY created_at, id",
            COMMENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let comments = stmt
            .query_map(params![post_id], comment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    async fn update_comment(
        &self,
        id: CommentId,
        content: &str,
    ) -> Result<Comment, RepositoryError> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE comments SET content = ?1, created_at = ?2 WHERE id = ?3",
            params![content, now_timestamp(), id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound(format!("comment {}", id)));
        }
        let sql = format!("SELECT {} FROM comments WHERE id = ?1", COMMENT_COLUMNS);
        Ok(conn.query_row(&sql, params![id], comment_from_row)?)
    }

    async fn delete_comment(&self, id: CommentId) -> Result<bool, RepositoryError> {
        let conn = self.pool.get()?;
        let rows = conn.execute("DELETE FROM comments WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }
}

#[async_trait]
impl EdgeStore for SqliteRepository {
    async fn has_edge(&self, edge: Edge) -> Result<bool, RepositoryError> {
        let conn = self.pool.get()?;
        let (table, source_col, target_col) = edge_table(edge.relation);
        let sql = format!(
            "SELECT COUNT(*) > 0 FROM {} WHERE {} = ?1 AND {} = ?2",
            table, source_col, target_col
        );
        Ok(conn.query_row(&sql, params![edge.source, edge.target], |row| row.get(0))?)
    }

    async fn add_edge(&self, edge: Edge) -> Result<bool, RepositoryError> {
        let conn = self.pool.get()?;
        let (table, source_col, target_col) = edge_table(edge.relation);
        let sql = format!(
            "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?1, ?2)",
            table, source_col, target_col
        );
        match conn.execute(&sql, params![edge.source, edge.target]) {
            Ok(rows) => Ok(rows > 0),
            Err(e) if is_constraint_violation(&e) => Err(RepositoryError::NotFound(format!(
                "{:?} target {}",
                edge.relation, edge.target
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_edge(&self, edge: Edge) -> Result<bool, RepositoryError> {
        let conn = self.pool.get()?;
        let (table, source_col, target_col) = edge_table(edge.relation);
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1 AND {} = ?2",
            table, source_col, target_col
        );
        let rows = conn.execute(&sql, params![edge.source, edge.target])?;
        Ok(rows > 0)
    }

    async fn edge_targets(
        &self,
        relation: Relation,
        source: i64,
    ) -> Result<Vec<i64>, RepositoryError> {
        let conn = self.pool.get()?;
        let (table, source_col, target_col) = edge_table(relation);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 ORDER BY {}",
            target_col, table, source_col, target_col
        );
        let mut stmt = conn.prepare(&sql)?;
        let targets = stmt
            .query_map(params![source], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_memory_pool, run_migrations};
    use crate::filters::PostScope;
    use crate::relations::{toggle, ToggleOutcome};

    fn repo() -> SqliteRepository {
        let pool = create_memory_pool().unwrap();
        run_migrations(&pool).unwrap();
        SqliteRepository::new(pool)
    }

    async fn user(repo: &SqliteRepository, email: &str, username: &str) -> User {
        repo.create_user(NewUser {
            email: email.into(),
            username: username.into(),
            password_hash: "x".into(),
            bio: None,
            birthday: None,
            is_staff: false,
            is_superuser: false,
        })
        .await
        .unwrap()
    }

    async fn post(repo: &SqliteRepository, creator: UserId, title: &str, tags: Vec<TagId>) -> PostRecord {
        repo.create_post(NewPost {
            title: title.into(),
            content: String::new(),
            image: None,
            creator_id: creator,
            tag_ids: tags,
        })
        .await
        .unwrap()
    }

    fn page() -> PageRequest {
        PageRequest {
            page: 1,
            page_size: 100,
        }
    }

    fn titles(records: &[PostRecord]) -> Vec<&str> {
        records.iter().map(|r| r.post.title.as_str()).collect()
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let repo = repo();
        user(&repo, "a@example.com", "a").await;
        let err = repo
            .create_user(NewUser {
                email: "a@example.com".into(),
                username: "other".into(),
                password_hash: "x".into(),
                bio: None,
                birthday: None,
                is_staff: false,
                is_superuser: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn token_is_reused_per_user() {
        let repo = repo();
        let alice = user(&repo, "a@example.com", "a").await;

        let first = repo.get_or_create_token(alice.id, "k1").await.unwrap();
        let second = repo.get_or_create_token(alice.id, "k2").await.unwrap();
        assert_eq!(first, "k1");
        assert_eq!(second, "k1");

        let found = repo.user_for_token("k1").await.unwrap().unwrap();
        assert_eq!(found.id, alice.id);

        assert!(repo.delete_token("k1").await.unwrap());
        assert!(repo.user_for_token("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_post_attaches_tags() {
        let repo = repo();
        let alice = user(&repo, "a@example.com", "a").await;
        let rust = repo.create_tag("rust").await.unwrap();
        let sql = repo.create_tag("sql").await.unwrap();

        let record = post(&repo, alice.id, "Hello", vec![rust.id, sql.id]).await;
        assert_eq!(record.tags, vec![rust, sql]);
        assert_eq!(record.count_likes, 0);
    }

    #[tokio::test]
    async fn create_post_with_missing_tag_rolls_back() {
        let repo = repo();
        let alice = user(&repo, "a@example.com", "a").await;

        let err = repo
            .create_post(NewPost {
                title: "Hello".into(),
                content: String::new(),
                image: None,
                creator_id: alice.id,
                tag_ids: vec![99],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
        assert_eq!(repo.count_posts(&PostFilter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn title_filter_is_case_insensitive_substring() {
        let repo = repo();
        let alice = user(&repo, "a@example.com", "a").await;
        post(&repo, alice.id, "Test Post", vec![]).await;
        post(&repo, alice.id, "another test", vec![]).await;
        post(&repo, alice.id, "Unrelated", vec![]).await;

        let filter = PostFilter {
            title: Some("Test".into()),
            ..Default::default()
        };
        let found = repo.list_posts(&filter, &page()).await.unwrap();
        assert_eq!(repo.count_posts(&filter).await.unwrap(), 2);
        assert_eq!(titles(&found), vec!["Test Post", "another test"]);
    }

    #[tokio::test]
    async fn tag_filter_returns_union_without_duplicates() {
        let repo = repo();
        let alice = user(&repo, "a@example.com", "a").await;
        let t1 = repo.create_tag("one").await.unwrap();
        let t2 = repo.create_tag("two").await.unwrap();
        let t3 = repo.create_tag("three").await.unwrap();
        post(&repo, alice.id, "first", vec![t1.id]).await;
        post(&repo, alice.id, "second", vec![t2.id]).await;
        post(&repo, alice.id, "both", vec![t1.id, t2.id]).await;
        post(&repo, alice.id, "other", vec![t3.id]).await;

        let filter = PostFilter {
            tag_ids: Some(vec![t1.id, t2.id]),
            ..Default::default()
        };
        let found = repo.list_posts(&filter, &page()).await.unwrap();
        assert_eq!(titles(&found), vec!["first", "second", "both"]);
    }

    #[tokio::test]
    async fn like_count_tracks_edges() {
        let repo = repo();
        let alice = user(&repo, "a@example.com", "a").await;
        let bob = user(&repo, "b@example.com", "b").await;
        let record = post(&repo, alice.id, "Hello", vec![]).await;

        toggle(&repo, Relation::Likes, alice.id, record.post.id).await.unwrap();
        toggle(&repo, Relation::Likes, bob.id, record.post.id).await.unwrap();
        let found = repo.find_post(record.post.id).await.unwrap().unwrap();
        assert_eq!(found.count_likes, 2);

        let outcome = toggle(&repo, Relation::Likes, bob.id, record.post.id)
            .await
            .unwrap();
        assert_eq!(outcome, ToggleOutcome::Removed);
        let found = repo.find_post(record.post.id).await.unwrap().unwrap();
        assert_eq!(found.count_likes, 1);
    }

    #[tokio::test]
    async fn scopes_select_liked_own_and_followed_posts() {
        let repo = repo();
        let alice = user(&repo, "a@example.com", "a").await;
        let bob = user(&repo, "b@example.com", "b").await;
        let carol = user(&repo, "c@example.com", "c").await;
        let by_bob = post(&repo, bob.id, "by bob", vec![]).await;
        post(&repo, carol.id, "by carol", vec![]).await;
        post(&repo, alice.id, "by alice", vec![]).await;

        repo.add_edge(Edge::new(Relation::Follows, alice.id, bob.id))
            .await
            .unwrap();
        repo.add_edge(Edge::new(Relation::Likes, alice.id, by_bob.post.id))
            .await
            .unwrap();

        let scoped = |scope| PostFilter {
            scope,
            ..Default::default()
        };
        let mine = repo
            .list_posts(&scoped(PostScope::CreatedBy(alice.id)), &page())
            .await
            .unwrap();
        assert_eq!(titles(&mine), vec!["by alice"]);

        let liked = repo
            .list_posts(&scoped(PostScope::LikedBy(alice.id)), &page())
            .await
            .unwrap();
        assert_eq!(titles(&liked), vec!["by bob"]);

        let followed = repo
            .list_posts(&scoped(PostScope::FollowedBy(alice.id)), &page())
            .await
            .unwrap();
        assert_eq!(titles(&followed), vec!["by bob"]);
    }

    #[tokio::test]
    async fn users_filter_by_username_and_order_by_email() {
        let repo = repo();
        user(&repo, "z@example.com", "Zed").await;
        user(&repo, "b@example.com", "zoe").await;
        user(&repo, "a@example.com", "amy").await;

        let all = repo
            .list_users(&UserFilter::default(), &page())
            .await
            .unwrap();
        let emails: Vec<_> = all.iter().map(|u| u.email.as_str()).collect();
        assert_eq!(emails, vec!["a@example.com", "b@example.com", "z@example.com"]);

        let filter = UserFilter {
            username: Some("Z".into()),
        };
        assert_eq!(repo.count_users(&filter).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn update_post_refreshes_created_at_and_tags() {
        let repo = repo();
        let alice = user(&repo, "a@example.com", "a").await;
        let tag = repo.create_tag("t").await.unwrap();
        let record = post(&repo, alice.id, "Old", vec![]).await;

        let updated = repo
            .update_post(
                record.post.id,
                PostChanges {
                    title: Some("New".into()),
                    tag_ids: Some(vec![tag.id]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.post.title, "New");
        assert_eq!(updated.tags, vec![tag]);
        assert!(updated.post.created_at >= record.post.created_at);
    }

    #[tokio::test]
    async fn attach_tag_reports_missing_tag() {
        let repo = repo();
        let alice = user(&repo, "a@example.com", "a").await;
        let bare = repo.insert_post("t", "", None, alice.id).await.unwrap();
        let err = repo.attach_tag(bare.id, 42).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn deleting_user_cascades() {
        let repo = repo();
        let alice = user(&repo, "a@example.com", "a").await;
        let bob = user(&repo, "b@example.com", "b").await;
        let record = post(&repo, alice.id, "Hello", vec![]).await;
        let comment = repo
            .create_comment(NewComment {
                content: "hi".into(),
                writer_id: bob.id,
                post_id: record.post.id,
            })
            .await
            .unwrap();

        assert!(repo.delete_user(alice.id).await.unwrap());
        assert!(repo.find_post(record.post.id).await.unwrap().is_none());
        assert!(repo.find_comment(comment.id).await.unwrap().is_none());
    }
}
