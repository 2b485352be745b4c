use chrono::NaiveDate;

use super::post::FormError;
use super::{optional_text, required_text, FieldErrors, FormData, UploadedFile, REQUIRED};
use crate::db::models::UserId;
use crate::media;
use crate::repository::UserRepository;

pub const USERNAME_MAX_CHARS: usize = 100;
pub const EMAIL_MAX_CHARS: usize = 254;
pub const BIO_MAX_CHARS: usize = 255;
pub const PASSWORD_MIN_CHARS: usize = 5;

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: String,
    pub username: String,
    pub password: String,
    pub bio: Option<String>,
    pub birthday: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

/// Profile changes from PUT/PATCH. Nullable fields use `Some(None)` to clear.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub email: Option<String>,
    pub username: Option<String>,
    pub bio: Option<Option<String>>,
    pub birthday: Option<Option<NaiveDate>>,
    pub avatar: Option<Option<UploadedFile>>,
}

pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.contains('.')
        && !email.chars().any(char::is_whitespace)
}

pub fn is_valid_username(username: &str) -> bool {
    username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
}

/// Lowercases the domain part; the local part is kept as typed.
pub fn normalize_email(email: &str) -> String {
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

fn email_field(form: &FormData, errors: &mut FieldErrors) -> Option<String> {
    let email = required_text(form, "email", EMAIL_MAX_CHARS, errors)?;
    if !is_valid_email(&email) {
        errors.add("email", "Enter a valid email address.");
        return None;
    }
    Some(normalize_email(&email))
}

fn username_field(form: &FormData, errors: &mut FieldErrors) -> Option<String> {
    let username = required_text(form, "username", USERNAME_MAX_CHARS, errors)?;
    if !is_valid_username(&username) {
        errors.add(
            "username",
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
        );
        return None;
    }
    Some(username)
}

fn birthday_field(form: &FormData, errors: &mut FieldErrors) -> Option<NaiveDate> {
    let raw = form.text("birthday")?.trim();
    if raw.is_empty() {
        return None;
    }
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            errors.add(
                "birthday",
                "Date has wrong format. Use one of these formats instead: YYYY-MM-DD.",
            );
            None
        }
    }
}

async fn check_email_free<R: UserRepository + ?Sized>(
    repo: &R,
    email: &str,
    except: Option<UserId>,
    errors: &mut FieldErrors,
) -> Result<(), FormError> {
    if let Some(existing) = repo.find_by_email(email).await? {
        if Some(existing.id) != except {
            errors.add("email", "user with this email address already exists.");
        }
    }
    Ok(())
}

impl RegisterInput {
    pub async fn validate<R: UserRepository + ?Sized>(
        form: &FormData,
        repo: &R,
    ) -> Result<Self, FormError> {
        let mut errors = FieldErrors::default();

        let email = email_field(form, &mut errors);
        let username = username_field(form, &mut errors);
        let password = match form.text("password") {
            None | Some("") => {
                errors.add("password", REQUIRED);
                None
            }
            Some(p) if p.chars().count() < PASSWORD_MIN_CHARS => {
                errors.add(
                    "password",
                    format!(
                        "Ensure this field has at least {} characters.",
                        PASSWORD_MIN_CHARS
                    ),
                );
                None
            }
            Some(p) => Some(p.to_string()),
        };
        let bio = optional_text(form, "bio", BIO_MAX_CHARS, &mut errors);
        let birthday = birthday_field(form, &mut errors);

        if let Some(email) = &email {
            check_email_free(repo, email, None, &mut errors).await?;
        }

        match (email, username, password) {
            (Some(email), Some(username), Some(password)) => Ok(errors.finish(Self {
                email,
                username,
                password,
                bio,
                birthday,
            })?),
            _ => Err(errors.into()),
        }
    }
}

impl LoginInput {
    pub fn validate(form: &FormData) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::default();
        let email = required_text(form, "email", EMAIL_MAX_CHARS, &mut errors)
            .map(|email| normalize_email(&email));
        let password = match form.text("password") {
            None | Some("") => {
                errors.add("password", REQUIRED);
                None
            }
            Some(p) => Some(p.to_string()),
        };
        match (email, password) {
            (Some(email), Some(password)) => errors.finish(Self { email, password }),
            _ => Err(errors),
        }
    }
}

impl ProfilePatch {
    /// PUT requires email and username; PATCH only validates what is sent.
    pub async fn validate<R: UserRepository + ?Sized>(
        form: &mut FormData,
        repo: &R,
        user_id: UserId,
        partial: bool,
    ) -> Result<Self, FormError> {
        let mut errors = FieldErrors::default();

        let email = if partial && !form.has("email") {
            None
        } else {
            email_field(form, &mut errors)
        };
        let username = if partial && !form.has("username") {
            None
        } else {
            username_field(form, &mut errors)
        };
        let bio = form
            .has("bio")
            .then(|| optional_text(form, "bio", BIO_MAX_CHARS, &mut errors));
        let birthday = form
            .has("birthday")
            .then(|| birthday_field(form, &mut errors));

        let avatar = if form.is_null("avatar") {
            Some(None)
        } else {
            match form.take_file("avatar") {
                Some(file) => match media::validate_image(&file) {
                    Ok(_) => Some(Some(file)),
                    Err(msg) => {
                        errors.add("avatar", msg);
                        None
                    }
                },
                None => None,
            }
        };

        if let Some(email) = &email {
            check_email_free(repo, email, Some(user_id), &mut errors).await?;
        }

        Ok(errors.finish(Self {
            email,
            username,
            bio,
            birthday,
            avatar,
        })?)
    }
}
