pub mod handlers;
pub mod password;
pub mod tokens;

pub use password::{hash_password, verify_password};
pub use tokens::{generate_token, issue_token};
