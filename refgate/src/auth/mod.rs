//! Native authentication: argon2 password hashes and JWT session cookies.

pub mod current_user;
pub mod password;
pub mod session;
