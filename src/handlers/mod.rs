mod account;
mod health;
mod login;

pub use account::{dashboard, me, secure_me};
pub use health::{health_check, readiness_check};
pub use login::{AUTH_COOKIE_MAX_AGE_SECS, login};
