//! Core services: token issuing and verification, sessions, persistence,
//! mail delivery and metrics.

pub mod auth;
pub mod cache;
mod database;
pub mod email;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod store;
pub mod tokens;

pub use auth::AuthService;
pub use cache::{MockTokenCache, RedisTokenCache, TokenCache};
pub use database::Database;
pub use email::{MailTemplate, Mailer, MockMailer, ProviderError, SmtpMailer};
pub use error::AuthError;
pub use memory::InMemoryStore;
pub use store::{EventStore, MemberStore, NotificationStore, Store};
pub use tokens::{AccessClaims, AccessTokenDetails, RefreshClaims, TokenPair, TokenService};
