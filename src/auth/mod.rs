//! Identity resolution: who is making this request.
//!
//! - [`identity`]: the resolved principal and its request-scoped accessors
//! - [`collaborators`]: token/session/whitelist contracts plus in-process implementations
//! - [`validator`]: ordered bearer → cookie token → legacy session resolution
//! - [`cookies`]: `Cookie` parsing and `Set-Cookie` construction

pub mod collaborators;
pub mod cookies;
pub mod identity;
pub mod validator;

pub use collaborators::{
    InMemorySessionStore, SessionValidator, StaticTokenValidator, TokenValidator, WhitelistPolicy,
};
pub use identity::{CurrentIdentity, Identity, IdentityExt, Role, attach_identity};
pub use validator::{AuthMode, CredentialSource, CredentialValidator, Rejection, Resolution};
