//! HTTP side of the client: request plumbing, login negotiation and cluster member discovery.

mod client;
mod login;
mod request;
mod stars;

pub use client::{RequestClient, AUTH_TOKEN_HEADER, STAR_TARGET_HEADER};
pub use login::{LoginError, LoginNegotiator, LoginSettings, AUTH_PASSWORD_HEADER, SSO_DASHBOARD_PATH};
pub use request::{RequestSpec, Response};
pub use stars::{LocalStarInfo, StarDirectory, StarProperties, STARS_PATH, STAR_NAME_HEADER};
