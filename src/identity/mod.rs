//! Identity and session state shared by the request client, login negotiator and event channel.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod service_id;

pub use principal::{UserInfo, WhoAmI};
pub use session::{Session, SessionState, SessionToken};
pub use service_id::ServiceIdentity;
