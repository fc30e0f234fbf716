//! Client-side session lifecycle coordination for tenant-scoped APIs.
//!
//! Establishes, refreshes, and tears down an authenticated, tenant-scoped
//! session: OAuth authorization-code exchange, refresh-credential bootstrap,
//! proactive token renewal, foreground re-validation, and tenant
//! configuration bootstrap, all while persisted state rehydrates.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | [`config::SessionConfig`] from environment variables |
//! | [`error`] | Per-seam error types |
//! | [`storage`] | Key-value storage seam and implementations |
//! | [`token`] | JWT claim decoding and refresh timing |
//! | [`host`] | Location, cookie, and visibility seams |
//! | [`state`] | Credential Store and Tenant Store |
//! | [`refresh`] | Refresh Scheduler |
//! | [`net`] | Identity-provider and tenant-config collaborators |
//! | [`session`] | Bootstrap, tenant loading, teardown, and the mount lifecycle |

pub mod config;
pub mod error;
pub mod host;
pub mod net;
pub mod refresh;
pub mod session;
pub mod state;
pub mod storage;
pub mod token;

pub use config::SessionConfig;
pub use error::SessionError;
pub use session::{Collaborators, MountedSession, SessionContext, mount};
