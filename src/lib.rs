//! session-auth: an authentication façade.
//!
//! ARCHITECTURE
//! ============
//! ```text
//! SessionAdapter ──▶ Arc<dyn AuthService> ──▶ AuthTransport (HTTP) ─┐
//!   (observable)        │                                           │
//!                       └──▶ MockAuthService (in-memory directory)  │
//!                                   │                               │
//!                                   ▼                               ▼
//!                              SessionCache ──▶ Arc<dyn SessionStore>
//! ```
//!
//! Services own persistence; the adapter only sees returned values.
//! [`config::build_service`] picks the implementation from the environment.

pub mod adapter;
pub mod config;
pub mod error;
pub mod mock;
pub mod remote;
pub mod service;
pub mod store;
pub mod transport;
pub mod types;

pub use adapter::{AuthPhase, SessionAdapter, SessionState, SubscriptionId};
pub use config::{AuthConfig, BackendKind, Timeouts, build_service, build_store};
pub use error::AuthError;
pub use mock::{MockAuthService, MockClaims, ProfileOverrides};
pub use remote::RemoteAuthService;
pub use service::AuthService;
pub use store::{FileStore, MemoryStore, SessionKeys, SessionStore, StoreError};
pub use transport::{AuthTransport, HttpTransport, TransportError};
pub use types::{Credentials, Session, UserProfile};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
