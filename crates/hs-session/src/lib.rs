//! hs-session: Shared SSH sessions for hopshare
//!
//! Consumers acquire sessions from a [`SessionRegistry`]. The registry keeps
//! at most one live transport per destination in a [`ShareableSession`],
//! reference counts its consumers and port forwards, and hands every
//! acquisition a short-lived decorator ([`DirectSession`] or [`JumpSession`])
//! that maps connect/disconnect onto those counts. A [`SessionChain`] strings
//! those acquisitions together across several hops.

pub mod chain;
pub mod direct;
pub mod jump;
pub mod registry;
pub mod session;
pub mod shareable;
pub mod wrapper;

pub use chain::SessionChain;
pub use direct::DirectSession;
pub use jump::JumpSession;
pub use registry::{InvalidatePhase, SessionRegistry};
pub use session::Session;
pub use shareable::{SessionSnapshot, ShareableSession};
pub use wrapper::WrapperSession;
