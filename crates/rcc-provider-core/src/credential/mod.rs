mod pool;
mod quota;
mod secret;
mod state;
mod unavailable_queue;

pub use pool::{AcquireError, CredentialPool, ReleaseHandle, SelectionPolicy};
pub use quota::Quota;
pub use secret::Secret;
pub use state::{CredentialId, SlotStatus, UnavailableReason};
