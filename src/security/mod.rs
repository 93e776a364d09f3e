//! The security envelope: isolation, access control, audit, rate limiting

pub mod access;
pub mod audit;
pub mod isolation;
pub mod rate_limit;

pub use access::{
    AccessControl, AccessLevel, AccessPolicy, AccessToken, AuthDecision, IssuedToken, MemoryOp,
    PolicyUpdate,
};
pub use audit::{AuditLog, AuditRecord, AUDIT_CAPACITY};
pub use isolation::{IsolationStatus, NamespaceHandle, PersonaIsolation};
pub use rate_limit::{
    client_key, InProcessWindows, LimiterBackend, RateLimitDecision, RateLimiter,
    WindowCoordinator, WindowSlide,
};
