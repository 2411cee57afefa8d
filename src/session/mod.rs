//! Suspended runs awaiting human feedback.
//!
//! When a run reaches its feedback prompt it ends its stream and leaves a
//! [`PendingFeedback`] here, keyed by thread id. A later request on the same
//! thread takes it back exactly once and resumes from it.
//!
//! # Example
//!
//! ```rust
//! use crew_agui::session::{Overwrite, PendingFeedback, SessionRegistry};
//!
//! let registry = SessionRegistry::new();
//! let pending = PendingFeedback {
//!     thread_id: "t1".into(),
//!     location: "Chicago".into(),
//!     query: "Find Italian restaurants in Chicago".into(),
//!     recommendations: String::new(),
//!     restaurants: Vec::new(),
//!     feedback_options: Vec::new(),
//!     created_at: chrono::Utc::now(),
//! };
//! registry.register("t1", pending, Overwrite::Deny).unwrap();
//!
//! assert!(registry.take("t1").is_ok());
//! assert!(registry.take("t1").is_err());
//! ```

mod registry;

pub use registry::{Overwrite, PendingFeedback, RegistryError, SessionRegistry};
