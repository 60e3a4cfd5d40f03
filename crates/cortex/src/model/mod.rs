//! Value types shared across the decision pipeline.
//!
//! Everything here is plain data: constructors validate invariants where the
//! spec calls for it, but no type owns I/O or holds a lock.

mod candidate;
mod constraints;
mod decision;
mod observation;
mod recommendation;

pub use candidate::{Action, Candidate};
pub use constraints::Constraints;
pub use decision::{DecisionRecord, OutcomeFeedback, ToolTrace};
pub use observation::Observation;
pub use recommendation::Recommendation;
