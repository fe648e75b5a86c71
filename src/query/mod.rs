//! Query builder and read execution.
//!
//! A [`QueryBuilder`] collects constraints for one collection and runs them
//! when a terminal method is called:
//!
//! ```ignore
//! let response = store
//!     .from("employees")
//!     .eq("department.code", "FIN")
//!     .or("name.ilike.%ali%,email.ilike.%ali%")
//!     .order("created_at", false)
//!     .limit(20)
//!     .execute();
//! ```

mod builder;
pub mod executor;
pub mod filter;
mod response;

pub use builder::{QueryBuilder, SelectOptions};
pub use executor::{OrderBy, Query, ReadOutcome};
pub use filter::{Constraint, OrConstraint, OrOperator};
pub use response::{QueryResponse, WriteResponse};
