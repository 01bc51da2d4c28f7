//! Core abstractions for reqflow
//!
//! The shared execution context, the records it stores, the error type and
//! the capability traits the engine talks to.

pub mod context;
pub mod error;
pub mod record;
pub mod traits;

// Re-export commonly used types
pub use context::{ExecutionContext, ExecutionData};
pub use error::{FlowError, FlowResult};
pub use record::{RequestRecord, ResponseRecord};
pub use traits::*;
