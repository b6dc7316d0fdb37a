//! Sign and verify workflow facades.

pub mod sign;
pub mod verify;

pub use sign::SignWorkflow;
pub use verify::VerifyWorkflow;
