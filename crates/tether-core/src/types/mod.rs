//! # Types
//!
//! Plain data types shared by the facade, the command channel and the
//! platform backend.
//!
//! None of these types knows which thread it lives on; they are all `Send`
//! so they can cross the hand-off between a client thread and the control
//! thread.

pub mod address;
pub mod launch;
pub mod process;
pub mod registers;
pub mod signal;

// Re-export all public types
pub use address::Address;
pub use launch::{LaunchFlags, LaunchInfo};
pub use process::{ProcessId, ThreadId};
pub use registers::{RegisterSet, RegisterValue};
pub use signal::SignalInfo;
