//! Download engines
//!
//! [`DownloadEngine`] is the seam between the task processor and whatever
//! daemon actually fetches videos. [`Aria2Engine`] talks to aria2c over
//! JSON-RPC.

mod aria2;
mod traits;

pub use aria2::{Aria2Engine, output_file_name};
pub use traits::DownloadEngine;
