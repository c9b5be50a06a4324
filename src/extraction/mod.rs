//! Subtitle extraction
//!
//! [`SubtitleExtractor`] is the seam the task processor calls once a video
//! is on local disk. [`MkvToolNixExtractor`] identifies tracks with
//! `mkvmerge -J` and pulls each one out with `mkvextract`, running both at
//! low priority through a [`CommandRunner`] that enforces a timeout and
//! kills the child on cancellation.

mod mkvtoolnix;
mod probe;
mod process;
mod traits;

pub use mkvtoolnix::MkvToolNixExtractor;
pub use probe::{ProbedTrack, extension_for_codec, parse_identification};
pub use process::CommandRunner;
pub use traits::SubtitleExtractor;
