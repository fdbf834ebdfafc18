//! Pure image and inference layer: no browser types, no async.
//!
//! Everything here operates on decoded `RgbImage` buffers; the engine
//! crate owns acquisition and decides which strategy to run.

pub mod acquire;
pub mod detector;
pub mod letterbox;
pub mod nms;
pub mod pixeldiff;

pub use acquire::{Acquired, align_pair, decode_image};
pub use detector::Detector;
pub use letterbox::{Letterbox, letterbox};
pub use nms::non_max_suppression;
pub use pixeldiff::locate_gap;
