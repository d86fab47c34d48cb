//! Video probing, download and best-effort preprocessing.
//!
//! Everything in this crate runs external tools (ffprobe/ffmpeg) or plain
//! HTTP; nothing here touches the embedding stores.

pub mod download;
pub mod error;
pub mod probe;
pub mod roi;
pub mod shots;

pub use download::{download_video, is_remote_url};
pub use error::{MediaError, MediaResult};
pub use probe::{get_duration, probe_video, VideoInfo};
pub use roi::{detect_roi, RoiInfo};
pub use shots::{detect_shots, Shot, ShotConfig};
