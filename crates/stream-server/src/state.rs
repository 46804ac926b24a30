use std::path::PathBuf;

use crate::ffmpeg::Ffmpeg;
use crate::session::SessionManager;

#[derive(Clone)]
pub struct StreamServerState {
    /// `None` when ffmpeg was not found at startup; listing still works,
    /// conversion and streaming report the tool as unavailable.
    pub ffmpeg: Option<Ffmpeg>,
    pub sessions: SessionManager,
    pub video_dir: PathBuf,
    pub converted_dir: PathBuf,
}
