//! Frame-indexed video decoding for animated stages.
//!
//! Stages request exact frame indices (`local_time`), so decoding here is
//! synchronous seek-and-read rather than free-running playback: `seek_frame`
//! positions the stream, `decode_current` produces the RGBA frame. A seek is
//! issued at most once per requested frame index; repeated requests for the
//! same index return the cached frame.

use serde::{Deserialize, Serialize};
use std::{
    ffi::OsStr,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>, // RGBA, row-major, tightly packed
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Output width (pixels).
    #[serde(default = "default_width")]
    pub width: u32,

    /// Output height (pixels).
    #[serde(default = "default_height")]
    pub height: u32,

    /// Nominal fps used to map frame indices to timestamps.
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Input file path.
    pub file: String,

    /// Total frame count, used to answer duration queries and clamp seeks.
    #[serde(default)]
    pub duration_frames: u32,

    /// Optional explicit ffmpeg binary path.
    #[serde(default)]
    pub ffmpeg_path: Option<String>,
}

fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    360
}
fn default_fps() -> u32 {
    30
}

#[derive(thiserror::Error, Debug)]
pub enum VideoError {
    #[error("ffmpeg not found (set TEXGRAPH_FFMPEG, config.ffmpeg_path, or have ffmpeg on PATH)")]
    FfmpegNotFound,

    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(#[from] io::Error),

    #[error("ffmpeg produced no frame at index {0}")]
    NoFrame(i64),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// A seekable decoded video source.
#[derive(Debug)]
pub struct VideoStream {
    cfg: VideoConfig,
    current_frame: i64,
    frame: Option<VideoFrame>,
}

impl VideoStream {
    pub fn from_config(cfg: VideoConfig) -> Result<Self, VideoError> {
        if cfg.file.trim().is_empty() {
            return Err(VideoError::InvalidConfig("file is empty".into()));
        }
        if cfg.width == 0 || cfg.height == 0 {
            return Err(VideoError::InvalidConfig("width/height must be > 0".into()));
        }
        if cfg.fps == 0 {
            return Err(VideoError::InvalidConfig("fps must be > 0".into()));
        }
        Ok(Self {
            cfg,
            current_frame: -1,
            frame: None,
        })
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, VideoError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| VideoError::InvalidConfig(format!("read json: {e}")))?;
        let cfg: VideoConfig = serde_json::from_str(&text)
            .map_err(|e| VideoError::InvalidConfig(format!("parse json: {e}")))?;
        Self::from_config(cfg)
    }

    pub fn config(&self) -> &VideoConfig {
        &self.cfg
    }

    /// Frame count of the source, or 1 when unknown (still behaves like a
    /// single-frame animation).
    pub fn duration_frames(&self) -> u32 {
        self.cfg.duration_frames.max(1)
    }

    /// Positions the stream at `frame_index`. No-op when already there; the
    /// underlying ffmpeg seek is expensive and must not run twice for the same
    /// requested frame.
    pub fn seek_frame(&mut self, frame_index: i64) -> Result<(), VideoError> {
        let clamped = if self.cfg.duration_frames > 0 {
            frame_index.clamp(0, self.cfg.duration_frames as i64 - 1)
        } else {
            frame_index.max(0)
        };
        if clamped == self.current_frame && self.frame.is_some() {
            return Ok(());
        }
        self.frame = Some(self.decode_at(clamped)?);
        self.current_frame = clamped;
        Ok(())
    }

    /// Returns the frame at the current position, decoding on first use.
    pub fn decode_current(&mut self) -> Result<VideoFrame, VideoError> {
        if self.frame.is_none() {
            self.seek_frame(self.current_frame.max(0))?;
        }
        self.frame.clone().ok_or(VideoError::NoFrame(self.current_frame))
    }

    fn decode_at(&self, frame_index: i64) -> Result<VideoFrame, VideoError> {
        let ffmpeg = resolve_ffmpeg_path(self.cfg.ffmpeg_path.as_deref())
            .unwrap_or_else(|| PathBuf::from("ffmpeg"));

        let ts = frame_index as f64 / self.cfg.fps as f64;
        let frame_len = (self.cfg.width as usize) * (self.cfg.height as usize) * 4;

        // -ss before -i: keyframe-accurate fast seek, then decode one frame.
        let mut child = Command::new(&ffmpeg)
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-ss")
            .arg(format!("{ts:.6}"))
            .arg("-i")
            .arg(&self.cfg.file)
            .arg("-frames:v")
            .arg("1")
            .arg("-vf")
            .arg(format!("scale={}:{}", self.cfg.width, self.cfg.height))
            .arg("-pix_fmt")
            .arg("rgba")
            .arg("-f")
            .arg("rawvideo")
            .arg("pipe:1")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let mut stdout = child.stdout.take().expect("ffmpeg stdout piped");
        let mut buf = vec![0u8; frame_len];
        let read = stdout.read_exact(&mut buf);
        let _ = child.wait();
        read.map_err(|_| VideoError::NoFrame(frame_index))?;

        Ok(VideoFrame {
            width: self.cfg.width,
            height: self.cfg.height,
            bytes: buf,
        })
    }
}

fn resolve_ffmpeg_path(explicit: Option<&str>) -> Option<PathBuf> {
    // Priority:
    // 1) explicit config path
    // 2) TEXGRAPH_FFMPEG env var
    // 3) bundled ffmpeg near the executable (vendor/ffmpeg/ffmpeg)
    if let Some(p) = explicit {
        return Some(PathBuf::from(p));
    }

    if let Some(p) = std::env::var_os("TEXGRAPH_FFMPEG") {
        return Some(PathBuf::from(p));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let candidate = exe_dir
                .join("..")
                .join("vendor")
                .join("ffmpeg")
                .join(ffmpeg_filename());
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}

fn ffmpeg_filename() -> &'static OsStr {
    #[cfg(windows)]
    {
        OsStr::new("ffmpeg.exe")
    }
    #[cfg(not(windows))]
    {
        OsStr::new("ffmpeg")
    }
}
