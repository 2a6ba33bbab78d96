//! Local JSON-lines replay source.
//!
//! Each non-blank line is one frame:
//! `{"frame": 12, "width": 1280, "height": 720, "detections": [...]}`.
//! Only local paths are accepted.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::detect::Detection;
use crate::identity::FrameImage;

/// One recorded frame of detector output.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ReplayFrame {
    pub frame: u64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

impl ReplayFrame {
    pub fn image(&self) -> FrameImage<'static> {
        FrameImage::blank(self.width, self.height)
    }
}

#[derive(Clone, Debug)]
pub struct ReplayStats {
    pub frames_read: u64,
    pub lines_read: u64,
    pub path: String,
}

pub struct ReplaySource {
    name: String,
    reader: Box<dyn BufRead + Send>,
    line_no: u64,
    frames_read: u64,
    finished: bool,
}

impl ReplaySource {
    pub fn open(path: &str) -> Result<Self> {
        if !is_local_file_path(path) {
            return Err(anyhow!(
                "replay ingestion only supports local paths (no URL schemes)"
            ));
        }
        let file = File::open(path).map_err(|e| anyhow!("failed to open replay {}: {}", path, e))?;
        log::info!("ReplaySource: opened {}", path);
        Ok(Self::from_reader(path, BufReader::new(file)))
    }

    pub fn from_reader(name: &str, reader: impl BufRead + Send + 'static) -> Self {
        Self {
            name: name.to_string(),
            reader: Box::new(reader),
            line_no: 0,
            frames_read: 0,
            finished: false,
        }
    }

    /// Next frame, or `None` at end of input. Blank lines are skipped.
    pub fn next_frame(&mut self) -> Result<Option<ReplayFrame>> {
        if self.finished {
            return Ok(None);
        }
        let mut line = String::new();
        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .map_err(|e| anyhow!("{}: read failed after line {}: {}", self.name, self.line_no, e))?;
            if n == 0 {
                self.finished = true;
                return Ok(None);
            }
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let frame: ReplayFrame = serde_json::from_str(line.trim())
                .map_err(|e| anyhow!("{}: line {}: {}", self.name, self.line_no, e))?;
            self.frames_read += 1;
            return Ok(Some(frame));
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn stats(&self) -> ReplayStats {
        ReplayStats {
            frames_read: self.frames_read,
            lines_read: self.line_no,
            path: self.name.clone(),
        }
    }
}

impl Iterator for ReplaySource {
    type Item = Result<ReplayFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    !path.trim().is_empty() && !path.contains("://")
}
