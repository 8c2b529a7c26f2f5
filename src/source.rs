//! Video sources.
//!
//! A [`VideoSource`] stands in for the playing video element: it exposes the
//! native decoded dimensions, the current playback state, and a way to
//! capture the currently displayed frame. Two implementations ship here:
//!
//! - `SyntheticSource` (`stub://` paths): deterministic generated frames for
//!   tests and demo runs, no decode dependencies.
//! - `FrameDirSource`: plays back a directory of pre-extracted JPEG stills
//!   in filename order, with play/pause/ended semantics.
//!
//! Sources never buffer frames beyond the one being captured; the sampler's
//! backpressure policy is drop-newest, never queue.

use anyhow::{anyhow, Context, Result};
use log::info;
use std::path::{Path, PathBuf};

/// Playback state of the video element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    /// Metadata not decoded yet; dimensions unknown.
    Loading,
    Playing,
    Paused,
    Ended,
}

/// One captured still frame, native resolution, RGB8.
#[derive(Clone, Debug)]
pub struct Frame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub trait VideoSource: Send {
    /// Native decoded dimensions, `None` until the source has loaded.
    fn native_size(&self) -> Option<(u32, u32)>;

    fn state(&self) -> PlaybackState;

    /// Capture the frame currently on screen. Errors represent transient
    /// decode states; the caller drops the tick and moves on.
    fn capture(&mut self) -> Result<Frame>;

    fn play(&mut self);

    fn pause(&mut self);
}

/// Open a source by path: `stub://WIDTHxHEIGHT` (or bare `stub://`) for the
/// synthetic source, anything else as a frame directory.
pub fn open_source(path: &str) -> Result<Box<dyn VideoSource>> {
    if let Some(spec) = path.strip_prefix("stub://") {
        return Ok(Box::new(SyntheticSource::from_spec(spec)?));
    }
    Ok(Box::new(FrameDirSource::open(Path::new(path))?))
}

// -------------------- Synthetic source --------------------

/// Deterministic generated frames: a gradient that shifts every capture, so
/// consecutive frames differ.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    frame_count: u64,
    state: PlaybackState,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_count: 0,
            state: PlaybackState::Playing,
        }
    }

    fn from_spec(spec: &str) -> Result<Self> {
        if spec.is_empty() {
            return Ok(Self::new(640, 480));
        }
        let (w, h) = spec
            .split_once('x')
            .ok_or_else(|| anyhow!("stub spec must be WIDTHxHEIGHT, got '{}'", spec))?;
        Ok(Self::new(w.parse()?, h.parse()?))
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

impl VideoSource for SyntheticSource {
    fn native_size(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }

    fn state(&self) -> PlaybackState {
        self.state
    }

    fn capture(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let shift = (self.frame_count % 256) as u8;
        let mut rgb = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                rgb.push((x % 256) as u8 ^ shift);
                rgb.push((y % 256) as u8);
                rgb.push(shift);
            }
        }
        Ok(Frame {
            rgb,
            width: self.width,
            height: self.height,
        })
    }

    fn play(&mut self) {
        self.state = PlaybackState::Playing;
    }

    fn pause(&mut self) {
        self.state = PlaybackState::Paused;
    }
}

// -------------------- Frame directory source --------------------

/// Plays back pre-extracted JPEG stills from a directory in filename order.
/// The source reaches `Ended` after the last still has been captured.
pub struct FrameDirSource {
    frames: Vec<PathBuf>,
    cursor: usize,
    native: Option<(u32, u32)>,
    state: PlaybackState,
}

impl FrameDirSource {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("jpg") | Some("jpeg")
                )
            })
            .collect();
        frames.sort();

        if frames.is_empty() {
            return Err(anyhow!("no JPEG frames found in {}", dir.display()));
        }

        // Decode the first still up front so the native size is known
        // before playback starts; the sampler will not tick a source
        // without dimensions.
        let first = Self::decode(&frames[0])?;

        info!(
            "FrameDirSource: {} frames from {}",
            frames.len(),
            dir.display()
        );
        Ok(Self {
            frames,
            cursor: 0,
            native: Some((first.width, first.height)),
            state: PlaybackState::Loading,
        })
    }

    fn decode(path: &Path) -> Result<Frame> {
        let img = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgb8();
        Ok(Frame {
            width: img.width(),
            height: img.height(),
            rgb: img.into_raw(),
        })
    }
}

impl VideoSource for FrameDirSource {
    fn native_size(&self) -> Option<(u32, u32)> {
        self.native
    }

    fn state(&self) -> PlaybackState {
        self.state
    }

    fn capture(&mut self) -> Result<Frame> {
        if self.cursor >= self.frames.len() {
            self.state = PlaybackState::Ended;
            return Err(anyhow!("frame source ended"));
        }
        let frame = Self::decode(&self.frames[self.cursor])?;
        self.cursor += 1;
        self.native = Some((frame.width, frame.height));
        if self.cursor >= self.frames.len() {
            self.state = PlaybackState::Ended;
        }
        Ok(frame)
    }

    fn play(&mut self) {
        if matches!(self.state, PlaybackState::Loading | PlaybackState::Paused) {
            self.state = PlaybackState::Playing;
        }
    }

    fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_produces_native_sized_frames() {
        let mut source = SyntheticSource::new(32, 24);
        assert_eq!(source.native_size(), Some((32, 24)));
        assert_eq!(source.state(), PlaybackState::Playing);

        let frame = source.capture().unwrap();
        assert_eq!(frame.width, 32);
        assert_eq!(frame.height, 24);
        assert_eq!(frame.rgb.len(), 32 * 24 * 3);
    }

    #[test]
    fn consecutive_synthetic_frames_differ() {
        let mut source = SyntheticSource::new(16, 16);
        let a = source.capture().unwrap();
        let b = source.capture().unwrap();
        assert_ne!(a.rgb, b.rgb);
    }

    #[test]
    fn pause_and_play_toggle_state() {
        let mut source = SyntheticSource::new(8, 8);
        source.pause();
        assert_eq!(source.state(), PlaybackState::Paused);
        source.play();
        assert_eq!(source.state(), PlaybackState::Playing);
    }

    #[test]
    fn stub_spec_parses_dimensions() {
        let source = SyntheticSource::from_spec("320x200").unwrap();
        assert_eq!(source.native_size(), Some((320, 200)));
        assert!(SyntheticSource::from_spec("320by200").is_err());
    }

    #[test]
    fn empty_frame_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FrameDirSource::open(dir.path()).is_err());
    }

    #[test]
    fn frame_dir_knows_its_size_before_playback() {
        let dir = tempfile::tempdir().unwrap();
        let img = image::RgbImage::from_pixel(20, 10, image::Rgb([128, 64, 32]));
        img.save(dir.path().join("a.jpg")).unwrap();

        let source = FrameDirSource::open(dir.path()).unwrap();
        assert_eq!(source.state(), PlaybackState::Loading);
        assert_eq!(source.native_size(), Some((20, 10)));
    }

    #[test]
    fn play_starts_a_freshly_opened_frame_dir() {
        let dir = tempfile::tempdir().unwrap();
        let img = image::RgbImage::from_pixel(20, 10, image::Rgb([128, 64, 32]));
        img.save(dir.path().join("a.jpg")).unwrap();

        let mut source = FrameDirSource::open(dir.path()).unwrap();
        source.play();
        assert_eq!(source.state(), PlaybackState::Playing);
    }

    #[test]
    fn frame_dir_plays_through_to_ended() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.jpg", "b.jpg"] {
            let img = image::RgbImage::from_pixel(20, 10, image::Rgb([128, 64, 32]));
            img.save(dir.path().join(name)).unwrap();
        }

        let mut source = FrameDirSource::open(dir.path()).unwrap();
        source.play();

        let frame = source.capture().unwrap();
        assert_eq!((frame.width, frame.height), (20, 10));

        source.capture().unwrap();
        assert_eq!(source.state(), PlaybackState::Ended);
        assert!(source.capture().is_err());
    }
}
