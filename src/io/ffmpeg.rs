//! ffmpeg subprocess backends for capture and video output
//!
//! Capture runs `ffmpeg -f v4l2 ... -f rawvideo -pix_fmt rgb24 -` and reads
//! one frame at a time from stdout. The writer does the reverse: raw rgb24
//! frames go to stdin and ffmpeg encodes them to the output file.

use crate::domain::frame::Frame;
use crate::io::capture::{fourcc_to_string, CaptureDevice, CaptureProperty, CaptureProvider};
use crate::io::video_writer::{VideoWriter, VideoWriterProvider};
use anyhow::{anyhow, bail, Context};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, info, warn};

const DEFAULT_BINARY: &str = "ffmpeg";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

/// Input format name ffmpeg's v4l2 demuxer uses for a pixel format code
pub fn input_format(code: &str) -> Option<&'static str> {
    match code.to_ascii_uppercase().as_str() {
        "MJPG" => Some("mjpeg"),
        "YUYV" | "YUY2" => Some("yuyv422"),
        "H264" => Some("h264"),
        "NV12" => Some("nv12"),
        _ => None,
    }
}

/// Encoder for a codec code. Unknown codes are passed through as encoder names.
pub fn encoder_name(codec: &str) -> String {
    match codec.to_ascii_lowercase().as_str() {
        "avc1" | "h264" | "x264" => "libx264".to_string(),
        "mp4v" | "fmp4" => "mpeg4".to_string(),
        "mjpg" => "mjpeg".to_string(),
        "vp80" => "libvpx".to_string(),
        other => other.to_string(),
    }
}

/// Requested capture settings, filled in by `CaptureDevice::set`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureSettings {
    pub input_format: Option<&'static str>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
}

impl CaptureSettings {
    pub fn frame_size(&self) -> (u32, u32) {
        (self.width.unwrap_or(DEFAULT_WIDTH), self.height.unwrap_or(DEFAULT_HEIGHT))
    }

    /// ffmpeg arguments for reading `device`
    ///
    /// The output is always scaled to the requested size so every frame on
    /// stdout has the same length.
    pub fn args(&self, device: &str) -> Vec<String> {
        let (width, height) = self.frame_size();
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
        args.extend(["-f".into(), "v4l2".into()]);
        if let Some(format) = self.input_format {
            args.extend(["-input_format".into(), format.into()]);
        }
        if let Some(fps) = self.fps {
            args.extend(["-framerate".into(), fps.to_string()]);
        }
        args.extend(["-video_size".into(), format!("{width}x{height}")]);
        args.extend(["-i".into(), device.to_string()]);
        args.extend([
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-s".into(),
            format!("{width}x{height}"),
            "-".into(),
        ]);
        args
    }
}

/// Opens V4L2 devices through an ffmpeg subprocess
#[derive(Debug, Clone)]
pub struct FfmpegCaptureProvider {
    binary: String,
}

impl FfmpegCaptureProvider {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for FfmpegCaptureProvider {
    fn default() -> Self {
        Self::new(DEFAULT_BINARY)
    }
}

impl CaptureProvider for FfmpegCaptureProvider {
    fn open(&self, device: &str) -> anyhow::Result<Box<dyn CaptureDevice>> {
        if !Path::new(device).exists() {
            bail!("capture device {device} does not exist");
        }
        Ok(Box::new(FfmpegCapture {
            binary: self.binary.clone(),
            device: device.to_string(),
            settings: CaptureSettings::default(),
            stream: None,
            closed: false,
        }))
    }
}

struct CaptureStream {
    process: Child,
    stdout: BufReader<ChildStdout>,
    width: u32,
    height: u32,
    frame_size: usize,
}

/// Byte length of one rgb24 frame, or an error when it does not fit in memory
pub fn rgb24_len(width: u32, height: u32) -> anyhow::Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(3))
        .ok_or_else(|| anyhow!("frame size {width}x{height} overflows"))
}

/// A capture device. The subprocess starts in `start` (or at the first grab
/// or read), after all properties have been set.
pub struct FfmpegCapture {
    binary: String,
    device: String,
    settings: CaptureSettings,
    stream: Option<CaptureStream>,
    closed: bool,
}

impl FfmpegCapture {
    fn stream(&mut self) -> anyhow::Result<&mut CaptureStream> {
        if self.closed {
            bail!("capture device {} is closed", self.device);
        }
        if self.stream.is_none() {
            match self.spawn() {
                Ok(stream) => self.stream = Some(stream),
                Err(e) => {
                    // a device that cannot stream is as good as closed
                    self.closed = true;
                    return Err(e);
                }
            }
        }
        self.stream.as_mut().ok_or_else(|| anyhow!("capture stream unavailable"))
    }

    fn spawn(&self) -> anyhow::Result<CaptureStream> {
        let (width, height) = self.settings.frame_size();
        let frame_size = rgb24_len(width, height)?;
        let mut process = Command::new(&self.binary)
            .args(self.settings.args(&self.device))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start {} for {}", self.binary, self.device))?;
        let Some(stdout) = process.stdout.take() else {
            let _ = process.kill();
            let _ = process.wait();
            bail!("ffmpeg stdout unavailable");
        };
        info!(device = %self.device, width = %width, height = %height, "capture_stream_started");
        Ok(CaptureStream {
            process,
            stdout: BufReader::with_capacity(frame_size.saturating_mul(2), stdout),
            width,
            height,
            frame_size,
        })
    }

    fn next_frame(&mut self) -> anyhow::Result<Frame> {
        let stream = self.stream()?;
        let (width, height) = (stream.width, stream.height);
        let mut buffer = vec![0u8; stream.frame_size];
        let read = stream.stdout.read_exact(&mut buffer);
        match read {
            Ok(()) => Frame::from_rgb24(width, height, buffer).ok_or_else(|| anyhow!("frame size mismatch")),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!(device = %self.device, "capture_stream_ended");
                self.shutdown();
                bail!("capture stream ended")
            }
            Err(e) => Err(e.into()),
        }
    }

    fn shutdown(&mut self) {
        self.closed = true;
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.process.kill();
            let _ = stream.process.wait();
        }
    }
}

impl CaptureDevice for FfmpegCapture {
    fn set(&mut self, property: CaptureProperty) -> anyhow::Result<()> {
        if self.stream.is_some() {
            bail!("capture already streaming");
        }
        match property {
            CaptureProperty::FourCc(code) => {
                let name = fourcc_to_string(code);
                let format = input_format(&name).ok_or_else(|| anyhow!("unsupported pixel format {name}"))?;
                self.settings.input_format = Some(format);
            }
            CaptureProperty::Width(width) => self.settings.width = Some(width),
            CaptureProperty::Height(height) => self.settings.height = Some(height),
            CaptureProperty::Fps(fps) => self.settings.fps = Some(fps),
            // ffmpeg keeps its own queue
            CaptureProperty::BufferSize(_) => {}
        }
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        // the first frame proves ffmpeg opened the device; it is stale anyway
        if let Err(e) = self.next_frame() {
            self.shutdown();
            return Err(e.context(format!("capture device {} produced no frames", self.device)));
        }
        Ok(())
    }

    fn grab(&mut self, count: u32) -> anyhow::Result<()> {
        for _ in 0..count {
            self.next_frame()?;
        }
        Ok(())
    }

    fn read_into(&mut self, frame: &mut Frame) -> anyhow::Result<()> {
        *frame = self.next_frame()?;
        Ok(())
    }

    fn is_opened(&self) -> bool {
        !self.closed
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.shutdown();
        debug!(device = %self.device, "capture_closed");
        Ok(())
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// ffmpeg arguments for encoding raw rgb24 frames from stdin to `path`
pub fn writer_args(path: &Path, codec: &str, fps: f64, width: u32, height: u32) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into(), "-y".into()];
    args.extend([
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-s".into(),
        format!("{width}x{height}"),
        "-r".into(),
        fps.to_string(),
        "-i".into(),
        "-".into(),
    ]);
    args.extend(["-c:v".into(), encoder_name(codec), "-pix_fmt".into(), "yuv420p".into()]);
    args.push(path.to_string_lossy().into_owned());
    args
}

/// Encodes video files through an ffmpeg subprocess
#[derive(Debug, Clone)]
pub struct FfmpegVideoWriterProvider {
    binary: String,
}

impl FfmpegVideoWriterProvider {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for FfmpegVideoWriterProvider {
    fn default() -> Self {
        Self::new(DEFAULT_BINARY)
    }
}

impl VideoWriterProvider for FfmpegVideoWriterProvider {
    fn open(
        &self,
        path: &Path,
        codec: &str,
        fps: f64,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Box<dyn VideoWriter>> {
        if fps <= 0.0 || width == 0 || height == 0 {
            bail!("invalid video geometry {width}x{height}@{fps}");
        }
        let mut process = Command::new(&self.binary)
            .args(writer_args(path, codec, fps, width, height))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start {} for {}", self.binary, path.display()))?;
        let stdin = process.stdin.take().ok_or_else(|| anyhow!("ffmpeg stdin unavailable"))?;

        info!(path = %path.display(), codec = %codec, width = %width, height = %height, "video_writer_opened");
        Ok(Box::new(FfmpegVideoWriter { process, stdin: Some(stdin), width, height }))
    }
}

pub struct FfmpegVideoWriter {
    process: Child,
    stdin: Option<ChildStdin>,
    width: u32,
    height: u32,
}

impl VideoWriter for FfmpegVideoWriter {
    fn append(&mut self, frame: &Frame) -> anyhow::Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            bail!(
                "frame is {}x{}, stream is {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
        }
        let stdin = self.stdin.as_mut().ok_or_else(|| anyhow!("video writer is closed"))?;
        stdin.write_all(frame.as_bytes())?;
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        // Dropping stdin signals end of stream
        let Some(stdin) = self.stdin.take() else {
            return Ok(());
        };
        drop(stdin);
        let status = self.process.wait()?;
        if !status.success() {
            bail!("ffmpeg exited with {status}");
        }
        Ok(())
    }
}

impl Drop for FfmpegVideoWriter {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            let _ = self.process.kill();
            let _ = self.process.wait();
        }
    }
}
