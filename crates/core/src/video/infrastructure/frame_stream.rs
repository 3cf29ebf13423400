use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use thiserror::Error;

use crate::shared::cancellation::CancellationToken;
use crate::shared::frame::FrameRecord;
use crate::shared::geometry::TimestampWindow;
use crate::shared::video_dimensions::FrameShape;

use super::ffmpeg_decoder::command_as_string;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("failed to start decoder for {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("decoder for {0} has no stdout pipe")]
    MissingStdout(PathBuf),
    #[error("failed to read frame {frames_read} of {path}: {source}")]
    FrameRead {
        path: PathBuf,
        frames_read: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} produced frame {index} but only {capacity} were probed")]
    TimestampOverflow {
        path: PathBuf,
        index: usize,
        capacity: usize,
    },
}

/// Why a stream stopped yielding frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    EndOfStream,
    Cancelled,
    Failed,
}

/// Pre-sized store for the timestamp overlay crop of every frame.
///
/// Capacity is the probed frame count, fixed before streaming starts.
/// Crop `i` occupies bytes `[i * crop_len, (i + 1) * crop_len)`.
#[derive(Debug)]
pub struct TimestampBuffer {
    data: Vec<u8>,
    window: TimestampWindow,
    channels: u8,
    capacity: usize,
    filled: usize,
}

impl TimestampBuffer {
    pub fn new(window: TimestampWindow, channels: u8, capacity: usize) -> Self {
        let crop_len = window.width as usize * window.height as usize * channels as usize;
        Self {
            data: vec![0u8; crop_len * capacity],
            window,
            channels,
            capacity,
            filled: 0,
        }
    }

    pub fn window(&self) -> TimestampWindow {
        self.window
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn crop_len(&self) -> usize {
        self.window.width as usize * self.window.height as usize * self.channels as usize
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of crops recorded so far.
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn crop(&self, index: usize) -> Option<&[u8]> {
        if index >= self.filled {
            return None;
        }
        let len = self.crop_len();
        Some(&self.data[index * len..(index + 1) * len])
    }

    pub(crate) fn record(&mut self, frame: &FrameRecord, path: &Path) -> Result<(), StreamError> {
        let index = frame.index();
        if index >= self.capacity {
            return Err(StreamError::TimestampOverflow {
                path: path.to_path_buf(),
                index,
                capacity: self.capacity,
            });
        }
        let len = self.crop_len();
        let w = self.window;
        frame.copy_window(
            w.x,
            w.y,
            w.width,
            w.height,
            &mut self.data[index * len..(index + 1) * len],
        );
        self.filled = self.filled.max(index + 1);
        Ok(())
    }
}

/// Size of the decoder pipe read buffer: room for one batch of frames,
/// each rounded up to a power of two.
pub fn read_buffer_len(batch_size: usize, frame_len: usize) -> usize {
    frame_len
        .next_power_of_two()
        .max(2)
        .saturating_mul(batch_size.max(1))
}

/// Lazily decoded frames of one video, read from a decoder subprocess.
///
/// Each item is one fixed-size frame read from the decoder's stdout. The
/// sequence is finite and not restartable. A short or empty read ends it,
/// as does the cancellation token, which is checked before every frame is
/// yielded. On every exit path the pipe is closed and the subprocess is
/// killed and reaped.
pub struct FrameStream {
    video_path: PathBuf,
    child: Option<Child>,
    reader: Option<BufReader<ChildStdout>>,
    shape: FrameShape,
    frames_read: usize,
    cancel: CancellationToken,
    timestamps: Option<TimestampBuffer>,
    end: Option<StreamEnd>,
}

impl FrameStream {
    /// Starts the decoder and prepares to stream `shape`-sized frames.
    pub fn spawn(
        mut command: Command,
        video_path: &Path,
        shape: FrameShape,
        read_buffer_len: usize,
        cancel: CancellationToken,
        timestamps: Option<TimestampBuffer>,
    ) -> Result<Self, StreamError> {
        log::debug!("starting decoder: {}", command_as_string(&command));

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        // Keep terminal interrupts away from the decoder; the stream stops it.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| StreamError::Spawn {
            path: video_path.to_path_buf(),
            source,
        })?;

        let Some(stdout) = child.stdout.take() else {
            reap(&mut child, video_path);
            return Err(StreamError::MissingStdout(video_path.to_path_buf()));
        };

        log::debug!("opening frame pipe for {}", video_path.display());

        Ok(Self {
            video_path: video_path.to_path_buf(),
            child: Some(child),
            reader: Some(BufReader::with_capacity(
                read_buffer_len.max(shape.byte_len()),
                stdout,
            )),
            shape,
            frames_read: 0,
            cancel,
            timestamps,
            end: None,
        })
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn frames_read(&self) -> usize {
        self.frames_read
    }

    /// `None` while the stream can still yield frames.
    pub fn end(&self) -> Option<StreamEnd> {
        self.end
    }

    pub fn was_cancelled(&self) -> bool {
        self.end == Some(StreamEnd::Cancelled)
    }

    /// Process id of the decoder while it is running.
    pub fn decoder_pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn take_timestamps(&mut self) -> Option<TimestampBuffer> {
        self.timestamps.take()
    }

    fn close(&mut self, end: StreamEnd) {
        if self.end.is_none() {
            self.end = Some(end);
        }
        // Closing the pipe first lets the decoder fail its next write.
        self.reader = None;
        if let Some(mut child) = self.child.take() {
            reap(&mut child, &self.video_path);
        }
    }
}

impl Iterator for FrameStream {
    type Item = Result<FrameRecord, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.end.is_some() {
            return None;
        }
        let reader = self.reader.as_mut()?;

        let frame_len = self.shape.byte_len();
        let mut data = vec![0u8; frame_len];

        match read_full(reader, &mut data) {
            Err(source) => {
                log::error!(
                    "read failed after {} frames of {}: {source}",
                    self.frames_read,
                    self.video_path.display()
                );
                log::debug!("closing frame pipe following read error");
                self.close(StreamEnd::Failed);
                return Some(Err(StreamError::FrameRead {
                    path: self.video_path.clone(),
                    frames_read: self.frames_read,
                    source,
                }));
            }
            Ok(0) => {
                log::debug!("closing frame pipe following end of stream");
                self.close(StreamEnd::EndOfStream);
                return None;
            }
            Ok(n) if n < frame_len => {
                log::warn!(
                    "discarding {n} trailing bytes of {} after {} frames",
                    self.video_path.display(),
                    self.frames_read
                );
                self.close(StreamEnd::EndOfStream);
                return None;
            }
            Ok(_) => {}
        }

        if self.cancel.is_cancelled() {
            log::warn!(
                "closing frame pipe of {} following interrupt after {} frames",
                self.video_path.display(),
                self.frames_read
            );
            self.close(StreamEnd::Cancelled);
            return None;
        }

        let frame = FrameRecord::new(
            data,
            self.shape.width,
            self.shape.height,
            self.shape.channels,
            self.frames_read,
        );

        if let Some(timestamps) = self.timestamps.as_mut() {
            if let Err(e) = timestamps.record(&frame, &self.video_path) {
                log::error!("{e}");
                self.close(StreamEnd::Failed);
                return Some(Err(e));
            }
        }

        self.frames_read += 1;
        Some(Ok(frame))
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.close(StreamEnd::Failed);
        }
    }
}

/// Reads until `buf` is full or the pipe reports end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn reap(child: &mut Child, video_path: &Path) {
    if let Err(e) = child.kill() {
        log::debug!("decoder for {} already exited: {e}", video_path.display());
    }
    match child.wait() {
        Ok(status) => log::debug!("decoder for {} exited: {status}", video_path.display()),
        Err(e) => log::warn!("failed to reap decoder for {}: {e}", video_path.display()),
    }
}
