use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::LevelFilter;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

enum LogMessage {
    Record(Vec<u8>),
    Shutdown,
}

/// `env_logger` pipe target that forwards each formatted record to the
/// sink thread.
struct ChannelWriter {
    tx: Sender<LogMessage>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(LogMessage::Record(buf.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "log sink stopped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Single consumer that serializes log records from every thread into the
/// log file and, unless silenced, stderr.
pub struct LogSink {
    tx: Sender<LogMessage>,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    path: PathBuf,
}

impl LogSink {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes queued records and stops the sink thread, waiting at most
    /// 60 seconds.
    pub fn shutdown(mut self) {
        let _ = self.tx.send(LogMessage::Shutdown);
        match self.done.recv_timeout(SHUTDOWN_TIMEOUT) {
            Ok(()) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
            }
            Err(_) => eprintln!("Log sink did not stop within {SHUTDOWN_TIMEOUT:?}"),
        }
    }

    fn writer(&self) -> ChannelWriter {
        ChannelWriter {
            tx: self.tx.clone(),
        }
    }
}

/// Installs the global logger, writing `<log_dir>/snva_<host>.log`.
pub fn init(
    level: LevelFilter,
    log_dir: &Path,
    silent: bool,
) -> Result<LogSink, Box<dyn std::error::Error>> {
    if log_dir.is_file() {
        return Err(format!(
            "Log path {} is expected to be a directory, not a file",
            log_dir.display()
        )
        .into());
    }
    fs::create_dir_all(log_dir)?;

    let path = log_file_path(log_dir, &host_name());
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let sink = spawn_sink(file, path, !silent)?;

    env_logger::Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            let timestamp = buf.timestamp_millis();
            let thread = std::thread::current();
            writeln!(
                buf,
                "{}:{}:{}:{}:{}",
                timestamp,
                thread.name().unwrap_or("unnamed"),
                record.level(),
                record.module_path().unwrap_or("-"),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(sink.writer())))
        .try_init()?;

    Ok(sink)
}

pub fn parse_level(level: &str) -> Result<LevelFilter, String> {
    match level {
        "error" => Ok(LevelFilter::Error),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        other => Err(format!(
            "Log level must be one of: error, info, debug, got '{other}'"
        )),
    }
}

fn log_file_path(log_dir: &Path, host: &str) -> PathBuf {
    log_dir.join(format!("snva_{host}.log"))
}

fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

fn spawn_sink(file: File, path: PathBuf, echo: bool) -> io::Result<LogSink> {
    let (tx, rx) = crossbeam_channel::unbounded::<LogMessage>();
    let (done_tx, done) = crossbeam_channel::bounded::<()>(1);

    let handle = std::thread::Builder::new()
        .name("log-sink".into())
        .spawn(move || {
            let mut file = io::BufWriter::new(file);
            for message in rx {
                match message {
                    LogMessage::Record(bytes) => {
                        let _ = file.write_all(&bytes);
                        if echo {
                            let _ = io::stderr().write_all(&bytes);
                        }
                    }
                    LogMessage::Shutdown => break,
                }
            }
            let _ = file.flush();
            let _ = done_tx.send(());
        })?;

    Ok(LogSink {
        tx,
        done,
        handle: Some(handle),
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_named_after_host() {
        assert_eq!(
            log_file_path(Path::new("/var/log/snva"), "node7"),
            PathBuf::from("/var/log/snva/snva_node7.log")
        );
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Ok(LevelFilter::Debug));
        assert_eq!(parse_level("error"), Ok(LevelFilter::Error));
        assert!(parse_level("verbose").is_err());
    }

    #[test]
    fn test_sink_writes_records_from_many_threads_before_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snva_test.log");
        let file = File::create(&path).unwrap();
        let sink = spawn_sink(file, path.clone(), false).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let mut writer = sink.writer();
                std::thread::spawn(move || {
                    writer
                        .write_all(format!("record {i}\n").as_bytes())
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        sink.shutdown();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 4);
        for i in 0..4 {
            assert!(contents.contains(&format!("record {i}")));
        }
    }

    #[test]
    fn test_log_path_that_is_a_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("logs");
        fs::write(&file, b"").unwrap();
        assert!(init(LevelFilter::Info, &file, true).is_err());
    }
}
