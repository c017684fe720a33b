use std::io;

use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;

use super::ProgressHandle;

/// Routes formatted tracing output through the progress loop so log lines
/// never tear the progress region.
#[derive(Clone)]
pub struct ProgressLogWriter {
    handle: ProgressHandle,
}

impl ProgressLogWriter {
    pub fn new(handle: ProgressHandle) -> Self {
        Self { handle }
    }
}

/// Buffers one formatted event and hands it to the progress loop on drop.
pub struct LogLineWriter {
    handle: ProgressHandle,
    level: Level,
    buf: Vec<u8>,
}

impl io::Write for LogLineWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LogLineWriter {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buf);
        let message = text.trim_end_matches(['\n', '\r']);
        if !message.is_empty() {
            self.handle.log(self.level, message);
        }
    }
}

impl<'a> MakeWriter<'a> for ProgressLogWriter {
    type Writer = LogLineWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogLineWriter {
            handle: self.handle.clone(),
            level: Level::INFO,
            buf: Vec::new(),
        }
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        LogLineWriter {
            handle: self.handle.clone(),
            level: *meta.level(),
            buf: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ProgressEvent, ProgressHandle};
    use std::io::Write;

    #[test]
    fn one_event_per_writer_with_trailing_newline_trimmed() {
        let (handle, mut rx) = ProgressHandle::channel_for_test();
        let make = ProgressLogWriter::new(handle);

        {
            let mut writer = make.make_writer();
            write!(writer, "resumed ").unwrap();
            writeln!(writer, "at 50 bytes").unwrap();
        }

        match rx.try_recv().unwrap() {
            ProgressEvent::Log { level, message } => {
                assert_eq!(level, Level::INFO);
                assert_eq!(message, "resumed at 50 bytes");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn empty_writes_send_nothing() {
        let (handle, mut rx) = ProgressHandle::channel_for_test();
        let make = ProgressLogWriter::new(handle);
        drop(make.make_writer());
        assert!(rx.try_recv().is_err());
    }
}
