//! Render state owned by the progress actor. Nothing here is shared; the
//! consumer loop is the only caller.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use crossterm::cursor::MoveUp;
use crossterm::queue;
use crossterm::terminal::{Clear, ClearType};
use indicatif::HumanBytes;
use tracing::Level;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::events::{ProgressEvent, TaskId};

#[derive(Debug)]
struct ProgressTask {
    id: TaskId,
    label: String,
    total: Option<u64>,
    current: u64,
    start_position: u64,
    /// Bytes per second over the task's lifetime
    rate: Option<f64>,
    last_plain: Option<Instant>,
    /// A plain-mode line at 100% is already out
    completion_printed: bool,
}

impl ProgressTask {
    fn complete(&self) -> bool {
        self.total.is_some_and(|t| t > 0 && self.current >= t)
    }

    fn line(&self, width: usize) -> String {
        let rate = self
            .rate
            .map(|r| format!("  {}/s", HumanBytes(r as u64)))
            .unwrap_or_default();
        let line = match self.total {
            Some(total) if total > 0 => {
                let percent = (self.current.min(total) as f64 / total as f64 * 100.0) as u64;
                format!(
                    "{}  {percent:>3}%  {}/{}{rate}",
                    self.label,
                    HumanBytes(self.current),
                    HumanBytes(total)
                )
            }
            _ => format!("{}  {}{rate}", self.label, HumanBytes(self.current)),
        };
        truncate(line, width)
    }

    fn finished_line(&self, width: usize) -> String {
        let total = self.total.unwrap_or(self.current).max(self.current);
        truncate(
            format!("{}  100%  {}", self.label, HumanBytes(total)),
            width,
        )
    }

    fn abandoned_line(&self, width: usize) -> String {
        truncate(
            format!("{}  stopped at {}", self.label, HumanBytes(self.current)),
            width,
        )
    }
}

/// Cut `line` to at most `width` terminal columns.
fn truncate(line: String, width: usize) -> String {
    if width == 0 || line.width() <= width {
        return line;
    }
    let mut used = 0;
    let mut out = String::with_capacity(line.len());
    for ch in line.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > width {
            break;
        }
        used += w;
        out.push(ch);
    }
    out
}

pub(crate) fn format_log(level: Level, message: &str) -> String {
    format!("{level:>5} {message}")
}

pub(crate) struct Renderer<W: Write> {
    sink: W,
    interactive: bool,
    width: usize,
    plain_interval: Duration,
    /// Insertion order, never re-sorted
    tasks: Vec<ProgressTask>,
    /// Lines of the progress region currently on screen (interactive only)
    region_lines: usize,
}

impl<W: Write> Renderer<W> {
    pub(crate) fn new(sink: W, interactive: bool, width: u16, plain_interval: Duration) -> Self {
        Self {
            sink,
            interactive,
            width: width as usize,
            plain_interval,
            tasks: Vec::new(),
            region_lines: 0,
        }
    }

    pub(crate) fn apply(&mut self, event: ProgressEvent) -> io::Result<()> {
        match event {
            ProgressEvent::AddTask {
                id,
                label,
                total,
                position,
            } => {
                self.tasks.push(ProgressTask {
                    id,
                    label,
                    total,
                    current: position,
                    start_position: position,
                    rate: None,
                    last_plain: None,
                    completion_printed: false,
                });
                if self.interactive {
                    self.redraw()?;
                }
            }
            ProgressEvent::UpdateTask {
                id,
                current,
                total,
                elapsed,
            } => {
                let Some(index) = self.position(id) else {
                    return Ok(());
                };
                let task = &mut self.tasks[index];
                task.current = current;
                if total.is_some() {
                    task.total = total;
                }
                let secs = elapsed.as_secs_f64();
                if secs > 0.0 {
                    task.rate = Some(current.saturating_sub(task.start_position) as f64 / secs);
                }

                if self.interactive {
                    self.redraw()?;
                } else {
                    let now = Instant::now();
                    let due = task
                        .last_plain
                        .is_none_or(|last| now.duration_since(last) >= self.plain_interval);
                    if due {
                        task.last_plain = Some(now);
                        task.completion_printed = task.complete();
                        let line = task.line(self.width);
                        writeln!(self.sink, "{line}")?;
                    }
                }
            }
            ProgressEvent::FinishTask { id, success } => {
                let Some(index) = self.position(id) else {
                    return Ok(());
                };
                // Finished tasks leave the live region for good.
                self.clear_region()?;
                let task = self.tasks.remove(index);
                if !success {
                    writeln!(self.sink, "{}", task.abandoned_line(self.width))?;
                } else if self.interactive || !task.completion_printed {
                    writeln!(self.sink, "{}", task.finished_line(self.width))?;
                }
                if self.interactive {
                    self.draw_region()?;
                }
            }
            ProgressEvent::Resize { width } => {
                self.width = width as usize;
            }
            ProgressEvent::Log { level, message } => {
                self.clear_region()?;
                writeln!(self.sink, "{}", format_log(level, &message))?;
                if self.interactive {
                    self.draw_region()?;
                }
            }
            ProgressEvent::Stop => {}
        }
        self.sink.flush()
    }

    pub(crate) fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }

    fn position(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    fn redraw(&mut self) -> io::Result<()> {
        self.clear_region()?;
        self.draw_region()
    }

    fn clear_region(&mut self) -> io::Result<()> {
        for _ in 0..self.region_lines {
            queue!(self.sink, MoveUp(1), Clear(ClearType::CurrentLine))?;
        }
        self.region_lines = 0;
        Ok(())
    }

    fn draw_region(&mut self) -> io::Result<()> {
        for task in &self.tasks {
            writeln!(self.sink, "{}", task.line(self.width))?;
        }
        self.region_lines = self.tasks.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(label: &str, total: Option<u64>, current: u64) -> ProgressTask {
        ProgressTask {
            id: 0,
            label: label.to_owned(),
            total,
            current,
            start_position: 0,
            rate: None,
            last_plain: None,
            completion_printed: false,
        }
    }

    #[test]
    fn line_with_total_shows_percent() {
        let line = task("video.mp4", Some(200), 50).line(200);
        assert!(line.starts_with("video.mp4"));
        assert!(line.contains(" 25%"));
    }

    #[test]
    fn line_without_total_shows_bytes() {
        let line = task("stream", None, 2048).line(200);
        assert_eq!(line, "stream  2.00 KiB");
    }

    #[test]
    fn lines_are_truncated_to_width() {
        let line = task("a-very-long-label-for-a-file.mp4", Some(10), 1).line(10);
        assert_eq!(line.chars().count(), 10);
    }

    #[test]
    fn finished_line_reports_full_size() {
        let line = task("clip", Some(100), 40).finished_line(80);
        assert_eq!(line, "clip  100%  100 B");
    }

    #[test]
    fn abandoned_line_reports_position() {
        let line = task("clip", Some(100), 40).abandoned_line(80);
        assert_eq!(line, "clip  stopped at 40 B");
    }

    #[test]
    fn wide_labels_are_cut_by_columns() {
        let line = truncate("動画ファイル.mp4".to_owned(), 7);
        assert_eq!(line, "動画フ");
        assert_eq!(line.width(), 6);
    }

    fn plain_renderer() -> Renderer<Vec<u8>> {
        Renderer::new(Vec::new(), false, 120, Duration::ZERO)
    }

    fn output(renderer: &Renderer<Vec<u8>>) -> Vec<String> {
        String::from_utf8(renderer.sink.clone())
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn plain_completion_is_printed_once() {
        let mut renderer = plain_renderer();
        renderer
            .apply(ProgressEvent::AddTask {
                id: 7,
                label: "done.mp4".to_owned(),
                total: Some(10),
                position: 0,
            })
            .unwrap();
        renderer
            .apply(ProgressEvent::UpdateTask {
                id: 7,
                current: 10,
                total: Some(10),
                elapsed: Duration::from_secs(1),
            })
            .unwrap();
        renderer
            .apply(ProgressEvent::FinishTask { id: 7, success: true })
            .unwrap();

        let lines = output(&renderer);
        assert_eq!(lines.len(), 1, "{lines:?}");
        assert!(lines[0].contains("100%"));
    }

    #[test]
    fn plain_finish_prints_completion_when_last_line_was_partial() {
        let mut renderer = plain_renderer();
        renderer
            .apply(ProgressEvent::AddTask {
                id: 1,
                label: "part.mp4".to_owned(),
                total: Some(10),
                position: 0,
            })
            .unwrap();
        renderer
            .apply(ProgressEvent::UpdateTask {
                id: 1,
                current: 4,
                total: Some(10),
                elapsed: Duration::from_secs(1),
            })
            .unwrap();
        renderer
            .apply(ProgressEvent::FinishTask { id: 1, success: true })
            .unwrap();

        let lines = output(&renderer);
        assert_eq!(lines.len(), 2, "{lines:?}");
        assert_eq!(lines[1], "part.mp4  100%  10 B");
    }
}
