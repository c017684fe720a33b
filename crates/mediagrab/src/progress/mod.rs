//! # Progress
//!
//! A single consumer task owns every piece of display state: the task list,
//! the terminal width and the on-screen progress region. Producers (one per
//! concurrent download) hold a cloneable [`ProgressHandle`] and only ever send
//! [`ProgressEvent`]s, so no locking is needed and a log line can never land
//! in the middle of a redraw.
//!
//! In interactive (TTY) mode the region is erased and rewritten in place. In
//! plain mode each task emits throttled newline-terminated summaries, and
//! finishing a task always prints a final 100% line.

mod events;
mod render;
mod writer;

pub use events::{ProgressEvent, TaskId};
pub use writer::{LogLineWriter, ProgressLogWriter};

use std::io::{IsTerminal, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use render::Renderer;

const DEFAULT_WIDTH: u16 = 100;

#[derive(Debug, Clone, Copy)]
pub struct ProgressConfig {
    /// Minimum spacing of plain-mode summaries per task
    pub plain_interval: Duration,
    /// Minimum spacing of updates sent by a single task handle
    pub update_interval: Duration,
    /// Wrap width; probed from the terminal when unset
    pub width: Option<u16>,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            plain_interval: Duration::from_secs(2),
            update_interval: Duration::from_millis(100),
            width: None,
        }
    }
}

/// Where progress and log lines go.
pub struct ProgressSink {
    writer: Box<dyn Write + Send>,
    interactive: bool,
}

impl ProgressSink {
    pub fn new(writer: impl Write + Send + 'static, interactive: bool) -> Self {
        Self {
            writer: Box::new(writer),
            interactive,
        }
    }

    /// The process error stream, interactive when it is a terminal.
    pub fn stderr() -> Self {
        let interactive = std::io::stderr().is_terminal();
        Self::new(std::io::stderr(), interactive)
    }
}

/// Owner of the consumer loop.
pub struct ProgressManager {
    handle: ProgressHandle,
    join: Option<JoinHandle<()>>,
}

impl ProgressManager {
    /// Spawn the consumer loop. Cancelling `token` stops it promptly.
    pub fn start(sink: ProgressSink, config: ProgressConfig, token: CancellationToken) -> Self {
        let width = config.width.unwrap_or_else(|| {
            if sink.interactive {
                crossterm::terminal::size()
                    .map(|(w, _)| w)
                    .unwrap_or(DEFAULT_WIDTH)
            } else {
                DEFAULT_WIDTH
            }
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let renderer = Renderer::new(sink.writer, sink.interactive, width, config.plain_interval);
        let join = tokio::spawn(run(rx, renderer, token));

        Self {
            handle: ProgressHandle {
                tx,
                next_id: Arc::new(AtomicU64::new(0)),
                update_interval: config.update_interval,
            },
            join: Some(join),
        }
    }

    pub fn handle(&self) -> ProgressHandle {
        self.handle.clone()
    }

    /// Enqueue `Stop` and wait for every earlier event to be rendered.
    pub async fn stop(mut self) {
        self.handle.send(ProgressEvent::Stop);
        if let Some(join) = self.join.take()
            && let Err(e) = join.await
        {
            tracing::debug!(error = %e, "Progress loop ended abnormally");
        }
    }
}

async fn run<W: Write>(
    mut rx: mpsc::UnboundedReceiver<ProgressEvent>,
    mut renderer: Renderer<W>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            event = rx.recv() => event,
            _ = token.cancelled() => None,
        };
        match event {
            None | Some(ProgressEvent::Stop) => break,
            // A broken sink must not take the downloads down with it.
            Some(event) => {
                let _ = renderer.apply(event);
            }
        }
    }
    let _ = renderer.flush();
}

/// Producer side of the actor. Cheap to clone.
#[derive(Clone)]
pub struct ProgressHandle {
    tx: mpsc::UnboundedSender<ProgressEvent>,
    next_id: Arc<AtomicU64>,
    update_interval: Duration,
}

impl ProgressHandle {
    /// A handle whose events go nowhere.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(0)),
            update_interval: Duration::ZERO,
        }
    }

    #[cfg(test)]
    pub(crate) fn channel_for_test() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            tx,
            next_id: Arc::new(AtomicU64::new(0)),
            update_interval: Duration::ZERO,
        };
        (handle, rx)
    }

    fn send(&self, event: ProgressEvent) {
        // The loop is gone after Stop or cancellation; late events are dropped.
        let _ = self.tx.send(event);
    }

    pub fn add_task(&self, label: impl Into<String>, total: Option<u64>) -> TaskHandle {
        self.add_task_at(label, total, 0)
    }

    /// Register a task that starts at `position` (a resumed download).
    pub fn add_task_at(&self, label: impl Into<String>, total: Option<u64>, position: u64) -> TaskHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.send(ProgressEvent::AddTask {
            id,
            label: label.into(),
            total,
            position,
        });
        TaskHandle {
            id,
            handle: self.clone(),
            started: Instant::now(),
            last_sent: None,
            total,
            finished: false,
        }
    }

    pub fn resize(&self, width: u16) {
        self.send(ProgressEvent::Resize { width });
    }

    pub fn log(&self, level: Level, message: impl Into<String>) {
        self.send(ProgressEvent::Log {
            level,
            message: message.into(),
        });
    }
}

/// One registered task. Updates are rate-limited per handle.
///
/// Dropping a handle without calling [`TaskHandle::finish`] removes the task
/// from the region as abandoned.
pub struct TaskHandle {
    id: TaskId,
    handle: ProgressHandle,
    started: Instant,
    last_sent: Option<Instant>,
    total: Option<u64>,
    finished: bool,
}

impl TaskHandle {
    pub fn update(&mut self, current: u64) {
        let now = Instant::now();
        let complete = self.total.is_some_and(|t| current >= t);
        let due = self
            .last_sent
            .is_none_or(|last| now.duration_since(last) >= self.handle.update_interval);
        if !due && !complete {
            return;
        }
        self.last_sent = Some(now);
        self.handle.send(ProgressEvent::UpdateTask {
            id: self.id,
            current,
            total: self.total,
            elapsed: now.duration_since(self.started),
        });
    }

    pub fn finish(mut self) {
        self.finished = true;
        self.handle.send(ProgressEvent::FinishTask {
            id: self.id,
            success: true,
        });
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.handle.send(ProgressEvent::FinishTask {
                id: self.id,
                success: false,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        /// Output split into lines with escape sequences removed.
        fn lines(&self) -> Vec<String> {
            let escapes = Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap();
            let raw = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
            raw.split('\n')
                .map(|line| escapes.replace_all(line, "").into_owned())
                .filter(|line| !line.is_empty())
                .collect()
        }
    }

    fn manager(interactive: bool, plain_interval: Duration) -> (ProgressManager, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let config = ProgressConfig {
            plain_interval,
            update_interval: Duration::ZERO,
            width: Some(120),
        };
        let manager = ProgressManager::start(
            ProgressSink::new(buffer.clone(), interactive),
            config,
            CancellationToken::new(),
        );
        (manager, buffer)
    }

    #[tokio::test]
    async fn tasks_render_in_insertion_order() {
        let (manager, buffer) = manager(true, Duration::ZERO);
        let progress = manager.handle();

        let mut a = progress.add_task("a.mp4", Some(100));
        let mut b = progress.add_task("b.mp4", Some(100));
        b.update(90);
        a.update(10);
        manager.stop().await;

        let lines = buffer.lines();
        let last_a = lines.iter().rposition(|l| l.starts_with("a.mp4")).unwrap();
        let last_b = lines.iter().rposition(|l| l.starts_with("b.mp4")).unwrap();
        assert!(last_a < last_b, "{lines:?}");
        assert!(lines[last_a].contains(" 10%"));
        assert!(lines[last_b].contains(" 90%"));
    }

    #[tokio::test]
    async fn log_is_a_standalone_line_between_updates_plain() {
        let (manager, buffer) = manager(false, Duration::ZERO);
        let progress = manager.handle();

        let mut task = progress.add_task("clip.mp4", Some(100));
        task.update(10);
        progress.log(Level::INFO, "hello from a producer");
        task.update(20);
        manager.stop().await;

        let lines = buffer.lines();
        let hits: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.contains("hello from a producer"))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(hits.len(), 1, "{lines:?}");
        let at = hits[0];
        assert_eq!(lines[at], format_log_for_test(Level::INFO, "hello from a producer"));
        assert!(lines[at - 1].contains(" 10%"));
        assert!(lines[at + 1].contains(" 20%"));
    }

    #[tokio::test]
    async fn log_is_a_standalone_line_between_updates_interactive() {
        let (manager, buffer) = manager(true, Duration::ZERO);
        let progress = manager.handle();

        let mut task = progress.add_task("clip.mp4", Some(100));
        task.update(10);
        progress.log(Level::WARN, "disk almost full");
        task.update(20);
        manager.stop().await;

        let lines = buffer.lines();
        let hits: Vec<&String> = lines.iter().filter(|l| l.contains("disk almost full")).collect();
        assert_eq!(hits.len(), 1, "{lines:?}");
        assert_eq!(*hits[0], format_log_for_test(Level::WARN, "disk almost full"));

        let log_at = lines.iter().position(|l| l.contains("disk almost full")).unwrap();
        let first_20 = lines.iter().position(|l| l.contains(" 20%")).unwrap();
        assert!(lines[..log_at].iter().any(|l| l.contains(" 10%")));
        assert!(log_at < first_20);
    }

    #[tokio::test]
    async fn plain_mode_throttles_but_always_prints_completion() {
        let (manager, buffer) = manager(false, Duration::from_secs(3600));
        let progress = manager.handle();

        let mut task = progress.add_task("song.mp3", Some(100));
        task.update(10);
        task.update(50);
        task.update(70);
        task.finish();
        manager.stop().await;

        let lines = buffer.lines();
        assert_eq!(lines.len(), 2, "{lines:?}");
        assert!(lines[0].contains(" 10%"));
        assert!(lines[1].contains("100%"));
    }

    #[tokio::test]
    async fn dropped_task_is_reported_as_stopped() {
        let (manager, buffer) = manager(false, Duration::ZERO);
        let progress = manager.handle();

        let mut task = progress.add_task("broken.mp4", Some(100));
        task.update(30);
        drop(task);
        manager.stop().await;

        let lines = buffer.lines();
        assert_eq!(lines.last().map(String::as_str), Some("broken.mp4  stopped at 30 B"));
        assert!(!lines.iter().any(|l| l.contains("100%")));
    }

    #[tokio::test]
    async fn resize_only_affects_later_lines() {
        let (manager, buffer) = manager(false, Duration::ZERO);
        let progress = manager.handle();

        let mut task = progress.add_task("a-rather-long-file-name-for-testing.mp4", Some(1000));
        task.update(100);
        progress.resize(20);
        task.update(200);
        manager.stop().await;

        let lines = buffer.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].chars().count() > 20);
        assert_eq!(lines[1].chars().count(), 20);
    }

    #[tokio::test]
    async fn stop_drains_every_event() {
        let (manager, buffer) = manager(false, Duration::ZERO);
        let progress = manager.handle();

        for i in 0..200 {
            progress.log(Level::INFO, format!("line {i}"));
        }
        manager.stop().await;

        let lines = buffer.lines();
        assert_eq!(lines.len(), 200);
        assert!(lines[199].ends_with("line 199"));
    }

    #[tokio::test]
    async fn cancellation_ends_the_loop() {
        let token = CancellationToken::new();
        let manager = ProgressManager::start(
            ProgressSink::new(std::io::sink(), false),
            ProgressConfig::default(),
            token.clone(),
        );
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), manager.stop())
            .await
            .expect("loop exits after cancellation");
    }

    #[tokio::test]
    async fn concurrent_producers_keep_registration_order() {
        let (manager, buffer) = manager(true, Duration::ZERO);
        let progress = manager.handle();

        let registered: Vec<TaskHandle> = (0..5)
            .map(|i| progress.add_task(format!("item-{i}"), Some(10)))
            .collect();
        // Later registrations report first.
        let joins: Vec<_> = registered
            .into_iter()
            .rev()
            .map(|mut task| {
                tokio::spawn(async move {
                    task.update(10);
                    task
                })
            })
            .collect();
        let mut tasks = Vec::new();
        for join in joins {
            tasks.push(join.await.unwrap());
        }
        manager.stop().await;

        let lines = buffer.lines();
        let region: Vec<&str> = lines[lines.len() - 5..]
            .iter()
            .map(|l| l.split_whitespace().next().unwrap_or_default())
            .collect();
        assert_eq!(region, ["item-0", "item-1", "item-2", "item-3", "item-4"]);
        assert!(lines[lines.len() - 5..].iter().all(|l| l.contains("100%")));
        drop(tasks);
    }

    #[tokio::test]
    async fn every_task_completes_exactly_once_in_plain_mode() {
        let (manager, buffer) = manager(false, Duration::ZERO);
        let progress = manager.handle();

        let joins: Vec<_> = (0..5)
            .map(|i| progress.add_task(format!("item-{i}"), Some(10)))
            .map(|mut task| {
                tokio::spawn(async move {
                    task.update(10);
                    task.finish();
                })
            })
            .collect();
        for join in joins {
            join.await.unwrap();
        }
        manager.stop().await;

        let lines = buffer.lines();
        for i in 0..5 {
            let label = format!("item-{i} ");
            let done = lines
                .iter()
                .filter(|l| l.starts_with(&label) && l.contains("100%"))
                .count();
            assert_eq!(done, 1, "{lines:?}");
        }
    }

    fn format_log_for_test(level: Level, message: &str) -> String {
        render::format_log(level, message)
    }

    #[test]
    fn disabled_handle_swallows_events() {
        let progress = ProgressHandle::disabled();
        let mut task = progress.add_task("x", None);
        task.update(1);
        task.finish();
        progress.log(Level::ERROR, "nobody listens");
    }
}
