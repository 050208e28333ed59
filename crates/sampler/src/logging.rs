//! Realtime-safe logging.
//!
//! The audio thread cannot allocate or do I/O, but it still needs to report dropped events and
//! other diagnostics. Rust's logging facades don't support this, so the audio thread is given a
//! fixed-capacity ring buffer of pre-formatted messages, drained by a background thread which
//! forwards them to the `log` crate. Off the audio thread, `rt_*!` macros forward directly to
//! `log`'s own macros.
use std::fmt::Arguments as FmtArgs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{park, JoinHandle};
use std::time::{Duration, Instant};

use arrayvec::ArrayString;
use once_cell::sync::Lazy;
use thingbuf::{recycling::Recycle, ThingBuf};

use crate::is_audio_thread::is_audio_thread;

const LOG_LENGTH_LIMIT: usize = 512;
const LOG_QUEUE_LENGTH: usize = 4096;

/// If the background logging thread falls this far behind, the delay is mentioned in the log line.
const WARN_LATENCY: Duration = Duration::from_millis(250);

type InlineLogMessage = ArrayString<LOG_LENGTH_LIMIT>;

#[derive(Debug)]
#[allow(clippy::large_enum_variant)]
enum LogMessage {
    Static(&'static str),
    Inline(InlineLogMessage),
}

struct LogRecord {
    skipped_messages: u64,
    level: log::Level,
    module: &'static str,
    message: LogMessage,
    truncated: bool,
    enqueue_time: Instant,
}

struct LogRecordRecycler;

impl Recycle<LogRecord> for LogRecordRecycler {
    fn new_element(&self) -> LogRecord {
        LogRecord {
            skipped_messages: 0,
            level: log::Level::Debug,
            enqueue_time: Instant::now(),
            message: LogMessage::Static("unset"),
            module: module_path!(),
            truncated: false,
        }
    }

    fn recycle(&self, _element: &mut LogRecord) {}
}

struct LogMessageFormatter<'a> {
    log_message: &'a mut InlineLogMessage,
    truncated: &'a mut bool,
}

impl std::fmt::Write for LogMessageFormatter<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        if *self.truncated {
            return Ok(());
        }

        let remaining = self.log_message.remaining_capacity();
        if s.as_bytes().len() <= remaining {
            self.log_message.push_str(s);
            return Ok(());
        }

        *self.truncated = true;
        for c in s.chars() {
            if self.log_message.try_push(c).is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}

fn build_log_message(level: log::Level, args: FmtArgs<'_>, module: &'static str) -> LogRecord {
    use std::fmt::Write;

    let mut truncated = false;
    let message = match args.as_str() {
        Some(m) => LogMessage::Static(m),
        None => {
            let mut buf = InlineLogMessage::new();
            let mut formatter = LogMessageFormatter {
                truncated: &mut truncated,
                log_message: &mut buf,
            };
            write!(formatter, "{args}").expect("our formatter never fails");
            LogMessage::Inline(buf)
        }
    };

    LogRecord {
        skipped_messages: 0,
        level,
        message,
        module,
        truncated,
        enqueue_time: Instant::now(),
    }
}

struct LogCtx {
    thread: JoinHandle<()>,
    message_queue: ThingBuf<LogRecord, LogRecordRecycler>,
}

fn setup_ctx() -> LogCtx {
    let thread = std::thread::spawn(background_thread_mainloop);
    let message_queue = ThingBuf::with_recycle(LOG_QUEUE_LENGTH, LogRecordRecycler);
    LogCtx {
        thread,
        message_queue,
    }
}

static GLOBAL_CTX: Lazy<LogCtx> = Lazy::new(setup_ctx);

/// Entry point used by the `rt_*!` macros when running on the audio thread.
pub(crate) fn dispatch_message(level: log::Level, args: FmtArgs<'_>, module: &'static str) {
    use std::cell::Cell;

    thread_local! {
        static SKIPPED_MESSAGES: Cell<u64> = const { Cell::new(0) };
    }

    if level > log::max_level() {
        return;
    }

    let mut record = build_log_message(level, args, module);
    record.skipped_messages = SKIPPED_MESSAGES.get();

    match GLOBAL_CTX.message_queue.push(record) {
        Ok(_) => {
            SKIPPED_MESSAGES.replace(0);
            GLOBAL_CTX.thread.thread().unpark();
        }
        Err(_) => {
            SKIPPED_MESSAGES.replace(SKIPPED_MESSAGES.get() + 1);
        }
    }
}

fn log_one(record: LogRecord) {
    let msg_str = match &record.message {
        LogMessage::Static(s) => s,
        LogMessage::Inline(i) => i.as_str(),
    };

    let latency = Instant::now() - record.enqueue_time;

    if record.skipped_messages != 0 {
        log::warn!(
            "realtime logging thread fell behind: {} messages were dropped",
            record.skipped_messages
        );
    }

    let delayed = if latency > WARN_LATENCY {
        format!(", delayed by {:.3}s", latency.as_secs_f64())
    } else {
        String::new()
    };
    let truncated_part = if record.truncated { ", truncated" } else { "" };

    log::log!(target: record.module, record.level, "{msg_str} (from rt thread{delayed}{truncated_part})");
}

fn drain_queue() {
    while let Some(msg) = GLOBAL_CTX.message_queue.pop() {
        log_one(msg);
    }
}

fn background_thread_mainloop() {
    loop {
        drain_queue();
        park();
    }
}

/// Ensure the background logging thread is running. Call this during module construction so the
/// lazy spawn never happens for the first time from the audio thread.
pub fn ensure_log_ctx() {
    std::hint::black_box(GLOBAL_CTX.message_queue.capacity());
}

macro_rules! rt_log {
    ($level: expr, $fmt: expr $(, $args: expr)* $(,)?) => {
        let macro_level = $level;
        if crate::is_audio_thread::is_audio_thread() && macro_level <= log::max_level() {
            crate::logging::dispatch_message(macro_level, format_args!($fmt, $($args),*), module_path!());
        } else {
            log::log!($level, $fmt, $($args),*);
        }
    }
}

macro_rules! rt_warn {
    ($($args:tt)+) => {
        rt_log!(log::Level::Warn, $($args)*);
    }
}

macro_rules! rt_debug {
    ($($args: tt)+) => {
        rt_log!(log::Level::Debug, $($args)*);
    }
}

/// A per-key "at most once every N seconds" gate, implemented with a single atomic so it can be
/// checked from the audio thread without locking.
///
/// Stores the last-emitted time as whole seconds since an arbitrary epoch (process start is fine;
/// we only ever compare deltas).
pub(crate) struct RateLimiter {
    last_emitted_secs: AtomicU64,
    epoch: Instant,
}

impl RateLimiter {
    pub(crate) fn new() -> Self {
        Self {
            last_emitted_secs: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    /// Returns true if the caller should emit now, and records that it did.
    pub(crate) fn should_emit(&self, min_interval: Duration) -> bool {
        let now_secs = self.epoch.elapsed().as_secs_f64();
        let min_interval_secs = min_interval.as_secs_f64();
        let last = f64::from_bits(self.last_emitted_secs.load(Ordering::Relaxed));
        if now_secs - last < min_interval_secs {
            return false;
        }
        self.last_emitted_secs
            .store(now_secs.to_bits(), Ordering::Relaxed);
        true
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) use rt_debug;
pub(crate) use rt_log;
pub(crate) use rt_warn;
