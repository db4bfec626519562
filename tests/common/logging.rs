use std::{
    collections::HashSet,
    io,
    sync::{Mutex, Once},
    thread::{self, ThreadId},
};

use log::{Level, LevelFilter};

static LOGGER_INIT: Once = Once::new();

/// Records logged by threads that called [`capture_logs`].
static CAPTURED: Mutex<Vec<CapturedRecord>> = Mutex::new(Vec::new());

static CAPTURING_THREADS: Mutex<Option<HashSet<ThreadId>>> = Mutex::new(None);

#[derive(Clone, Debug)]
pub(crate) struct CapturedRecord {
    pub(crate) level: Level,
    pub(crate) message: String,
}

// Set up a logger that logs all log messages with `level` and above, tagged with the emitting thread and
// log target.
pub(crate) fn setup_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{:?}][{}][{}] {}",
                    thread::current().id(),
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .level(level)
            .chain(io::stdout())
            .chain(fern::Output::call(capture))
            .apply()
            .unwrap();
    })
}

fn capture(record: &log::Record) {
    let current = thread::current().id();
    let capturing = CAPTURING_THREADS
        .lock()
        .unwrap()
        .as_ref()
        .map_or(false, |threads| threads.contains(&current));
    if capturing {
        CAPTURED.lock().unwrap().push(CapturedRecord {
            level: record.level(),
            message: record.args().to_string(),
        });
    }
}

/// Start keeping the records the current thread logs, so that [`captured_records`] can return them.
pub(crate) fn capture_logs() {
    CAPTURING_THREADS
        .lock()
        .unwrap()
        .get_or_insert_with(HashSet::new)
        .insert(thread::current().id());
}

/// Every record captured so far whose message contains `pattern`.
pub(crate) fn captured_records(pattern: &str) -> Vec<CapturedRecord> {
    CAPTURED
        .lock()
        .unwrap()
        .iter()
        .filter(|record| record.message.contains(pattern))
        .cloned()
        .collect()
}
