//! Background workers with cooperative cancellation.
//!
//! One OS thread per worker, consuming a single-slot input queue.
//! Submitting new work while a task runs cancels the running task and
//! blocks the submitter until it yields; emissions go through an mpsc
//! channel the caller polls. A task emits exactly one terminal result,
//! `done` or `cancelled`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::analyzer::{AnalyzerEmission, analyze};
use crate::checksum::{ChecksumEmission, checksum_file};
use crate::database::Database;
use crate::events::CoreEvent;
use crate::detect::{DetectEmission, detect_databases, walk_folder};
use crate::search::{SearchEmission, SearchInput, run_search};

/// Shared cooperative cancellation flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

struct State<I> {
    pending: Option<I>,
    running: bool,
    current: Option<CancelToken>,
    shutdown: bool,
}

struct Shared<I> {
    state: Mutex<State<I>>,
    condvar: Condvar,
}

/// A background worker consuming inputs of type `I`.
pub struct Worker<I: Send + 'static> {
    shared: Arc<Shared<I>>,
    handle: Option<JoinHandle<()>>,
    name: &'static str,
}

impl<I: Send + 'static> Worker<I> {
    /// Spawns the worker thread. The job runs once per input, checking
    /// the token at its yield points and emitting its own terminal
    /// result.
    pub fn spawn<F>(name: &'static str, job: F) -> Self
    where
        F: Fn(I, &CancelToken) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                pending: None,
                running: false,
                current: None,
                shutdown: false,
            }),
            condvar: Condvar::new(),
        });
        let thread_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name(format!("worker-{name}"))
            .spawn(move || {
                loop {
                    let (input, token) = {
                        let mut state = match thread_shared.state.lock() {
                            Ok(state) => state,
                            Err(_) => return,
                        };
                        while state.pending.is_none() && !state.shutdown {
                            state = match thread_shared.condvar.wait(state) {
                                Ok(state) => state,
                                Err(_) => return,
                            };
                        }
                        if state.shutdown && state.pending.is_none() {
                            return;
                        }
                        let input = state.pending.take().expect("waited for input");
                        let token = CancelToken::new();
                        state.current = Some(token.clone());
                        state.running = true;
                        (input, token)
                    };
                    job(input, &token);
                    if let Ok(mut state) = thread_shared.state.lock() {
                        state.running = false;
                        state.current = None;
                    }
                    thread_shared.condvar.notify_all();
                }
            })
            .expect("worker thread spawn");
        Self { shared, handle: Some(handle), name }
    }

    /// Queues an input. A running task is signalled to cancel; this
    /// blocks until it yields, then the new input takes the slot.
    pub fn work(&self, input: I) {
        let Ok(mut state) = self.shared.state.lock() else {
            return;
        };
        if state.running {
            if let Some(token) = &state.current {
                log::debug!("[CANCEL] {}: superseding running task", self.name);
                token.cancel();
            }
            while state.running {
                state = match self.shared.condvar.wait(state) {
                    Ok(state) => state,
                    Err(_) => return,
                };
            }
        }
        state.pending = Some(input);
        self.shared.condvar.notify_all();
    }

    /// Requests cooperative cancellation of the running task, without
    /// waiting.
    pub fn stop(&self) {
        if let Ok(state) = self.shared.state.lock()
            && let Some(token) = &state.current
        {
            log::info!("[CANCEL] {}: stop requested", self.name);
            token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared
            .state
            .lock()
            .map(|s| s.running || s.pending.is_some())
            .unwrap_or(false)
    }
}

impl<I: Send + 'static> Drop for Worker<I> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.shutdown = true;
            state.pending = None;
            if let Some(token) = &state.current {
                token.cancel();
            }
        }
        self.shared.condvar.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// ----------------------------------------------------------------------
// Concrete workers

/// Search worker: streams result chunks for a query.
pub fn search_worker(db: Arc<Database>) -> (Worker<SearchInput>, Receiver<SearchEmission>) {
    let (sender, receiver) = channel();
    let worker = Worker::spawn("search", move |input: SearchInput, token| {
        let sender: &Sender<SearchEmission> = &sender;
        let events = db.events().clone();
        run_search(&db, &input, token, &mut |emission| {
            events.emit(CoreEvent::WorkerResult { kind: "search" });
            let _ = sender.send(emission);
        });
    });
    (worker, receiver)
}

/// Checksum worker: streams a file in 1 MiB blocks updating SHA-1 and
/// MD5.
pub fn checksum_worker() -> (Worker<PathBuf>, Receiver<ChecksumEmission>) {
    let (sender, receiver) = channel();
    let worker = Worker::spawn("checksum", move |path: PathBuf, token| {
        checksum_file(&path, token, &mut |emission| {
            let _ = sender.send(emission);
        });
    });
    (worker, receiver)
}

/// Analyzer worker: runs the external sqlite3_analyzer binary and
/// parses its output.
pub fn analyzer_worker(
    analyzer_path: PathBuf,
) -> (Worker<PathBuf>, Receiver<AnalyzerEmission>) {
    let (sender, receiver) = channel();
    let worker = Worker::spawn("analyzer", move |db_path: PathBuf, token| {
        let emission = analyze(&analyzer_path, &db_path, token);
        let _ = sender.send(emission);
    });
    (worker, receiver)
}

/// Detect worker: walks common user directories for SQLite files.
pub fn detect_worker(
    extensions: Vec<String>,
) -> (Worker<()>, Receiver<DetectEmission>) {
    let (sender, receiver) = channel();
    let worker = Worker::spawn("detect", move |(), token| {
        detect_databases(&extensions, token, &mut |emission| {
            let _ = sender.send(emission);
        });
    });
    (worker, receiver)
}

/// Import-folder worker: walks one directory for SQLite files.
pub fn import_folder_worker(
    extensions: Vec<String>,
) -> (Worker<PathBuf>, Receiver<DetectEmission>) {
    let (sender, receiver) = channel();
    let worker = Worker::spawn("import-folder", move |folder: PathBuf, token| {
        walk_folder(&folder, &extensions, token, &mut |emission| {
            let _ = sender.send(emission);
        });
    });
    (worker, receiver)
}

/// Emission of the generic on-demand worker.
#[derive(Debug)]
pub enum TaskEmission {
    Done { cancelled: bool },
}

type BoxedTask = Box<dyn FnOnce(&CancelToken) + Send>;

/// Generic worker for one-off tasks.
pub fn task_worker() -> (Worker<BoxedTask>, Receiver<TaskEmission>) {
    let (sender, receiver) = channel();
    let worker = Worker::spawn("task", move |task: BoxedTask, token| {
        task(token);
        let _ = sender.send(TaskEmission::Done { cancelled: token.is_cancelled() });
    });
    (worker, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn emissions_arrive_in_order() {
        let (sender, receiver) = channel();
        let worker = Worker::spawn("test", move |input: u32, _token| {
            for i in 0..3 {
                let _ = sender.send(input * 10 + i);
            }
        });
        worker.work(1);
        let values: Vec<u32> = (0..3).map(|_| receiver.recv().unwrap()).collect();
        assert_eq!(values, vec![10, 11, 12]);
    }

    #[test]
    fn new_work_cancels_running_task() {
        let (sender, receiver) = channel();
        let worker = Worker::spawn("test", move |input: u32, token: &CancelToken| {
            if input == 1 {
                // Simulate a long task with yield points.
                for _ in 0..200 {
                    if token.is_cancelled() {
                        let _ = sender.send((input, true));
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
            let _ = sender.send((input, token.is_cancelled()));
        });
        worker.work(1);
        std::thread::sleep(Duration::from_millis(20));
        worker.work(2);

        // First terminal emission belongs to task 1, cancelled; the
        // second belongs to task 2.
        let first = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first, (1, true));
        let second = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(second, (2, false));
    }

    #[test]
    fn stop_cancels_without_queueing() {
        let (sender, receiver) = channel();
        let worker = Worker::spawn("test", move |_input: (), token: &CancelToken| {
            for _ in 0..200 {
                if token.is_cancelled() {
                    let _ = sender.send("cancelled");
                    return;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            let _ = sender.send("done");
        });
        worker.work(());
        std::thread::sleep(Duration::from_millis(20));
        worker.stop();
        assert_eq!(receiver.recv_timeout(Duration::from_secs(5)).unwrap(), "cancelled");
    }
}
