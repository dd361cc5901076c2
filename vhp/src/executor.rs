use std::fmt;
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use vhp_format::{ArchiveError, ArchiveHandle, DirId, ErrorKind, FileId, Interrupt};

use crate::{CommandError, CommandResult, Operation, Payload};

/// Identifies one accepted command in the results delivered to the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandId(u64);

impl CommandId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    /// Accepted, but the worker has not picked it up yet.
    Dispatched,
    Running,
}

type Work = Box<dyn FnOnce(&mut ArchiveHandle) -> Result<Option<Payload>, ArchiveError> + Send>;
type Listener = Box<dyn Fn(CommandResult) + Send + Sync>;

struct Job {
    id: CommandId,
    operation: Operation,
    interrupt: Interrupt,
    work: Work,
}

struct InFlight {
    id: CommandId,
    operation: Operation,
    interrupt: Interrupt,
    started: Instant,
    running: bool,
}

struct Shared {
    handle: Mutex<ArchiveHandle>,
    busy: AtomicBool,
    /// Set once the engine has panicked. No command runs after that.
    poisoned: AtomicBool,
    current: Mutex<Option<InFlight>>,
    last_elapsed: Mutex<Option<Duration>>,
    listener: Listener,
}

impl Shared {
    /// Release the in-flight slot, if it still belongs to `id` (or to anyone, for `None`).
    fn release(&self, id: Option<CommandId>) -> Option<(InFlight, Duration)> {
        let mut current = self.current.lock();
        if id.is_some() && current.as_ref().map(|x| x.id) != id {
            return None;
        }

        let in_flight = current.take()?;
        let elapsed = in_flight.started.elapsed();
        *self.last_elapsed.lock() = Some(elapsed);
        self.busy.store(false, Ordering::Release);
        Some((in_flight, elapsed))
    }

    fn mark_running(&self, id: CommandId) -> bool {
        match self.current.lock().as_mut() {
            Some(x) if x.id == id => {
                x.running = true;
                true
            }
            _ => false,
        }
    }

    fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Fail a command that will never run because the worker has stopped.
    fn abandon(&self, id: CommandId, operation: Operation) {
        if let Some((_, elapsed)) = self.release(Some(id)) {
            tracing::warn!(%id, %operation, "dropping command, worker has stopped");
            self.notify(
                CommandResult::failed(Some(operation), CommandError::WorkerUnavailable)
                    .for_command(id, elapsed),
            );
        }
    }

    fn notify(&self, result: CommandResult) {
        let id = result.command();
        if panic::catch_unwind(AssertUnwindSafe(|| (self.listener)(result))).is_err() {
            tracing::warn!(?id, "completion listener panicked");
        }
    }

    /// Run one job. Returns false if the engine panicked and the worker must stop.
    fn run(&self, job: Job) -> bool {
        let Job {
            id,
            operation,
            interrupt,
            work,
        } = job;

        if !self.mark_running(id) {
            tracing::debug!(%id, %operation, "skipping command cancelled before it started");
            return true;
        }

        let outcome = {
            let mut handle = self.handle.lock();
            handle.set_interrupt(interrupt);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&mut *handle)));
            handle.set_interrupt(Interrupt::new());
            outcome
        };

        let healthy = outcome.is_ok();
        let result = match outcome {
            Ok(Ok(Some(payload))) => CommandResult::with_payload(operation, payload),
            Ok(Ok(None)) => CommandResult::succeeded(operation),
            Ok(Err(e)) if e.kind() == ErrorKind::Cancelled => {
                tracing::debug!(%id, %operation, "command interrupted");
                CommandResult::cancelled(operation)
            }
            Ok(Err(e)) => {
                tracing::debug!(%id, %operation, error = %e, "command failed");
                CommandResult::failed(Some(operation), e.into())
            }
            Err(_) => {
                tracing::error!(%id, %operation, "engine panicked, stopping worker");
                self.poisoned.store(true, Ordering::SeqCst);
                CommandResult::failed(Some(operation), CommandError::WorkerUnavailable)
            }
        };

        match self.release(Some(id)) {
            Some((_, elapsed)) => {
                tracing::debug!(%id, %operation, ?elapsed, "command finished");
                self.notify(result.for_command(id, elapsed));
            }
            None => {
                tracing::warn!(%id, %operation, "suppressing completion of cancelled command");
            }
        }

        healthy
    }
}

fn run_worker(shared: Arc<Shared>, jobs: flume::Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        if !shared.run(job) {
            break;
        }
    }

    // Commands queued behind a panic still owe their listener a result.
    for job in jobs.drain() {
        shared.abandon(job.id, job.operation);
    }

    tracing::debug!("executor worker exiting");
}

/// Single-flight executor for one [ArchiveHandle].
///
/// The handle is moved onto a dedicated worker thread. Every operation method either
/// accepts the command and returns its [CommandId], or rejects it synchronously with a
/// Busy [CommandResult] when another command is still in flight. Accepted commands
/// report to the listener exactly once, from the worker thread or from [cancel][Self::cancel].
pub struct CommandExecutor {
    shared: Arc<Shared>,
    jobs: Option<flume::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    next_id: AtomicU64,
    autosave: bool,
}

impl fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("state", &self.state())
            .field("autosave", &self.autosave)
            .finish()
    }
}

impl CommandExecutor {
    pub fn new<F>(handle: ArchiveHandle, listener: F) -> std::io::Result<CommandExecutor>
    where
        F: Fn(CommandResult) + Send + Sync + 'static,
    {
        let autosave = handle.autosave();
        let shared = Arc::new(Shared {
            handle: Mutex::new(handle),
            busy: AtomicBool::new(false),
            poisoned: AtomicBool::new(false),
            current: Mutex::new(None),
            last_elapsed: Mutex::new(None),
            listener: Box::new(listener),
        });

        let (tx, rx) = flume::unbounded();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("vhp-worker".into())
            .spawn(move || run_worker(worker_shared, rx))?;

        Ok(CommandExecutor {
            shared,
            jobs: Some(tx),
            worker: Some(worker),
            next_id: AtomicU64::new(1),
            autosave,
        })
    }

    /// Run `work` against the handle on the worker thread.
    pub fn dispatch<F>(&self, operation: Operation, work: F) -> Result<CommandId, CommandResult>
    where
        F: FnOnce(&mut ArchiveHandle) -> Result<Option<Payload>, ArchiveError> + Send + 'static,
    {
        let unavailable = || CommandResult::failed(Some(operation), CommandError::WorkerUnavailable);
        let jobs = self.jobs.as_ref().ok_or_else(unavailable)?;
        if self.shared.is_poisoned() {
            tracing::debug!(%operation, "rejecting command, worker has stopped");
            return Err(unavailable());
        }

        if self
            .shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(%operation, "rejecting command, executor is busy");
            return Err(CommandResult::busy());
        }

        let id = CommandId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let interrupt = Interrupt::new();
        *self.shared.current.lock() = Some(InFlight {
            id,
            operation,
            interrupt: interrupt.clone(),
            started: Instant::now(),
            running: false,
        });

        let job = Job {
            id,
            operation,
            interrupt,
            work: Box::new(work),
        };

        if jobs.send(job).is_err() {
            self.shared.release(Some(id));
            tracing::error!(%id, %operation, "executor worker is gone");
            return Err(unavailable());
        }

        // The worker may have stopped after the check above and before it could
        // see this job. Whoever releases the slot first reports the failure.
        if self.shared.is_poisoned() && self.shared.release(Some(id)).is_some() {
            tracing::debug!(%id, %operation, "rejecting command, worker has stopped");
            return Err(unavailable());
        }

        tracing::debug!(%id, %operation, "dispatched command");
        Ok(id)
    }

    /// Abandon the in-flight command and report it as cancelled.
    ///
    /// The engine call is only asked to stop; it halts at its next chunk boundary, and
    /// its eventual completion is dropped. The executor accepts new commands as soon as
    /// this returns. Returns false if nothing was in flight.
    pub fn cancel(&self) -> bool {
        let (in_flight, elapsed) = match self.shared.release(None) {
            Some(v) => v,
            None => return false,
        };

        in_flight.interrupt.trigger();
        tracing::info!(id = %in_flight.id, operation = %in_flight.operation, ?elapsed, "cancelled command");
        self.shared
            .notify(CommandResult::cancelled(in_flight.operation).for_command(in_flight.id, elapsed));
        true
    }

    pub fn state(&self) -> ExecutorState {
        match self.shared.current.lock().as_ref() {
            None => ExecutorState::Idle,
            Some(x) if x.running => ExecutorState::Running,
            Some(_) => ExecutorState::Dispatched,
        }
    }

    #[inline(always)]
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Running time of the in-flight command, or the duration of the last one.
    pub fn elapsed(&self) -> Option<Duration> {
        if let Some(in_flight) = self.shared.current.lock().as_ref() {
            return Some(in_flight.started.elapsed());
        }

        *self.shared.last_elapsed.lock()
    }

    /// Borrow the handle on the calling thread, e.g. to browse the tree.
    pub fn inspect<T, F>(&self, f: F) -> Result<T, CommandError>
    where
        F: FnOnce(&ArchiveHandle) -> T,
    {
        if self.is_busy() {
            return Err(CommandError::Busy);
        }

        let handle = self.shared.handle.try_lock().ok_or(CommandError::Busy)?;
        Ok(f(&*handle))
    }

    pub fn file_exists(&self, path: &str, start: Option<DirId>) -> Result<bool, CommandError> {
        self.inspect(|handle| handle.file_exists(path, start))
    }

    pub fn create<P: Into<PathBuf>>(&self, source: P) -> Result<CommandId, CommandResult> {
        let source = source.into();
        self.dispatch(Operation::Create, move |h| h.create(&source).map(|_| None))
    }

    pub fn create_from(
        &self,
        directories: Vec<PathBuf>,
        files: Vec<PathBuf>,
    ) -> Result<CommandId, CommandResult> {
        self.dispatch(Operation::Create, move |h| {
            h.create_from(&directories, &files).map(|_| None)
        })
    }

    pub fn read<P: Into<PathBuf>>(&self, path: P) -> Result<CommandId, CommandResult> {
        let path = path.into();
        self.dispatch(Operation::Read, move |h| h.read(&path).map(|_| None))
    }

    pub fn extract<P: Into<PathBuf>>(&self, dest: P) -> Result<CommandId, CommandResult> {
        let dest = dest.into();
        self.dispatch(Operation::Extract, move |h| h.extract(&dest).map(|_| None))
    }

    pub fn extract_directory<P: Into<PathBuf>>(
        &self,
        path: &str,
        dest: P,
    ) -> Result<CommandId, CommandResult> {
        let path = path.to_string();
        let dest = dest.into();
        self.dispatch(Operation::ExtractDir, move |h| {
            h.extract_directory(&path, &dest).map(|_| None)
        })
    }

    pub fn extract_directory_node<P: Into<PathBuf>>(
        &self,
        id: DirId,
        dest: P,
    ) -> Result<CommandId, CommandResult> {
        let dest = dest.into();
        self.dispatch(Operation::ExtractDir, move |h| {
            h.extract_directory_node(id, &dest).map(|_| None)
        })
    }

    pub fn extract_files<P: Into<PathBuf>>(
        &self,
        paths: Vec<String>,
        dest: P,
    ) -> Result<CommandId, CommandResult> {
        let dest = dest.into();
        self.dispatch(Operation::ExtractFiles, move |h| {
            h.extract_files(&paths, &dest).map(|_| None)
        })
    }

    pub fn extract_file_nodes<P: Into<PathBuf>>(
        &self,
        ids: Vec<FileId>,
        dest: P,
    ) -> Result<CommandId, CommandResult> {
        let dest = dest.into();
        self.dispatch(Operation::ExtractFiles, move |h| {
            h.extract_file_nodes(&ids, &dest).map(|_| None)
        })
    }

    pub fn read_all_bytes(
        &self,
        path: &str,
        start: Option<DirId>,
    ) -> Result<CommandId, CommandResult> {
        let path = path.to_string();
        self.dispatch(Operation::ReadAllBytes, move |h| {
            h.read_all_bytes(&path, start).map(|x| Some(Payload::Bytes(x)))
        })
    }

    pub fn read_all_text(
        &self,
        path: &str,
        start: Option<DirId>,
    ) -> Result<CommandId, CommandResult> {
        let path = path.to_string();
        self.dispatch(Operation::ReadAllText, move |h| {
            h.read_all_text(&path, start).map(|x| Some(Payload::Text(x)))
        })
    }

    pub fn write_stream(
        &self,
        mut reader: Box<dyn Read + Send>,
        name: &str,
        dir: DirId,
        override_existing: bool,
    ) -> Result<CommandId, CommandResult> {
        let name = name.to_string();
        self.dispatch(Operation::WriteStream, move |h| {
            h.write_stream(&mut reader, &name, dir, override_existing)
                .map(|_| None)
        })
    }

    pub fn write_all_bytes(
        &self,
        data: Vec<u8>,
        name: &str,
        dir: DirId,
        override_existing: bool,
    ) -> Result<CommandId, CommandResult> {
        let name = name.to_string();
        self.dispatch(Operation::WriteAllBytes, move |h| {
            h.write_all_bytes(&data, &name, dir, override_existing)
                .map(|_| None)
        })
    }

    /// Write to a full virtual path, creating missing parent directories.
    pub fn write_all_bytes_at(
        &self,
        data: Vec<u8>,
        path: &str,
        override_existing: bool,
    ) -> Result<CommandId, CommandResult> {
        let path = path.to_string();
        self.dispatch(Operation::WriteAllBytes, move |h| {
            h.write_all_bytes_at(&data, &path, override_existing)
                .map(|_| None)
        })
    }

    pub fn write_all_text(
        &self,
        content: String,
        name: &str,
        dir: DirId,
        override_existing: bool,
    ) -> Result<CommandId, CommandResult> {
        let name = name.to_string();
        self.dispatch(Operation::WriteAllText, move |h| {
            h.write_all_text(&content, &name, dir, override_existing)
                .map(|_| None)
        })
    }

    /// Remove a file from the tree.
    ///
    /// With autosave off this is an in-memory edit made on the calling thread and
    /// `Ok(None)` is returned without notifying the listener. With autosave on the
    /// container rewrite is dispatched like any other command.
    pub fn remove_file(
        &self,
        path: &str,
        start: Option<DirId>,
    ) -> Result<Option<CommandId>, CommandResult> {
        if self.autosave {
            let path = path.to_string();
            return self
                .dispatch(Operation::RemoveFile, move |h| {
                    h.remove_file(&path, start).map(|_| None)
                })
                .map(Some);
        }

        if self.is_busy() {
            return Err(CommandResult::busy());
        }

        let mut handle = self
            .shared
            .handle
            .try_lock()
            .ok_or_else(CommandResult::busy)?;

        handle
            .remove_file(path, start)
            .map(|_| None)
            .map_err(|e| CommandResult::failed(Some(Operation::RemoveFile), e.into()))
    }

    pub fn save(&self) -> Result<CommandId, CommandResult> {
        self.dispatch(Operation::Save, |h| h.save().map(|_| None))
    }
}

impl Drop for CommandExecutor {
    fn drop(&mut self) {
        if let Some(in_flight) = self.shared.current.lock().as_ref() {
            in_flight.interrupt.trigger();
        }

        drop(self.jobs.take());

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("executor worker panicked");
            }
        }
    }
}
