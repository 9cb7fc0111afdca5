//! Decoder worker thread and its control handle.

use super::{
    DecodeReply, DecoderWorker, RenderRequest, BLOCK_POOL_SIZE, SESSION_QUEUE_SIZE,
    WORKER_IDLE_WAIT, WORKER_POLL_INTERVAL,
};
use crate::config::PlaybackArgs;
use crate::engine::{EngineFactory, SongData};
use crate::{MsxPlayError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

enum WorkerCommand {
    Start {
        session: u64,
        args: PlaybackArgs,
        song: SongData,
        requests: Consumer<RenderRequest>,
        replies: Producer<DecodeReply>,
        cancel: Arc<AtomicBool>,
        reply: Sender<Result<()>>,
    },
    Pause,
    Resume,
    Abort { session: u64 },
    Dispose,
    Shutdown,
}

/// Renderer-side endpoints of one decode session.
///
/// Every method is wait-free and allocation-free, so the link can be used
/// from the audio callback.
pub struct SessionLink {
    session: u64,
    requests: Producer<RenderRequest>,
    replies: Consumer<DecodeReply>,
}

impl SessionLink {
    /// Create a link plus the worker-side ends of its queues.
    pub(crate) fn channel(
        session: u64,
    ) -> (Self, Consumer<RenderRequest>, Producer<DecodeReply>) {
        let (request_tx, request_rx) = RingBuffer::new(SESSION_QUEUE_SIZE);
        let (reply_tx, reply_rx) = RingBuffer::new(SESSION_QUEUE_SIZE);
        let link = Self {
            session,
            requests: request_tx,
            replies: reply_rx,
        };
        (link, request_rx, reply_tx)
    }

    /// Generation tag of this session.
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Ask the worker for the next block. Returns `false` if the request
    /// could not be queued.
    pub fn request_block(&mut self) -> bool {
        self.requests
            .push(RenderRequest::Pull {
                session: self.session,
            })
            .is_ok()
    }

    /// Hand a consumed block back to the worker for reuse.
    ///
    /// Gives the block back if the queue is full, so it is never freed on
    /// the calling thread.
    pub fn recycle(&mut self, block: Vec<i16>) -> std::result::Result<(), Vec<i16>> {
        self.requests
            .push(RenderRequest::Recycle(block))
            .map_err(|err| match err {
                rtrb::PushError::Full(RenderRequest::Recycle(block)) => block,
                _ => Vec::new(),
            })
    }

    /// Next reply from the worker, if any.
    pub fn poll(&mut self) -> Option<DecodeReply> {
        self.replies.pop().ok()
    }
}

/// Owns the decoder worker thread.
///
/// Commands are delivered in order over a control channel; PCM flows over
/// per-session queues returned by [`start`](Self::start). Dropping the
/// handle shuts the thread down.
pub struct WorkerHandle {
    control: Sender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
    sample_rate: u32,
    next_session: u64,
    active: Option<(u64, Arc<AtomicBool>)>,
}

impl WorkerHandle {
    /// Spawn the worker thread and run the engine bootstrap on it.
    ///
    /// Returns once initialization has finished.
    pub fn spawn(factory: impl EngineFactory, sample_rate: u32) -> Result<Self> {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let (init_tx, init_rx) = crossbeam_channel::bounded(1);

        let thread = std::thread::Builder::new()
            .name("msxplay-decoder".into())
            .spawn(move || {
                let mut worker = DecoderWorker::new(factory, sample_rate);
                let init = worker.init();
                let ready = init.is_ok();
                let _ = init_tx.send(init);
                if ready {
                    WorkerLoop::new(worker, control_rx).run();
                }
            })
            .map_err(|e| MsxPlayError::WorkerError(format!("failed to spawn decoder thread: {e}")))?;

        init_rx
            .recv()
            .map_err(|_| MsxPlayError::WorkerError("decoder thread exited during init".into()))??;

        log::debug!("decoder worker ready at {sample_rate} Hz");
        Ok(Self {
            control: control_tx,
            thread: Some(thread),
            sample_rate,
            next_session: 0,
            active: None,
        })
    }

    /// Output sample rate of the worker.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Generation tag of the active session, if any.
    pub fn active_session(&self) -> Option<u64> {
        self.active.as_ref().map(|(session, _)| *session)
    }

    /// Abort any active session and start a new one.
    ///
    /// Blocks until the worker has loaded the song; load errors are returned
    /// here and leave no active session.
    pub fn start(&mut self, args: &PlaybackArgs, song: &SongData) -> Result<SessionLink> {
        self.abort();
        self.next_session += 1;
        let session = self.next_session;

        let (link, requests, replies) = SessionLink::channel(session);
        let cancel = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        self.send(WorkerCommand::Start {
            session,
            args: args.clone(),
            song: song.clone(),
            requests,
            replies,
            cancel: Arc::clone(&cancel),
            reply: done_tx,
        })?;
        done_rx
            .recv()
            .map_err(|_| MsxPlayError::WorkerError("decoder thread exited".into()))??;

        self.active = Some((session, cancel));
        Ok(link)
    }

    /// Stop serving pull requests until [`resume`](Self::resume).
    pub fn pause(&self) {
        let _ = self.control.send(WorkerCommand::Pause);
    }

    /// Serve pull requests again.
    pub fn resume(&self) {
        let _ = self.control.send(WorkerCommand::Resume);
    }

    /// Cancel the active session. No-op without one.
    pub fn abort(&mut self) {
        if let Some((session, cancel)) = self.active.take() {
            cancel.store(true, Ordering::Relaxed);
            let _ = self.control.send(WorkerCommand::Abort { session });
        }
    }

    /// Abort and release the worker's engine.
    pub fn dispose(&mut self) {
        self.abort();
        let _ = self.control.send(WorkerCommand::Dispose);
    }

    /// Dispose and join the worker thread. Safe to call more than once.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.dispose();
        let _ = self.control.send(WorkerCommand::Shutdown);
        if thread.join().is_err() {
            log::error!("decoder thread panicked");
        }
    }

    fn send(&self, command: WorkerCommand) -> Result<()> {
        self.control
            .send(command)
            .map_err(|_| MsxPlayError::WorkerError("decoder thread is not running".into()))
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ActiveSession {
    id: u64,
    requests: Consumer<RenderRequest>,
    replies: Producer<DecodeReply>,
}

struct WorkerLoop {
    worker: DecoderWorker,
    control: Receiver<WorkerCommand>,
    session: Option<ActiveSession>,
    paused: bool,
    pool: Vec<Vec<i16>>,
}

impl WorkerLoop {
    fn new(worker: DecoderWorker, control: Receiver<WorkerCommand>) -> Self {
        Self {
            worker,
            control,
            session: None,
            paused: false,
            pool: Vec::with_capacity(BLOCK_POOL_SIZE),
        }
    }

    fn run(mut self) {
        loop {
            let wait = if self.session.is_some() && !self.paused {
                WORKER_POLL_INTERVAL
            } else {
                WORKER_IDLE_WAIT
            };
            match self.control.recv_timeout(wait) {
                Ok(command) => {
                    if !self.handle(command) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if !self.paused {
                self.serve_requests();
            }
        }
        self.worker.dispose();
        log::debug!("decoder worker stopped");
    }

    /// Returns `false` when the loop should exit.
    fn handle(&mut self, command: WorkerCommand) -> bool {
        match command {
            WorkerCommand::Start {
                session,
                args,
                song,
                requests,
                replies,
                cancel,
                reply,
            } => {
                self.session = None;
                self.paused = false;
                self.worker.set_cancel_flag(Some(cancel));
                let result = self.worker.start(&args, &song);
                if result.is_ok() {
                    self.session = Some(ActiveSession {
                        id: session,
                        requests,
                        replies,
                    });
                } else {
                    self.worker.set_cancel_flag(None);
                }
                let _ = reply.send(result);
            }
            WorkerCommand::Pause => self.paused = true,
            WorkerCommand::Resume => self.paused = false,
            WorkerCommand::Abort { session } => {
                if self.session.as_ref().is_some_and(|s| s.id == session) {
                    self.session = None;
                    self.worker.abort();
                    log::debug!("session {session} aborted");
                }
            }
            WorkerCommand::Dispose => {
                self.session = None;
                self.worker.dispose();
            }
            WorkerCommand::Shutdown => return false,
        }
        true
    }

    fn serve_requests(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        while let Ok(request) = session.requests.pop() {
            match request {
                RenderRequest::Recycle(block) => {
                    if self.pool.len() < BLOCK_POOL_SIZE {
                        self.pool.push(block);
                    }
                }
                RenderRequest::Pull { session: id } if id == session.id => {
                    let mut block = self.pool.pop().unwrap_or_default();
                    let started = Instant::now();
                    let reply = if self.worker.process_into(&mut block) {
                        DecodeReply::Block {
                            session: id,
                            samples: block,
                            decode_time: started.elapsed(),
                        }
                    } else {
                        if self.pool.len() < BLOCK_POOL_SIZE {
                            self.pool.push(block);
                        }
                        log::debug!("session {id} reached end of stream");
                        DecodeReply::End { session: id }
                    };
                    if session.replies.push(reply).is_err() {
                        log::warn!("reply queue full, dropping decoded block");
                    }
                }
                RenderRequest::Pull { session: id } => {
                    log::debug!("ignoring pull for stale session {id}");
                }
            }
        }
    }
}
