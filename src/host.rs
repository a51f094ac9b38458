//! # Host Simulation Backend
//!
//! One OS thread per core owns that core's [`CoreState`] and serves requests
//! arriving on its inbox channel. A calling context holds a [`HostPort`]:
//! it posts a request, then blocks on the port's completion event until the
//! kernel thread that finished the request signals it.
//!
//! ```text
//!  task thread            core 0 thread                 core 1 thread
//!  ───────────            ─────────────                 ─────────────
//!  invoke ──Call──────►   serve
//!    │ wait                 ├─ Done ─► complete ──┐
//!    │                      └─ Forward ──Call───────►  serve as Remote(0)
//!    │                                            │      └─► complete
//!    ◄────────────────────────────────────────────┘
//! ```
//!
//! A cross-core `ChainTask` takes one more hop: the owner's status goes back
//! to the calling core as `Chained`, which ends the calling task only if the
//! successor was activated, and then completes the call.
//!
//! Each core's inbox is a single FIFO channel, so requests from one source
//! core to one destination core keep their order.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::vec::Vec;

use crate::bridge::Bridge;
use crate::config::KernelConfig;
use crate::error::{ConfigError, OsError};
use crate::kernel::{CoreState, Kernel};
use crate::syscall::{Caller, Hints, Reply, Served, SyscallRequest};
use crate::types::{AppMode, CoreId, TaskId};

/// One-shot reply slot plus the event that signals it.
#[derive(Debug, Default)]
pub struct Completion {
    slot: Mutex<Option<Reply>>,
    ready: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self, reply: Reply) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(reply);
        self.ready.notify_one();
    }

    /// Block until a reply is available and take it.
    pub fn wait(&self) -> Reply {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(reply) = slot.take() {
                return reply;
            }
            slot = self.ready.wait(slot).unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// A request on its way to a kernel thread.
struct Envelope {
    caller: Caller,
    request: SyscallRequest,
    /// Core the request entered the system on.
    origin: CoreId,
    /// `None` for fire-and-forget work from an outbox.
    completion: Option<Arc<Completion>>,
    /// Set on the activation half of a cross-core `ChainTask`.
    chain: Option<PendingChain>,
}

/// A `ChainTask` waiting on its calling core for the owner's answer.
#[derive(Debug, Clone, Copy)]
struct PendingChain {
    core: CoreId,
    caller: Caller,
    request: SyscallRequest,
    task: TaskId,
}

enum Message {
    Call(Envelope),
    Chained {
        chain: PendingChain,
        status: Result<usize, OsError>,
        completion: Option<Arc<Completion>>,
    },
    Stop,
}

/// A started system with one kernel thread per core.
pub struct HostSystem {
    config: &'static KernelConfig,
    inboxes: Vec<Sender<Message>>,
    threads: Vec<JoinHandle<CoreState>>,
}

impl HostSystem {
    /// Validate `config`, run `StartOS(mode)` and spawn the kernel threads.
    pub fn start(config: &'static KernelConfig, mode: AppMode) -> Result<Self, ConfigError> {
        let mut kernel = Kernel::new(config)?;
        kernel.start_os(mode);

        let (inboxes, receivers): (Vec<_>, Vec<_>) =
            (0..config.cores).map(|_| mpsc::channel::<Message>()).unzip();
        let mut threads = Vec::with_capacity(config.cores);
        for (core, inbox) in kernel.into_cores().into_iter().zip(receivers) {
            let id = core.id();
            let peers = inboxes.clone();
            let thread = thread::Builder::new()
                .name(std::format!("ecuos-core{}", id.index()))
                .spawn(move || serve_core(core, inbox, peers));
            match thread {
                Ok(thread) => threads.push(thread),
                Err(error) => {
                    log::error!("{}: failed to spawn kernel thread: {}", id, error);
                    return Err(ConfigError::HostThread(id));
                }
            }
        }
        log::info!("host system started with {} cores", config.cores);
        Ok(Self {
            config,
            inboxes,
            threads,
        })
    }

    pub fn config(&self) -> &'static KernelConfig {
        self.config
    }

    /// A syscall port for one calling context.
    pub fn port(&self) -> HostPort {
        HostPort {
            inboxes: self.inboxes.clone(),
            completion: Arc::new(Completion::new()),
        }
    }

    /// Stop every kernel thread and hand back the final core states.
    pub fn shutdown(mut self) -> Vec<CoreState> {
        self.stop()
    }

    fn stop(&mut self) -> Vec<CoreState> {
        for inbox in &self.inboxes {
            let _ = inbox.send(Message::Stop);
        }
        self.threads
            .drain(..)
            .filter_map(|thread| match thread.join() {
                Ok(core) => Some(core),
                Err(_) => {
                    log::error!("kernel thread panicked");
                    None
                }
            })
            .collect()
    }
}

impl Drop for HostSystem {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.stop();
        }
    }
}

/// Per-context syscall port: posts a request and waits for its completion.
pub struct HostPort {
    inboxes: Vec<Sender<Message>>,
    completion: Arc<Completion>,
}

impl Bridge for HostPort {
    fn invoke(&mut self, core: CoreId, caller: Caller, request: SyscallRequest) -> Reply {
        let Some(inbox) = self.inboxes.get(core.index()) else {
            return Reply {
                status: Err(OsError::Core),
                hints: Hints::empty(),
            };
        };
        let envelope = Envelope {
            caller,
            request,
            origin: core,
            completion: Some(Arc::clone(&self.completion)),
            chain: None,
        };
        if inbox.send(Message::Call(envelope)).is_err() {
            log::warn!("{}: kernel thread is gone", core);
            return Reply {
                status: Err(OsError::State),
                hints: Hints::empty(),
            };
        }
        self.completion.wait()
    }
}

/// Body of a kernel thread.
fn serve_core(mut core: CoreState, inbox: Receiver<Message>, peers: Vec<Sender<Message>>) -> CoreState {
    log::debug!("{}: kernel thread running", core.id());
    while let Ok(message) = inbox.recv() {
        match message {
            Message::Stop => break,
            Message::Call(envelope) => serve_envelope(&mut core, envelope, &peers),
            Message::Chained {
                chain,
                status,
                completion,
            } => {
                let status = core.complete_forwarded(chain.caller, &chain.request, Some(chain.task), status);
                if let Some(completion) = completion {
                    completion.complete(Reply {
                        status,
                        hints: core.hints(),
                    });
                }
            }
        }
        while let Some(message) = core.outbox.pop() {
            let work = Envelope {
                caller: Caller::Remote(message.from),
                request: message.request,
                origin: message.from,
                completion: None,
                chain: None,
            };
            send(&peers, message.to, work);
        }
    }
    log::debug!("{}: kernel thread stopped", core.id());
    core
}

fn serve_envelope(core: &mut CoreState, envelope: Envelope, peers: &[Sender<Message>]) {
    match core.serve(envelope.caller, &envelope.request) {
        Served::Done(reply) => {
            if let Some(chain) = envelope.chain {
                let answer = Message::Chained {
                    chain,
                    status: reply.status,
                    completion: envelope.completion,
                };
                let delivered = match peers.get(chain.core.index()) {
                    Some(peer) => peer.send(answer).map_err(|error| error.0),
                    None => Err(answer),
                };
                if let Err(Message::Chained {
                    completion: Some(completion),
                    ..
                }) = delivered
                {
                    log::warn!("{} is not reachable", chain.core);
                    completion.complete(Reply {
                        status: Err(OsError::Core),
                        hints: Hints::empty(),
                    });
                }
            } else if let Some(completion) = &envelope.completion {
                // The originating core's hints are not ours to report.
                let hints = if envelope.origin == core.id() {
                    reply.hints
                } else {
                    Hints::empty()
                };
                completion.complete(Reply {
                    status: reply.status,
                    hints,
                });
            } else if let Err(error) = reply.status {
                log::warn!(
                    "{}: {:?} from {:?} failed: {}",
                    core.id(),
                    envelope.request.service,
                    envelope.caller,
                    error
                );
            }
        }
        Served::Forward {
            core: owner,
            request,
            chained,
        } => {
            let chain = chained.map(|task| PendingChain {
                core: core.id(),
                caller: envelope.caller,
                request: envelope.request,
                task,
            });
            let forwarded = Envelope {
                caller: Caller::Remote(core.id()),
                request,
                origin: envelope.origin,
                completion: envelope.completion,
                chain,
            };
            send(peers, owner, forwarded);
        }
    }
}

fn send(peers: &[Sender<Message>], to: CoreId, envelope: Envelope) {
    let completion = envelope.completion.clone();
    let delivered = peers
        .get(to.index())
        .is_some_and(|peer| peer.send(Message::Call(envelope)).is_ok());
    if !delivered {
        log::warn!("{} is not reachable", to);
        if let Some(completion) = completion {
            completion.complete(Reply {
                status: Err(OsError::Core),
                hints: Hints::empty(),
            });
        }
    }
}
