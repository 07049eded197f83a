use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::breakpoint::Breakpoint;
use crate::interpreter::{Interpreter, WaitFlags};
use crate::memory::LoadError;

/// Closure executed on the driver thread with exclusive access to the machine.
pub type Task = Box<dyn FnOnce(&mut Interpreter) + Send>;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("the emulator has been terminated")]
    Terminated,
    #[error("the emulator thread stopped before answering")]
    Disconnected,
    #[error("synchronous calls cannot be made from the emulator thread")]
    WouldBlock,
    #[error("the task panicked on the emulator thread")]
    Panicked,
    #[error(transparent)]
    Load(#[from] LoadError),
}

pub enum Command {
    Start,
    Stop,
    Step,
    Reset,
    Terminate,
    Run(Task),
    ChangeBreakpoints(BreakpointChange),
    KeyDown(u8),
    KeyUp(u8),
    /// One 60Hz timer pulse.
    Pulse,
    /// Throttle in `[0,1]`.
    SetSpeed(f32),
    /// Write a binary into memory and remember it, so `Reset` can load it again.
    Load {
        address: u16,
        bytes: Vec<u8>,
        reply: SyncSender<Result<(), LoadError>>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakpointChange {
    Add { breakpoint: Breakpoint, enabled: bool },
    Remove(Breakpoint),
    SetEnabled { breakpoint: Breakpoint, enabled: bool },
    ClearTemporary,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::Stop => write!(f, "Stop"),
            Self::Step => write!(f, "Step"),
            Self::Reset => write!(f, "Reset"),
            Self::Terminate => write!(f, "Terminate"),
            Self::Run(_) => write!(f, "Run(..)"),
            Self::ChangeBreakpoints(change) => write!(f, "ChangeBreakpoints({:?})", change),
            Self::KeyDown(key) => write!(f, "KeyDown({:x})", key),
            Self::KeyUp(key) => write!(f, "KeyUp({:x})", key),
            Self::Pulse => write!(f, "Pulse"),
            Self::SetSpeed(speed) => write!(f, "SetSpeed({})", speed),
            Self::Load { address, bytes, .. } => {
                write!(f, "Load {{ address: 0x{:03x}, len: {} }}", address, bytes.len())
            }
        }
    }
}

/// Create the two ends of a command queue.
///
/// With a `pulse_period`, [`CommandQueue::poll`] also yields [`Command::Pulse`] at that rate.
pub fn queue(pulse_period: Option<Duration>) -> (CommandSender, CommandQueue) {
    let (sender, receiver) = mpsc::channel();
    (
        CommandSender {
            sender,
            terminated: Arc::new(AtomicBool::new(false)),
        },
        CommandQueue {
            receiver,
            wait: WaitFlags::NONE,
            pulse_period,
            next_pulse: Instant::now(),
        },
    )
}

/// Submitting end, shared by any amount of threads.
#[derive(Clone, Debug)]
pub struct CommandSender {
    sender: Sender<Command>,
    terminated: Arc<AtomicBool>,
}

impl CommandSender {
    pub fn add(&self, command: Command) -> Result<(), DriverError> {
        if self.is_terminated() {
            return Err(DriverError::Terminated);
        }
        if matches!(command, Command::Terminate) {
            self.terminated.store(true, Ordering::SeqCst);
        }
        self.sender
            .send(command)
            .map_err(|_| DriverError::Disconnected)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// What the execution thread should do next.
#[derive(Debug)]
pub enum Polled {
    Command(Command),
    /// No command pending and nothing to wait for: keep ticking.
    Resume,
    /// Every sender is gone.
    Disconnected,
}

/// Receiving end, owned by the execution thread together with the wait flags.
///
/// Wait flags are only cleared by commands (key events, timer pulses), so blocking on the next
/// command covers "a command arrives" as well as "all wait flags clear".
#[derive(Debug)]
pub struct CommandQueue {
    receiver: Receiver<Command>,
    wait: WaitFlags,
    pulse_period: Option<Duration>,
    next_pulse: Instant,
}

impl CommandQueue {
    pub fn wait_flags(&self) -> WaitFlags {
        self.wait
    }

    pub fn set_wait_flags(&mut self, flags: WaitFlags) {
        self.wait = flags;
    }

    pub fn clear_wait_flags(&mut self) {
        self.wait = WaitFlags::NONE;
    }

    /// Block until a command arrives. `None` once every sender is gone.
    ///
    /// Never yields a pulse: timers do not run while nothing is executing.
    pub fn take(&mut self) -> Option<Command> {
        let command = self.receiver.recv().ok();
        self.restart_pulses();
        command
    }

    /// Pending command, if any, without blocking.
    pub fn try_take(&self) -> Option<Command> {
        self.receiver.try_recv().ok()
    }

    /// Next command if one is pending. Otherwise blocks while a wait flag is set.
    pub fn poll(&mut self) -> Polled {
        match self.receiver.try_recv() {
            Ok(command) => return Polled::Command(command),
            Err(TryRecvError::Disconnected) => return Polled::Disconnected,
            Err(TryRecvError::Empty) => (),
        }
        if self.pulse_due() {
            return Polled::Command(Command::Pulse);
        }
        if self.wait.is_empty() {
            return Polled::Resume;
        }
        let Some(period) = self.pulse_period else {
            return match self.receiver.recv() {
                Ok(command) => Polled::Command(command),
                Err(_) => Polled::Disconnected,
            };
        };
        let timeout = self.next_pulse.saturating_duration_since(Instant::now());
        match self.receiver.recv_timeout(timeout) {
            Ok(command) => Polled::Command(command),
            Err(RecvTimeoutError::Disconnected) => Polled::Disconnected,
            Err(RecvTimeoutError::Timeout) => {
                self.next_pulse += period;
                Polled::Command(Command::Pulse)
            }
        }
    }

    fn pulse_due(&mut self) -> bool {
        let Some(period) = self.pulse_period else {
            return false;
        };
        let now = Instant::now();
        if now < self.next_pulse {
            return false;
        }
        self.next_pulse += period;
        // Drop pulses missed while blocked elsewhere instead of bursting them out
        if self.next_pulse < now {
            self.next_pulse = now + period;
        }
        true
    }

    fn restart_pulses(&mut self) {
        if let Some(period) = self.pulse_period {
            self.next_pulse = Instant::now() + period;
        }
    }
}
