use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crate::breakpoint::{Breakpoint, BreakpointState, Breakpoints};
use crate::command::{
    self, BreakpointChange, Command, CommandQueue, CommandSender, DriverError, Polled,
};
use crate::config::DriverConfig;
use crate::dprintln;
use crate::interpreter::{Fault, Interpreter};
use crate::screen::DisplaySink;
use crate::timer::TIMER_HZ;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    /// Executing the single tick of a `Step`.
    Stepping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reason {
    Started,
    Stopped,
    StoppedBreakpoint,
}

/// Payload of a state-change notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateChange {
    pub state: RunState,
    pub reason: Reason,
    pub pc: u16,
    /// Set when execution stopped because of a fault.
    pub fault: Option<Fault>,
}

type TickListener = Arc<dyn Fn(&Interpreter) + Send + Sync>;
type StateListener = Arc<dyn Fn(&StateChange) + Send + Sync>;
type BreakpointListener = Arc<dyn Fn(&Breakpoints) + Send + Sync>;
type ShutdownHook = Box<dyn FnOnce() + Send>;

/// Registered callbacks. Registration may happen from any thread; invocation iterates over a
/// snapshot, always on the driver thread.
#[derive(Default)]
struct Listeners {
    tick: RwLock<Vec<TickListener>>,
    state: RwLock<Vec<StateListener>>,
    breakpoint: RwLock<Vec<BreakpointListener>>,
    shutdown: Mutex<Vec<ShutdownHook>>,
}

fn snapshot<T: Clone>(list: &RwLock<Vec<T>>) -> Vec<T> {
    list.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn push<T>(list: &RwLock<Vec<T>>, item: T) {
    list.write()
        .unwrap_or_else(PoisonError::into_inner)
        .push(item);
}

/// Run a callback, logging instead of unwinding through the driver thread.
///
/// `None` if the callback panicked.
fn guarded<R>(kind: &str, callback: impl FnOnce() -> R) -> Option<R> {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(result) => Some(result),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            dprintln!(Always, Error, "A {} panicked: {}", kind, message);
            None
        }
    }
}

/// Calibrated busy-loop throttle. Not a real-time scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Throttle {
    delay_iterations: u32,
    notify_interval: u32,
}

impl Throttle {
    const MAX_DELAY_ITERATIONS: f32 = 400_000.0;
    const MAX_NOTIFY_INTERVAL: f32 = 2_000.0;

    /// `1.0` spins as little as possible and notifies rarely, `0.0` spins longest and notifies
    /// on every tick.
    pub fn from_speed(speed: f32) -> Self {
        let speed = if speed.is_nan() {
            1.0
        } else {
            speed.clamp(0.0, 1.0)
        };
        let slowness = 1.0 - speed;
        Throttle {
            delay_iterations: (slowness * slowness * Self::MAX_DELAY_ITERATIONS) as u32,
            notify_interval: 1 + (speed * (Self::MAX_NOTIFY_INTERVAL - 1.0)) as u32,
        }
    }

    pub fn delay_iterations(&self) -> u32 {
        self.delay_iterations
    }

    /// Ticks between two tick notifications.
    pub fn notify_interval(&self) -> u32 {
        self.notify_interval
    }

    fn delay(&self) {
        for _ in 0..self.delay_iterations {
            std::hint::spin_loop();
        }
    }
}

/// Owns the machine and runs it on a dedicated thread.
///
/// Every mutation of machine state happens on that thread, in the order commands were queued.
pub struct Emulator {
    interpreter: Interpreter,
    queue: CommandQueue,
    breakpoints: Arc<Breakpoints>,
    listeners: Arc<Listeners>,
    display: Option<Box<dyn DisplaySink>>,
    state: RunState,
    throttle: Throttle,
    /// Set by `Start` so the first cycle can leave a breakpoint it is parked on.
    skip_breakpoint: bool,
    ticks_since_notify: u32,
    /// Last loaded binary, written again after every reset.
    program: Option<(u16, Vec<u8>)>,
}

/// Cheap to clone. Every method may be called from any thread except the driver thread itself,
/// where the synchronous ones would never return.
#[derive(Clone)]
pub struct EmulatorHandle {
    sender: CommandSender,
    breakpoints: Arc<Breakpoints>,
    listeners: Arc<Listeners>,
    thread_id: ThreadId,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Emulator {
    pub fn spawn(config: DriverConfig) -> io::Result<EmulatorHandle> {
        Self::spawn_inner(config, None)
    }

    pub fn spawn_with_display(
        config: DriverConfig,
        display: impl DisplaySink + 'static,
    ) -> io::Result<EmulatorHandle> {
        Self::spawn_inner(config, Some(Box::new(display)))
    }

    fn spawn_inner(
        config: DriverConfig,
        display: Option<Box<dyn DisplaySink>>,
    ) -> io::Result<EmulatorHandle> {
        let pulse_period = config
            .timer_pulse
            .then(|| Duration::from_secs(1) / TIMER_HZ);
        let (sender, queue) = command::queue(pulse_period);
        let breakpoints = Arc::new(Breakpoints::new());
        let listeners = Arc::new(Listeners::default());

        let emulator = Emulator {
            interpreter: Interpreter::new(config.machine),
            queue,
            breakpoints: Arc::clone(&breakpoints),
            listeners: Arc::clone(&listeners),
            display,
            state: RunState::Stopped,
            throttle: Throttle::from_speed(config.speed),
            skip_breakpoint: false,
            ticks_since_notify: 0,
            program: None,
        };
        let thread = thread::Builder::new()
            .name("chisel-emulator".to_string())
            .spawn(move || emulator.run())?;

        Ok(EmulatorHandle {
            sender,
            breakpoints,
            listeners,
            thread_id: thread.thread().id(),
            thread: Arc::new(Mutex::new(Some(thread))),
        })
    }

    fn run(mut self) {
        loop {
            let command = match self.state {
                RunState::Running => match self.queue.poll() {
                    Polled::Command(command) => Some(command),
                    Polled::Resume => None,
                    Polled::Disconnected => break,
                },
                RunState::Stopped | RunState::Stepping => match self.queue.take() {
                    Some(command) => Some(command),
                    None => break,
                },
            };
            match command {
                Some(Command::Terminate) => break,
                Some(command) => self.apply(command),
                None => self.cycle(),
            }
        }
        self.terminate();
    }

    /// One iteration of the running loop: breakpoint check, tick, notification, throttle.
    fn cycle(&mut self) {
        let pc = self.interpreter.pc();
        if !std::mem::take(&mut self.skip_breakpoint) {
            if let Some(breakpoint) = self.breakpoints.enabled_at(pc) {
                if breakpoint.is_temporary {
                    self.breakpoints.remove(breakpoint);
                    self.notify_breakpoints();
                }
                dprintln!(
                    Always,
                    Warning,
                    "Reached breakpoint at 0x{:03x}. Pausing execution.",
                    pc
                );
                self.stop(Reason::StoppedBreakpoint, None);
                return;
            }
        }

        if let Err(fault) = self.interpreter.tick() {
            self.fault(fault);
            return;
        }
        self.sync_wait_flags();

        self.ticks_since_notify += 1;
        if self.ticks_since_notify >= self.throttle.notify_interval() {
            self.notify_tick();
        }
        self.throttle.delay();
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Start => {
                if self.state != RunState::Running {
                    self.state = RunState::Running;
                    self.skip_breakpoint = true;
                    self.sync_wait_flags();
                    self.notify_state(Reason::Started, None);
                }
            }
            Command::Stop => {
                if self.state == RunState::Running {
                    self.stop(Reason::Stopped, None);
                }
            }
            Command::Step => {
                self.state = RunState::Stepping;
                let result = self.interpreter.tick();
                self.sync_wait_flags();
                match result {
                    Ok(()) => self.stop(Reason::Stopped, None),
                    Err(fault) => self.fault(fault),
                }
            }
            Command::Reset => {
                if self.state == RunState::Running {
                    self.state = RunState::Stopped;
                    self.notify_state(Reason::Stopped, None);
                }
                let had_temporary = self
                    .breakpoints
                    .snapshot()
                    .iter()
                    .any(|(breakpoint, _)| breakpoint.is_temporary);
                self.breakpoints.clear_temporary();
                if had_temporary {
                    self.notify_breakpoints();
                }
                self.interpreter.reset();
                if let Some((address, bytes)) = &self.program {
                    if let Err(err) = self.interpreter.memory_mut().load(*address, bytes) {
                        dprintln!(Always, Error, "Failed to reload program: {}", err);
                    }
                }
                self.queue.clear_wait_flags();
                dprintln!(Sometimes, Warning, "Reset machine to initial state.");
                self.notify_tick();
            }
            Command::Terminate => unreachable!("terminate is handled by the run loop"),
            Command::Run(task) => {
                let interpreter = &mut self.interpreter;
                guarded("task", || task(interpreter));
                self.sync_wait_flags();
            }
            Command::ChangeBreakpoints(change) => {
                match change {
                    BreakpointChange::Add {
                        breakpoint,
                        enabled,
                    } => self.breakpoints.add(breakpoint, enabled),
                    BreakpointChange::Remove(breakpoint) => {
                        self.breakpoints.remove(breakpoint);
                    }
                    BreakpointChange::SetEnabled {
                        breakpoint,
                        enabled,
                    } => self.breakpoints.set_enabled(breakpoint, enabled),
                    BreakpointChange::ClearTemporary => self.breakpoints.clear_temporary(),
                }
                self.notify_breakpoints();
            }
            Command::KeyDown(key) => {
                self.interpreter.keyboard_mut().press(key);
                self.interpreter.key_pressed(key);
                self.sync_wait_flags();
            }
            Command::KeyUp(key) => {
                self.interpreter.keyboard_mut().release(key);
                self.interpreter.key_released(key);
                self.sync_wait_flags();
            }
            Command::Pulse => {
                self.interpreter.pulse_timers();
                self.sync_wait_flags();
            }
            Command::SetSpeed(speed) => {
                self.throttle = Throttle::from_speed(speed);
                dprintln!(
                    Sometimes,
                    Info,
                    "Throttle set to {} delay iterations, notifying every {} ticks.",
                    self.throttle.delay_iterations(),
                    self.throttle.notify_interval()
                );
            }
            Command::Load {
                address,
                bytes,
                reply,
            } => {
                let result = self.interpreter.memory_mut().load(address, &bytes);
                if result.is_ok() {
                    dprintln!(
                        Sometimes,
                        Info,
                        "Loaded {} bytes at 0x{:03x}.",
                        bytes.len(),
                        address
                    );
                    self.program = Some((address, bytes));
                }
                // Caller may have given up waiting
                let _ = reply.send(result);
            }
        }
    }

    fn stop(&mut self, reason: Reason, fault: Option<Fault>) {
        self.state = RunState::Stopped;
        self.notify_tick();
        self.notify_state(reason, fault);
    }

    fn fault(&mut self, fault: Fault) {
        dprintln!(Always, Error, "Execution stopped: {}.", fault);
        self.stop(Reason::Stopped, Some(fault));
    }

    /// Drain what is left, then say goodbye.
    fn terminate(&mut self) {
        while let Some(command) = self.queue.try_take() {
            match command {
                Command::Terminate => (),
                command => self.apply(command),
            }
        }
        self.state = RunState::Stopped;
        self.notify_state(Reason::Stopped, None);

        let hooks = std::mem::take(
            &mut *self
                .listeners
                .shutdown
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for hook in hooks {
            guarded("shutdown hook", hook);
        }
        dprintln!(Sometimes, Info, "Emulator terminated.");
    }

    fn sync_wait_flags(&mut self) {
        self.queue.set_wait_flags(self.interpreter.wait_flags());
    }

    fn notify_tick(&mut self) {
        self.ticks_since_notify = 0;
        if let Some(display) = self.display.as_mut() {
            if self.interpreter.screen().is_dirty() {
                let frame = self.interpreter.screen_mut().take_frame();
                guarded("display sink", || display.present(&frame));
            }
        }
        for listener in snapshot(&self.listeners.tick) {
            guarded("tick listener", || listener(&self.interpreter));
        }
    }

    fn notify_state(&mut self, reason: Reason, fault: Option<Fault>) {
        let change = StateChange {
            state: self.state,
            reason,
            pc: self.interpreter.pc(),
            fault,
        };
        dprintln!(
            Sometimes,
            Info,
            "State changed to {:?} ({:?}) at 0x{:03x}.",
            change.state,
            change.reason,
            change.pc
        );
        for listener in snapshot(&self.listeners.state) {
            guarded("state listener", || listener(&change));
        }
    }

    fn notify_breakpoints(&self) {
        for listener in snapshot(&self.listeners.breakpoint) {
            guarded("breakpoint listener", || listener(&self.breakpoints));
        }
    }
}

impl EmulatorHandle {
    fn send(&self, command: Command) -> Result<(), DriverError> {
        self.sender.add(command)
    }

    pub fn start(&self) -> Result<(), DriverError> {
        self.send(Command::Start)
    }

    pub fn stop(&self) -> Result<(), DriverError> {
        self.send(Command::Stop)
    }

    pub fn step(&self) -> Result<(), DriverError> {
        self.send(Command::Step)
    }

    pub fn reset(&self) -> Result<(), DriverError> {
        self.send(Command::Reset)
    }

    /// Ask the driver to finish. Every later submission fails with [`DriverError::Terminated`].
    pub fn terminate(&self) -> Result<(), DriverError> {
        self.send(Command::Terminate)
    }

    pub fn is_terminated(&self) -> bool {
        self.sender.is_terminated()
    }

    pub fn key_down(&self, key: u8) -> Result<(), DriverError> {
        self.send(Command::KeyDown(key))
    }

    pub fn key_up(&self, key: u8) -> Result<(), DriverError> {
        self.send(Command::KeyUp(key))
    }

    /// Deliver one timer pulse by hand, in any state.
    pub fn pulse(&self) -> Result<(), DriverError> {
        self.send(Command::Pulse)
    }

    pub fn set_speed(&self, speed: f32) -> Result<(), DriverError> {
        self.send(Command::SetSpeed(speed))
    }

    /// Queue `task` to run on the driver thread.
    pub fn run<F>(&self, task: F) -> Result<(), DriverError>
    where
        F: FnOnce(&mut Interpreter) + Send + 'static,
    {
        self.send(Command::Run(Box::new(task)))
    }

    /// Run `task` on the driver thread and wait for its result.
    pub fn run_sync<F, R>(&self, task: F) -> Result<R, DriverError>
    where
        F: FnOnce(&mut Interpreter) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.ensure_not_driver_thread()?;
        let (reply, result) = mpsc::sync_channel(1);
        self.run(move |interpreter| {
            let _ = reply.send(guarded("task", || task(interpreter)));
        })?;
        result
            .recv()
            .map_err(|_| DriverError::Disconnected)?
            .ok_or(DriverError::Panicked)
    }

    /// Write `bytes` into memory at `address` and keep them for later resets.
    pub fn load(&self, address: u16, bytes: Vec<u8>) -> Result<(), DriverError> {
        self.ensure_not_driver_thread()?;
        let (reply, result) = mpsc::sync_channel(1);
        self.send(Command::Load {
            address,
            bytes,
            reply,
        })?;
        Ok(result.recv().map_err(|_| DriverError::Disconnected)??)
    }

    pub fn load_from(&self, reader: &mut impl io::Read, address: u16) -> Result<(), DriverError> {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(crate::memory::LoadError::from)?;
        self.load(address, bytes)
    }

    pub fn add_breakpoint(&self, breakpoint: Breakpoint, enabled: bool) -> Result<(), DriverError> {
        self.send(Command::ChangeBreakpoints(BreakpointChange::Add {
            breakpoint,
            enabled,
        }))
    }

    pub fn remove_breakpoint(&self, breakpoint: Breakpoint) -> Result<(), DriverError> {
        self.send(Command::ChangeBreakpoints(BreakpointChange::Remove(
            breakpoint,
        )))
    }

    pub fn set_breakpoint_enabled(
        &self,
        breakpoint: Breakpoint,
        enabled: bool,
    ) -> Result<(), DriverError> {
        self.send(Command::ChangeBreakpoints(BreakpointChange::SetEnabled {
            breakpoint,
            enabled,
        }))
    }

    pub fn clear_temporary_breakpoints(&self) -> Result<(), DriverError> {
        self.send(Command::ChangeBreakpoints(BreakpointChange::ClearTemporary))
    }

    /// Current view of the breakpoints. Changes still queued are not reflected.
    pub fn breakpoint_state(&self, breakpoint: Breakpoint) -> BreakpointState {
        self.breakpoints.state(breakpoint)
    }

    pub fn breakpoints(&self) -> Vec<(Breakpoint, bool)> {
        self.breakpoints.snapshot()
    }

    pub fn on_tick(&self, listener: impl Fn(&Interpreter) + Send + Sync + 'static) {
        push(&self.listeners.tick, Arc::new(listener) as TickListener);
    }

    pub fn on_state_change(&self, listener: impl Fn(&StateChange) + Send + Sync + 'static) {
        push(&self.listeners.state, Arc::new(listener) as StateListener);
    }

    pub fn on_breakpoints_changed(&self, listener: impl Fn(&Breakpoints) + Send + Sync + 'static) {
        push(
            &self.listeners.breakpoint,
            Arc::new(listener) as BreakpointListener,
        );
    }

    /// Runs once on the driver thread, after the final `Stopped` notification.
    pub fn on_shutdown(&self, hook: impl FnOnce() + Send + 'static) {
        self.listeners
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    /// Wait for the driver thread to exit. Only the first caller actually joins.
    pub fn join(&self) {
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                dprintln!(Always, Error, "Emulator thread panicked.");
            }
        }
    }

    fn ensure_not_driver_thread(&self) -> Result<(), DriverError> {
        if thread::current().id() == self.thread_id {
            return Err(DriverError::WouldBlock);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::interpreter::WaitFlags;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::Receiver;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn spawn() -> EmulatorHandle {
        Emulator::spawn(DriverConfig {
            machine: MachineConfig::default(),
            speed: 1.0,
            timer_pulse: false,
        })
        .unwrap()
    }

    fn state_changes(handle: &EmulatorHandle) -> Receiver<StateChange> {
        let (sender, receiver) = mpsc::channel();
        let sender = Mutex::new(sender);
        handle.on_state_change(move |change| {
            let _ = sender.lock().unwrap().send(*change);
        });
        receiver
    }

    fn next(changes: &Receiver<StateChange>) -> StateChange {
        changes.recv_timeout(TIMEOUT).expect("no state change")
    }

    /// Poll the driver until `condition` holds.
    fn wait_until(handle: &EmulatorHandle, condition: fn(&Interpreter) -> bool) {
        let deadline = std::time::Instant::now() + TIMEOUT;
        while !handle.run_sync(move |machine| condition(machine)).unwrap() {
            assert!(std::time::Instant::now() < deadline, "condition never held");
            thread::sleep(Duration::from_millis(1));
        }
    }

    // LD V0, 1 ; LD V1, 2 ; JP 0x204
    const PROGRAM: [u8; 6] = [0x60, 0x01, 0x61, 0x02, 0x12, 0x04];

    // loop: LD V0, DT ; SE V0, 0 ; JP loop ; LD V1, 1
    const DELAY_LOOP: [u8; 8] = [0xF0, 0x07, 0x30, 0x00, 0x12, 0x00, 0x61, 0x01];

    #[test]
    fn throttle_mapping() {
        let fast = Throttle::from_speed(1.0);
        let slow = Throttle::from_speed(0.0);
        assert_eq!(fast.delay_iterations(), 0);
        assert_eq!(slow.notify_interval(), 1);
        assert!(slow.delay_iterations() > fast.delay_iterations());
        assert!(fast.notify_interval() > slow.notify_interval());
        assert_eq!(Throttle::from_speed(7.0), fast);
        assert_eq!(Throttle::from_speed(f32::NAN), fast);
    }

    #[test]
    fn run_sync_reads_state() {
        let handle = spawn();
        handle.load(0x200, PROGRAM.to_vec()).unwrap();
        let pc = handle.run_sync(|machine| machine.pc()).unwrap();
        assert_eq!(pc, 0x200);
        let word = handle.run_sync(|machine| machine.memory().word(0x202)).unwrap();
        assert_eq!(word, 0x6102);
        handle.terminate().unwrap();
        handle.join();
    }

    #[test]
    fn step_executes_one_tick() {
        let handle = spawn();
        let changes = state_changes(&handle);
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        handle.on_tick(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.load(0x200, PROGRAM.to_vec()).unwrap();
        handle.step().unwrap();

        let change = next(&changes);
        assert_eq!(change.state, RunState::Stopped);
        assert_eq!(change.reason, Reason::Stopped);
        assert_eq!(change.pc, 0x202);
        let registers = handle.run_sync(|machine| *machine.registers()).unwrap();
        assert_eq!(registers[0], 1);
        assert_eq!(registers[1], 0);
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        handle.terminate().unwrap();
        handle.join();
    }

    #[test]
    fn breakpoint_stops_once() {
        let handle = spawn();
        let changes = state_changes(&handle);
        handle.load(0x200, PROGRAM.to_vec()).unwrap();
        handle
            .add_breakpoint(Breakpoint::persistent(0x202), true)
            .unwrap();
        handle.start().unwrap();

        assert_eq!(next(&changes).reason, Reason::Started);
        let change = next(&changes);
        assert_eq!(change.reason, Reason::StoppedBreakpoint);
        assert_eq!(change.pc, 0x202);

        // Resuming leaves the breakpoint behind
        handle.start().unwrap();
        assert_eq!(next(&changes).reason, Reason::Started);
        wait_until(&handle, |machine| machine.registers()[1] == 2);
        handle.stop().unwrap();
        let change = next(&changes);
        assert_eq!(change.reason, Reason::Stopped);
        assert_eq!(change.pc, 0x204);
        assert_eq!(handle.run_sync(|machine| machine.registers()[1]).unwrap(), 2);

        handle.terminate().unwrap();
        handle.join();
        assert!(changes
            .try_iter()
            .all(|change| change.reason != Reason::StoppedBreakpoint));
    }

    #[test]
    fn step_leaves_breakpoint() {
        let handle = spawn();
        let changes = state_changes(&handle);
        handle.load(0x200, PROGRAM.to_vec()).unwrap();
        handle
            .add_breakpoint(Breakpoint::persistent(0x202), true)
            .unwrap();
        handle.start().unwrap();
        assert_eq!(next(&changes).reason, Reason::Started);
        let change = next(&changes);
        assert_eq!(change.reason, Reason::StoppedBreakpoint);
        assert_eq!(change.pc, 0x202);

        handle.step().unwrap();
        let change = next(&changes);
        assert_eq!(change.state, RunState::Stopped);
        assert_eq!(change.reason, Reason::Stopped);
        assert_eq!(change.pc, 0x204);
        assert_eq!(handle.run_sync(|machine| machine.registers()[1]).unwrap(), 2);

        handle.terminate().unwrap();
        handle.join();
        assert!(changes
            .try_iter()
            .all(|change| change.reason != Reason::StoppedBreakpoint));
    }

    #[test]
    fn disabled_and_temporary_breakpoints() {
        let handle = spawn();
        let changes = state_changes(&handle);
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        handle.on_breakpoints_changed(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.load(0x200, PROGRAM.to_vec()).unwrap();
        handle
            .add_breakpoint(Breakpoint::persistent(0x202), false)
            .unwrap();
        handle
            .add_breakpoint(Breakpoint::temporary(0x204), true)
            .unwrap();
        handle.start().unwrap();

        assert_eq!(next(&changes).reason, Reason::Started);
        let change = next(&changes);
        assert_eq!(change.reason, Reason::StoppedBreakpoint);
        assert_eq!(change.pc, 0x204);

        // Temporary breakpoint is gone once hit
        handle.run_sync(|_| ()).unwrap();
        assert_eq!(
            handle.breakpoint_state(Breakpoint::temporary(0x204)),
            BreakpointState::Unknown
        );
        assert_eq!(
            handle.breakpoint_state(Breakpoint::persistent(0x202)),
            BreakpointState::Disabled
        );
        assert_eq!(notified.load(Ordering::SeqCst), 3);
        handle.terminate().unwrap();
        handle.join();
    }

    #[test]
    fn reset_clears_temporary_breakpoints_and_reloads() {
        let handle = spawn();
        handle.load(0x200, PROGRAM.to_vec()).unwrap();
        handle
            .add_breakpoint(Breakpoint::temporary(0x300), true)
            .unwrap();
        handle
            .add_breakpoint(Breakpoint::persistent(0x302), true)
            .unwrap();
        handle.step().unwrap();
        handle.reset().unwrap();

        let (pc, word) = handle
            .run_sync(|machine| (machine.pc(), machine.memory().word(0x200)))
            .unwrap();
        assert_eq!(pc, 0x200);
        assert_eq!(word, 0x6001);
        assert_eq!(
            handle.breakpoints(),
            vec![(Breakpoint::persistent(0x302), true)]
        );
        handle.terminate().unwrap();
        handle.join();
    }

    #[test]
    fn fault_stops_execution() {
        let handle = spawn();
        let changes = state_changes(&handle);
        handle.load(0x200, vec![0x60, 0x01, 0xFF, 0xFF]).unwrap();
        handle.start().unwrap();
        assert_eq!(next(&changes).reason, Reason::Started);
        let change = next(&changes);
        assert_eq!(change.state, RunState::Stopped);
        assert_eq!(
            change.fault,
            Some(Fault::IllegalInstruction {
                address: 0x202,
                opcode: 0xFFFF
            })
        );
        assert_eq!(change.pc, 0x202);
        handle.terminate().unwrap();
        handle.join();
    }

    #[test]
    fn key_wait_resumes_on_key_events() {
        let handle = spawn();
        let changes = state_changes(&handle);
        // LD V5, K ; LD V6, 1 ; JP 0x204
        handle
            .load(0x200, vec![0xF5, 0x0A, 0x66, 0x01, 0x12, 0x04])
            .unwrap();
        handle.start().unwrap();
        assert_eq!(next(&changes).reason, Reason::Started);

        let deadline = std::time::Instant::now() + TIMEOUT;
        while !handle
            .run_sync(|machine| machine.wait_flags().contains(WaitFlags::KEY_PRESS))
            .unwrap()
        {
            assert!(std::time::Instant::now() < deadline, "never waited for a key");
            thread::sleep(Duration::from_millis(1));
        }
        handle.key_down(0xC).unwrap();
        handle.key_up(0xC).unwrap();
        loop {
            let v6 = handle.run_sync(|machine| machine.registers()[6]).unwrap();
            if v6 == 1 || std::time::Instant::now() > deadline {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        let registers = handle.run_sync(|machine| *machine.registers()).unwrap();
        assert_eq!(registers[5], 0xC);
        assert_eq!(registers[6], 1);
        handle.terminate().unwrap();
        handle.join();
    }

    #[test]
    fn terminate_drains_and_rejects() {
        let handle = spawn();
        let changes = state_changes(&handle);
        let shut_down = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&shut_down);
        handle.on_shutdown(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);

        handle.terminate().unwrap();
        assert!(matches!(
            handle.run(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Err(DriverError::Terminated)
        ));
        assert!(handle.is_terminated());
        assert!(matches!(handle.start(), Err(DriverError::Terminated)));
        handle.join();

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(shut_down.load(Ordering::SeqCst), 1);
        assert_eq!(next(&changes).reason, Reason::Stopped);
    }

    #[test]
    fn queued_commands_run_before_exit() {
        let handle = spawn();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = Arc::clone(&ran);
            handle
                .run(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        handle.terminate().unwrap();
        handle.join();
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_listener_does_not_kill_driver() {
        let handle = spawn();
        handle.on_tick(|_| panic!("listener failure"));
        handle.load(0x200, PROGRAM.to_vec()).unwrap();
        handle.step().unwrap();
        assert_eq!(handle.run_sync(|machine| machine.pc()).unwrap(), 0x202);
        handle.terminate().unwrap();
        handle.join();
    }

    #[test]
    fn display_receives_frames() {
        let (sender, frames) = mpsc::channel();
        let handle = Emulator::spawn_with_display(
            DriverConfig {
                timer_pulse: false,
                ..DriverConfig::default()
            },
            move |frame: &crate::screen::Frame| {
                let _ = sender.send(frame.lit());
            },
        )
        .unwrap();
        // LD F, V0 ; DRW V0, V0, 5
        handle.load(0x200, vec![0xF0, 0x29, 0xD0, 0x05]).unwrap();
        handle.step().unwrap();
        handle.step().unwrap();
        handle.terminate().unwrap();
        handle.join();
        let frames: Vec<usize> = frames.try_iter().collect();
        // Cleared screen after the first step, the "0" glyph after the second
        assert_eq!(frames, vec![0, 14]);
    }

    #[test]
    fn oversized_load_is_rejected() {
        let handle = spawn();
        assert!(matches!(
            handle.load(0x200, vec![0; 5000]),
            Err(DriverError::Load(_))
        ));
        handle.terminate().unwrap();
        handle.join();
    }

    #[test]
    fn automatic_pulses_only_while_running() {
        let handle = Emulator::spawn(DriverConfig::default()).unwrap();
        handle.run(|machine| machine.set_delay_timer(30)).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(handle.run_sync(|machine| machine.delay_timer()).unwrap(), 30);

        // JP 0x200
        handle.load(0x200, vec![0x12, 0x00]).unwrap();
        handle.start().unwrap();
        wait_until(&handle, |machine| machine.delay_timer() < 30);
        handle.terminate().unwrap();
        handle.join();
    }

    #[test]
    fn manual_pulses_apply_while_stopped() {
        let handle = spawn();
        let changes = state_changes(&handle);
        handle.load(0x200, DELAY_LOOP.to_vec()).unwrap();
        handle.run(|machine| machine.set_delay_timer(2)).unwrap();
        handle.step().unwrap();
        assert_eq!(next(&changes).pc, 0x200);
        assert!(handle
            .run_sync(|machine| machine.wait_flags().contains(WaitFlags::DELAY))
            .unwrap());

        handle.pulse().unwrap();
        handle.pulse().unwrap();
        let (delay, waiting) = handle
            .run_sync(|machine| (machine.delay_timer(), !machine.wait_flags().is_empty()))
            .unwrap();
        assert_eq!(delay, 0);
        assert!(!waiting);

        for _ in 0..3 {
            handle.step().unwrap();
        }
        let (pc, registers) = handle
            .run_sync(|machine| (machine.pc(), *machine.registers()))
            .unwrap();
        assert_eq!(pc, 0x208);
        assert_eq!(registers[0], 0);
        assert_eq!(registers[1], 1);
        handle.terminate().unwrap();
        handle.join();
    }

    #[test]
    fn reset_releases_blocked_driver() {
        let handle = spawn();
        let changes = state_changes(&handle);
        handle.load(0x200, DELAY_LOOP.to_vec()).unwrap();
        handle.run(|machine| machine.set_delay_timer(200)).unwrap();
        handle.start().unwrap();
        assert_eq!(next(&changes).reason, Reason::Started);
        wait_until(&handle, |machine| {
            machine.wait_flags().contains(WaitFlags::DELAY)
        });

        handle.reset().unwrap();
        let change = next(&changes);
        assert_eq!(change.state, RunState::Stopped);
        let (delay, waiting) = handle
            .run_sync(|machine| (machine.delay_timer(), !machine.wait_flags().is_empty()))
            .unwrap();
        assert_eq!(delay, 0);
        assert!(!waiting);

        // Timer is clear after the reset, so the loop falls through
        handle.start().unwrap();
        assert_eq!(next(&changes).reason, Reason::Started);
        wait_until(&handle, |machine| machine.registers()[1] == 1);
        handle.terminate().unwrap();
        handle.join();
    }

    #[test]
    fn reset_releases_key_wait() {
        let handle = spawn();
        let changes = state_changes(&handle);
        // LD V5, K ; LD V6, 1 ; JP 0x204
        handle
            .load(0x200, vec![0xF5, 0x0A, 0x66, 0x01, 0x12, 0x04])
            .unwrap();
        handle.start().unwrap();
        assert_eq!(next(&changes).reason, Reason::Started);
        wait_until(&handle, |machine| {
            machine.wait_flags().contains(WaitFlags::KEY_PRESS)
        });

        handle.reset().unwrap();
        assert_eq!(next(&changes).state, RunState::Stopped);
        assert!(handle
            .run_sync(|machine| machine.wait_flags().is_empty())
            .unwrap());

        // Stepping executes again instead of being swallowed by the wait
        handle.step().unwrap();
        assert_eq!(next(&changes).pc, 0x202);
        handle.terminate().unwrap();
        handle.join();
    }

    #[test]
    fn panicking_task_does_not_kill_driver() {
        let handle = spawn();
        handle.load(0x200, PROGRAM.to_vec()).unwrap();
        handle.run(|_| panic!("task failure")).unwrap();
        assert_eq!(handle.run_sync(|machine| machine.pc()).unwrap(), 0x200);
        assert!(matches!(
            handle.run_sync(|_| -> u16 { panic!("task failure") }),
            Err(DriverError::Panicked)
        ));
        handle.step().unwrap();
        assert_eq!(handle.run_sync(|machine| machine.pc()).unwrap(), 0x202);
        handle.terminate().unwrap();
        handle.join();
    }
}
