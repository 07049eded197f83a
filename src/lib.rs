// Machine
mod instruction;
pub use instruction::{Instruction, Reg};
mod interpreter;
pub use interpreter::{Fault, Interpreter, WaitFlags, STACK_DEPTH};
mod keyboard;
pub use keyboard::Keyboard;
mod memory;
pub use memory::{LoadError, Memory, GLYPHS, GLYPH_HEIGHT};
mod screen;
pub use screen::{DisplaySink, Frame, Screen};
mod timer;
pub use timer::{Timer, TIMER_HZ};

// Execution
mod breakpoint;
pub use breakpoint::{Breakpoint, BreakpointState, Breakpoints};
mod command;
pub use command::{
    queue, BreakpointChange, Command, CommandQueue, CommandSender, DriverError, Polled,
};
mod driver;
pub use driver::{Emulator, EmulatorHandle, Reason, RunState, StateChange, Throttle};

// Assembling
mod assembler;
pub use assembler::{assemble, Program};
mod ast;
mod error;
pub use error::Message;
mod eval;
mod lexer;
mod opcode;
mod parser;
mod symbol;
pub use symbol::{Identifier, Lookup, Symbol, SymbolError, SymbolKind, SymbolTable};

mod span;
pub use span::Span;

pub mod config;
pub mod env;
#[macro_use]
pub mod output;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 8;

/// Conventional load address of CHIP-8 programs.
pub const DEFAULT_ORIGIN: u16 = 0x200;
