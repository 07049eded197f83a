use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::config::MachineConfig;
use crate::dprintln;
use crate::env;
use crate::instruction::Instruction;
use crate::keyboard::Keyboard;
use crate::memory::{Memory, GLYPH_HEIGHT};
use crate::screen::Screen;
use crate::timer::Timer;

/// Depth of the call stack.
pub const STACK_DEPTH: usize = 16;

/// Seed used on every reset, so `RND` sequences repeat between runs.
const RNG_SEED: u64 = 0xC8C8_C8C8;

/// Conditions which stop execution of the current run.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Fault {
    #[error("illegal instruction 0x{opcode:04x} at address 0x{address:03x}")]
    IllegalInstruction { address: u16, opcode: u16 },
    #[error("call stack overflow at address 0x{address:03x}")]
    StackOverflow { address: u16 },
    #[error("return with empty call stack at address 0x{address:03x}")]
    StackUnderflow { address: u16 },
}

/// Events the engine is suspended on. `tick` does nothing while any is set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WaitFlags(u8);

impl WaitFlags {
    pub const NONE: WaitFlags = WaitFlags(0);
    /// Delay timer has to reach zero.
    pub const DELAY: WaitFlags = WaitFlags(0b001);
    /// Any key has to be pressed.
    pub const KEY_PRESS: WaitFlags = WaitFlags(0b010);
    /// The key which ended a `KEY_PRESS` wait has to be released.
    pub const KEY_RELEASE: WaitFlags = WaitFlags(0b100);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: WaitFlags) -> bool {
        self.0 & other.0 == other.0 && !other.is_empty()
    }

    pub fn insert(&mut self, other: WaitFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: WaitFlags) {
        self.0 &= !other.0;
    }
}

/// Complete machine state. Owned and mutated by exactly one thread.
#[derive(Clone, Debug)]
pub struct Interpreter {
    config: MachineConfig,
    pc: u16,
    sp: u8,
    index: u16,
    registers: [u8; 16],
    stack: [u16; STACK_DEPTH],
    memory: Memory,
    screen: Screen,
    keyboard: Keyboard,
    delay: Timer,
    sound: Timer,
    beeping: bool,
    wait: WaitFlags,
    /// Destination register of a pending `LD Vx, K`.
    key_register: u8,
    /// Key which must be released to end a `KEY_RELEASE` wait.
    awaited_release: u8,
    rng: StdRng,
}

impl Interpreter {
    pub fn new(config: MachineConfig) -> Self {
        let mut interpreter = Interpreter {
            config,
            pc: config.load_address,
            sp: 0,
            index: 0,
            registers: [0; 16],
            stack: [0; STACK_DEPTH],
            memory: Memory::new(config.memory_size),
            screen: Screen::new(config.screen_width, config.screen_height),
            keyboard: Keyboard::default(),
            delay: Timer::default(),
            sound: Timer::default(),
            beeping: false,
            wait: WaitFlags::NONE,
            key_register: 0,
            awaited_release: 0,
            rng: StdRng::seed_from_u64(RNG_SEED),
        };
        interpreter.reset();
        interpreter
    }

    /// Reinitialise all state. Memory must be reset before the screen.
    pub fn reset(&mut self) {
        self.memory.reset();
        self.screen.clear();
        self.pc = self.config.load_address;
        self.sp = 0;
        self.index = 0;
        self.registers = [0; 16];
        self.stack = [0; STACK_DEPTH];
        self.keyboard.reset();
        self.delay.set(0);
        self.sound.set(0);
        self.beeping = false;
        self.wait = WaitFlags::NONE;
        self.key_register = 0;
        self.awaited_release = 0;
        self.rng = StdRng::seed_from_u64(RNG_SEED);
    }

    const OP_TABLE: [fn(&mut Interpreter, u16, u16) -> Result<(), Fault>; 16] = [
        Self::system,     // 0x0
        Self::jump,       // 0x1
        Self::call,       // 0x2
        Self::skip_eq,    // 0x3
        Self::skip_ne,    // 0x4
        Self::skip_eq_reg, // 0x5
        Self::load_imm,   // 0x6
        Self::add_imm,    // 0x7
        Self::alu,        // 0x8
        Self::skip_ne_reg, // 0x9
        Self::load_index, // 0xA
        Self::jump_v0,    // 0xB
        Self::random,     // 0xC
        Self::draw,       // 0xD
        Self::skip_key,   // 0xE
        Self::misc,       // 0xF
    ];

    /// Execute at most one instruction. Does nothing while a wait condition is active.
    pub fn tick(&mut self) -> Result<(), Fault> {
        if !self.wait.is_empty() {
            return Ok(());
        }
        let addr = self.pc;
        let instr = self.memory.word(addr);
        if env::is_trace_enabled() {
            match Instruction::decode(instr) {
                Some(decoded) => {
                    dprintln!(Sometimes, Info, "0x{:03x}  {:04x}  {}", addr, instr, decoded)
                }
                None => dprintln!(Sometimes, Info, "0x{:03x}  {:04x}  ???", addr, instr),
            }
        }
        // PC incremented before instruction is performed
        self.pc = self.offset_pc(addr, 2);
        let result = Self::OP_TABLE[(instr >> 12) as usize](self, instr, addr);
        if result.is_err() {
            // Leave pc on the faulting instruction
            self.pc = addr;
        }
        result
    }

    /// One 60Hz pulse for both timers.
    pub fn pulse_timers(&mut self) {
        let wait = &mut self.wait;
        self.delay.pulse(|| wait.remove(WaitFlags::DELAY));
        let beeping = &mut self.beeping;
        self.sound.pulse(|| *beeping = false);
    }

    /// Ends a key-press wait, storing `key` into the awaited register.
    ///
    /// No-op unless the engine is waiting for a key press.
    pub fn key_pressed(&mut self, key: u8) {
        if !self.wait.contains(WaitFlags::KEY_PRESS) {
            return;
        }
        let key = key & 0xF;
        self.registers[self.key_register as usize] = key;
        self.awaited_release = key;
        self.wait.remove(WaitFlags::KEY_PRESS);
        self.wait.insert(WaitFlags::KEY_RELEASE);
    }

    /// Ends a key-release wait if `key` is the key that was pressed.
    pub fn key_released(&mut self, key: u8) {
        if self.wait.contains(WaitFlags::KEY_RELEASE) && key & 0xF == self.awaited_release {
            self.wait.remove(WaitFlags::KEY_RELEASE);
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.pc = self.memory.wrap(pc as usize) as u16;
    }

    pub fn sp(&self) -> u8 {
        self.sp
    }

    pub fn stack(&self) -> &[u16] {
        &self.stack[..self.sp as usize]
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn set_index(&mut self, index: u16) {
        self.index = self.mask_index(index as usize);
    }

    pub fn registers(&self) -> &[u8; 16] {
        &self.registers
    }

    pub fn set_register(&mut self, reg: u8, value: u8) {
        self.registers[(reg & 0xF) as usize] = value;
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn screen_mut(&mut self) -> &mut Screen {
        &mut self.screen
    }

    pub fn keyboard(&self) -> &Keyboard {
        &self.keyboard
    }

    pub fn keyboard_mut(&mut self) -> &mut Keyboard {
        &mut self.keyboard
    }

    pub fn delay_timer(&self) -> u8 {
        self.delay.value()
    }

    pub fn set_delay_timer(&mut self, value: u8) {
        self.delay.set(value);
    }

    pub fn sound_timer(&self) -> u8 {
        self.sound.value()
    }

    pub fn is_beeping(&self) -> bool {
        self.beeping
    }

    pub fn wait_flags(&self) -> WaitFlags {
        self.wait
    }

    #[inline]
    fn offset_pc(&self, pc: u16, amount: usize) -> u16 {
        self.memory.wrap(pc as usize + amount) as u16
    }

    #[inline]
    fn mask_index(&self, index: usize) -> u16 {
        (self.memory.wrap(index) & 0xFFF) as u16
    }

    #[inline]
    fn reg(&mut self, reg: u16) -> &mut u8 {
        &mut self.registers[(reg & 0xF) as usize]
    }

    #[inline]
    fn skip_if(&mut self, condition: bool) {
        if condition {
            self.pc = self.offset_pc(self.pc, 2);
        }
    }

    fn illegal(address: u16, opcode: u16) -> Result<(), Fault> {
        Err(Fault::IllegalInstruction { address, opcode })
    }

    fn system(&mut self, instr: u16, addr: u16) -> Result<(), Fault> {
        match instr {
            0x00E0 => self.screen.clear(),
            0x00EE => {
                if self.sp == 0 {
                    return Err(Fault::StackUnderflow { address: addr });
                }
                self.sp -= 1;
                self.pc = self.stack[self.sp as usize];
            }
            _ => return Self::illegal(addr, instr),
        }
        Ok(())
    }

    fn jump(&mut self, instr: u16, _addr: u16) -> Result<(), Fault> {
        self.set_pc(instr & 0xFFF);
        Ok(())
    }

    fn call(&mut self, instr: u16, addr: u16) -> Result<(), Fault> {
        if self.sp as usize == STACK_DEPTH {
            return Err(Fault::StackOverflow { address: addr });
        }
        self.stack[self.sp as usize] = self.pc;
        self.sp += 1;
        self.set_pc(instr & 0xFFF);
        Ok(())
    }

    fn skip_eq(&mut self, instr: u16, _addr: u16) -> Result<(), Fault> {
        let vx = *self.reg(instr >> 8);
        self.skip_if(vx == (instr & 0xFF) as u8);
        Ok(())
    }

    fn skip_ne(&mut self, instr: u16, _addr: u16) -> Result<(), Fault> {
        let vx = *self.reg(instr >> 8);
        self.skip_if(vx != (instr & 0xFF) as u8);
        Ok(())
    }

    fn skip_eq_reg(&mut self, instr: u16, addr: u16) -> Result<(), Fault> {
        if instr & 0xF != 0 {
            return Self::illegal(addr, instr);
        }
        let vx = *self.reg(instr >> 8);
        let vy = *self.reg(instr >> 4);
        self.skip_if(vx == vy);
        Ok(())
    }

    fn skip_ne_reg(&mut self, instr: u16, addr: u16) -> Result<(), Fault> {
        if instr & 0xF != 0 {
            return Self::illegal(addr, instr);
        }
        let vx = *self.reg(instr >> 8);
        let vy = *self.reg(instr >> 4);
        self.skip_if(vx != vy);
        Ok(())
    }

    fn load_imm(&mut self, instr: u16, _addr: u16) -> Result<(), Fault> {
        *self.reg(instr >> 8) = (instr & 0xFF) as u8;
        Ok(())
    }

    fn add_imm(&mut self, instr: u16, _addr: u16) -> Result<(), Fault> {
        let vx = self.reg(instr >> 8);
        *vx = vx.wrapping_add((instr & 0xFF) as u8);
        Ok(())
    }

    /// Register-register arithmetic. VF is written last, so it holds the flag even as destination.
    fn alu(&mut self, instr: u16, addr: u16) -> Result<(), Fault> {
        let x = instr >> 8;
        let vx = *self.reg(x);
        let vy = *self.reg(instr >> 4);
        let (result, flag) = match instr & 0xF {
            0x0 => (vy, None),
            0x1 => (vx | vy, None),
            0x2 => (vx & vy, None),
            0x3 => (vx ^ vy, None),
            0x4 => {
                let (sum, carry) = vx.overflowing_add(vy);
                (sum, Some(carry as u8))
            }
            // VF=1 when no borrow occurs
            0x5 => (vx.wrapping_sub(vy), Some((vx >= vy) as u8)),
            0x6 => (vy >> 1, Some(vy & 0x1)),
            0x7 => (vy.wrapping_sub(vx), Some((vy >= vx) as u8)),
            0xE => (vy << 1, Some(vy >> 7)),
            _ => return Self::illegal(addr, instr),
        };
        *self.reg(x) = result;
        if let Some(flag) = flag {
            self.registers[0xF] = flag;
        }
        Ok(())
    }

    fn load_index(&mut self, instr: u16, _addr: u16) -> Result<(), Fault> {
        self.index = instr & 0xFFF;
        Ok(())
    }

    fn jump_v0(&mut self, instr: u16, _addr: u16) -> Result<(), Fault> {
        let target = (instr & 0xFFF) + self.registers[0] as u16;
        self.set_pc(target);
        Ok(())
    }

    fn random(&mut self, instr: u16, _addr: u16) -> Result<(), Fault> {
        let value: u8 = self.rng.gen();
        *self.reg(instr >> 8) = value & (instr & 0xFF) as u8;
        Ok(())
    }

    fn draw(&mut self, instr: u16, _addr: u16) -> Result<(), Fault> {
        let x = *self.reg(instr >> 8) as usize;
        let y = *self.reg(instr >> 4) as usize;
        let height = (instr & 0xF) as usize;
        let mut sprite = [0u8; 15];
        for (i, line) in sprite.iter_mut().enumerate().take(height) {
            *line = self.memory.read(self.index.wrapping_add(i as u16));
        }
        let collision = self.screen.draw(x, y, &sprite[..height]);
        self.registers[0xF] = collision as u8;
        Ok(())
    }

    fn skip_key(&mut self, instr: u16, addr: u16) -> Result<(), Fault> {
        let key = *self.reg(instr >> 8);
        match instr & 0xFF {
            0x9E => self.skip_if(self.keyboard.is_pressed(key)),
            0xA1 => self.skip_if(!self.keyboard.is_pressed(key)),
            _ => return Self::illegal(addr, instr),
        }
        Ok(())
    }

    fn misc(&mut self, instr: u16, addr: u16) -> Result<(), Fault> {
        let x = (instr >> 8) & 0xF;
        match instr & 0xFF {
            0x07 => {
                let value = self.delay.value();
                *self.reg(x) = value;
                if value > 0 && self.is_delay_loop(addr, x) {
                    // Park on this instruction until the timer runs out
                    self.pc = addr;
                    self.wait.insert(WaitFlags::DELAY);
                }
            }
            0x0A => {
                self.key_register = x as u8;
                self.wait.insert(WaitFlags::KEY_PRESS);
            }
            0x15 => {
                let value = *self.reg(x);
                self.delay.set(value);
            }
            0x18 => {
                let value = *self.reg(x);
                self.sound.set(value);
                self.beeping = value > 0;
            }
            0x1E => {
                let value = *self.reg(x) as usize;
                self.index = self.mask_index(self.index as usize + value);
            }
            0x29 => {
                let digit = (*self.reg(x) & 0xF) as u16;
                self.index = digit * GLYPH_HEIGHT;
            }
            0x33 => {
                let value = *self.reg(x);
                self.memory.write(self.index, value / 100);
                self.memory.write(self.index.wrapping_add(1), value / 10 % 10);
                self.memory.write(self.index.wrapping_add(2), value % 10);
            }
            0x55 => {
                for i in 0..=x {
                    let value = self.registers[i as usize];
                    self.memory.write(self.index.wrapping_add(i), value);
                }
                self.index = self.mask_index(self.index as usize + x as usize + 1);
            }
            0x65 => {
                for i in 0..=x {
                    self.registers[i as usize] = self.memory.read(self.index.wrapping_add(i));
                }
                self.index = self.mask_index(self.index as usize + x as usize + 1);
            }
            _ => return Self::illegal(addr, instr),
        }
        Ok(())
    }

    /// Matches `LD Vx, DT` / `SE Vx, 0` / `JP <addr>` where `<addr>` is the `LD` itself.
    fn is_delay_loop(&self, addr: u16, x: u16) -> bool {
        let skip = self.memory.word(self.offset_pc(addr, 2));
        let jump = self.memory.word(self.offset_pc(addr, 4));
        skip == 0x3000 | (x << 8) && jump == 0x1000 | (addr & 0xFFF)
    }
}
