use std::io;

use thiserror::Error;

/// Built-in hexadecimal font, five bytes per digit, resident at address 0.
pub const GLYPHS: [u8; 80] = [
    0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
    0x20, 0x60, 0x20, 0x20, 0x70, // 1
    0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
    0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
    0x90, 0x90, 0xF0, 0x10, 0x10, // 4
    0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
    0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
    0xF0, 0x10, 0x20, 0x40, 0x40, // 7
    0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
    0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
    0xF0, 0x90, 0xF0, 0x90, 0x90, // A
    0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
    0xF0, 0x80, 0x80, 0x80, 0xF0, // C
    0xE0, 0x90, 0x90, 0x90, 0xE0, // D
    0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
    0xF0, 0x80, 0xF0, 0x80, 0x80, // F
];

/// Height in bytes of a single glyph.
pub const GLYPH_HEIGHT: u16 = 5;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("binary of {len} bytes does not fit into {capacity} bytes of memory")]
    TooLarge { len: usize, capacity: usize },
    #[error("failed to read binary: {0}")]
    Io(#[from] io::Error),
}

/// Flat byte store. Every address wraps modulo the memory size.
#[derive(Clone, Debug)]
pub struct Memory {
    bytes: Box<[u8]>,
}

impl Memory {
    pub fn new(size: usize) -> Self {
        let mut memory = Memory {
            bytes: vec![0; size].into_boxed_slice(),
        };
        memory.reset();
        memory
    }

    /// Zero everything, then rewrite the glyph ROM.
    pub fn reset(&mut self) {
        self.bytes.fill(0);
        for (addr, byte) in GLYPHS.iter().enumerate() {
            self.bytes[addr] = *byte;
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Reduce an arbitrary address into range.
    #[inline]
    pub fn wrap(&self, addr: usize) -> usize {
        addr % self.bytes.len()
    }

    #[inline]
    pub fn read(&self, addr: u16) -> u8 {
        self.bytes[self.wrap(addr as usize)]
    }

    #[inline]
    pub fn write(&mut self, addr: u16, value: u8) {
        let addr = self.wrap(addr as usize);
        self.bytes[addr] = value;
    }

    /// Big-endian opcode at `addr`.
    pub fn word(&self, addr: u16) -> u16 {
        let hi = self.read(addr);
        let lo = self.bytes[self.wrap(addr as usize + 1)];
        u16::from_be_bytes([hi, lo])
    }

    /// Write `data` verbatim starting at `addr`, wrapping past the end of memory.
    ///
    /// Streams longer than the memory itself are rejected without touching memory.
    pub fn load(&mut self, addr: u16, data: &[u8]) -> Result<(), LoadError> {
        if data.len() > self.bytes.len() {
            return Err(LoadError::TooLarge {
                len: data.len(),
                capacity: self.bytes.len(),
            });
        }
        for (i, byte) in data.iter().enumerate() {
            let addr = self.wrap(addr as usize + i);
            self.bytes[addr] = *byte;
        }
        Ok(())
    }

    /// Drain `reader` into memory at `addr`.
    pub fn load_from(&mut self, reader: &mut impl io::Read, addr: u16) -> Result<(), LoadError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        self.load(addr, &buf)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_writes_glyphs() {
        let mut memory = Memory::new(4096);
        memory.write(0, 0xAA);
        memory.write(0x300, 0xAA);
        memory.reset();
        assert_eq!(&memory.as_slice()[..80], &GLYPHS);
        assert!(memory.as_slice()[80..].iter().all(|b| *b == 0));
    }

    #[test]
    fn addresses_wrap() {
        let mut memory = Memory::new(4096);
        memory.write(0x1005, 0x42);
        assert_eq!(memory.read(0x005), 0x42);
        memory.write(0xFFF, 0x12);
        memory.write(0x000, 0x34);
        assert_eq!(memory.word(0xFFF), 0x1234);
    }

    #[test]
    fn load_wraps_past_the_end() {
        let mut memory = Memory::new(4096);
        memory.load(0xFFE, &[1, 2, 3, 4]).unwrap();
        assert_eq!(memory.read(0xFFE), 1);
        assert_eq!(memory.read(0xFFF), 2);
        assert_eq!(memory.read(0x000), 3);
        assert_eq!(memory.read(0x001), 4);
    }

    #[test]
    fn load_rejects_oversized_binary() {
        let mut memory = Memory::new(4096);
        let err = memory.load(0x200, &[0xFF; 4097]).unwrap_err();
        assert!(matches!(
            err,
            LoadError::TooLarge {
                len: 4097,
                capacity: 4096
            }
        ));
        assert_eq!(memory.read(0x200), 0);
    }

    #[test]
    fn loads_from_reader() {
        let mut memory = Memory::new(4096);
        let mut program: &[u8] = &[0x00, 0xE0];
        memory.load_from(&mut program, 0x200).unwrap();
        assert_eq!(memory.word(0x200), 0x00E0);
    }
}
