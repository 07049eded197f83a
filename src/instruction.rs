use std::fmt;

/// Index of a general register, `0x0..=0xF`.
pub type Reg = u8;

/// A decoded opcode. `Display` renders it in assembler syntax.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instruction {
    Cls,
    Ret,
    Jp(u16),
    Call(u16),
    SeImm(Reg, u8),
    SneImm(Reg, u8),
    SeReg(Reg, Reg),
    LdImm(Reg, u8),
    AddImm(Reg, u8),
    LdReg(Reg, Reg),
    Or(Reg, Reg),
    And(Reg, Reg),
    Xor(Reg, Reg),
    AddReg(Reg, Reg),
    Sub(Reg, Reg),
    Shr(Reg, Reg),
    Subn(Reg, Reg),
    Shl(Reg, Reg),
    SneReg(Reg, Reg),
    LdIndex(u16),
    JpV0(u16),
    Rnd(Reg, u8),
    Drw(Reg, Reg, u8),
    Skp(Reg),
    Sknp(Reg),
    LdFromDelay(Reg),
    LdKey(Reg),
    LdDelay(Reg),
    LdSound(Reg),
    AddIndex(Reg),
    LdGlyph(Reg),
    LdBcd(Reg),
    Store(Reg),
    Load(Reg),
}

impl Instruction {
    /// Returns `None` for words that are not a valid opcode.
    pub fn decode(word: u16) -> Option<Instruction> {
        use Instruction::*;
        let x = ((word >> 8) & 0xF) as Reg;
        let y = ((word >> 4) & 0xF) as Reg;
        let n = (word & 0xF) as u8;
        let kk = (word & 0xFF) as u8;
        let nnn = word & 0xFFF;

        let instr = match word >> 12 {
            0x0 => match word {
                0x00E0 => Cls,
                0x00EE => Ret,
                _ => return None,
            },
            0x1 => Jp(nnn),
            0x2 => Call(nnn),
            0x3 => SeImm(x, kk),
            0x4 => SneImm(x, kk),
            0x5 if n == 0 => SeReg(x, y),
            0x6 => LdImm(x, kk),
            0x7 => AddImm(x, kk),
            0x8 => match n {
                0x0 => LdReg(x, y),
                0x1 => Or(x, y),
                0x2 => And(x, y),
                0x3 => Xor(x, y),
                0x4 => AddReg(x, y),
                0x5 => Sub(x, y),
                0x6 => Shr(x, y),
                0x7 => Subn(x, y),
                0xE => Shl(x, y),
                _ => return None,
            },
            0x9 if n == 0 => SneReg(x, y),
            0xA => LdIndex(nnn),
            0xB => JpV0(nnn),
            0xC => Rnd(x, kk),
            0xD => Drw(x, y, n),
            0xE => match kk {
                0x9E => Skp(x),
                0xA1 => Sknp(x),
                _ => return None,
            },
            0xF => match kk {
                0x07 => LdFromDelay(x),
                0x0A => LdKey(x),
                0x15 => LdDelay(x),
                0x18 => LdSound(x),
                0x1E => AddIndex(x),
                0x29 => LdGlyph(x),
                0x33 => LdBcd(x),
                0x55 => Store(x),
                0x65 => Load(x),
                _ => return None,
            },
            _ => return None,
        };
        Some(instr)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;
        match *self {
            Cls => write!(f, "CLS"),
            Ret => write!(f, "RET"),
            Jp(addr) => write!(f, "JP 0x{:03X}", addr),
            Call(addr) => write!(f, "CALL 0x{:03X}", addr),
            SeImm(x, kk) => write!(f, "SE V{:X}, 0x{:02X}", x, kk),
            SneImm(x, kk) => write!(f, "SNE V{:X}, 0x{:02X}", x, kk),
            SeReg(x, y) => write!(f, "SE V{:X}, V{:X}", x, y),
            LdImm(x, kk) => write!(f, "LD V{:X}, 0x{:02X}", x, kk),
            AddImm(x, kk) => write!(f, "ADD V{:X}, 0x{:02X}", x, kk),
            LdReg(x, y) => write!(f, "LD V{:X}, V{:X}", x, y),
            Or(x, y) => write!(f, "OR V{:X}, V{:X}", x, y),
            And(x, y) => write!(f, "AND V{:X}, V{:X}", x, y),
            Xor(x, y) => write!(f, "XOR V{:X}, V{:X}", x, y),
            AddReg(x, y) => write!(f, "ADD V{:X}, V{:X}", x, y),
            Sub(x, y) => write!(f, "SUB V{:X}, V{:X}", x, y),
            Shr(x, y) => write!(f, "SHR V{:X}, V{:X}", x, y),
            Subn(x, y) => write!(f, "SUBN V{:X}, V{:X}", x, y),
            Shl(x, y) => write!(f, "SHL V{:X}, V{:X}", x, y),
            SneReg(x, y) => write!(f, "SNE V{:X}, V{:X}", x, y),
            LdIndex(addr) => write!(f, "LD I, 0x{:03X}", addr),
            JpV0(addr) => write!(f, "JP V0, 0x{:03X}", addr),
            Rnd(x, kk) => write!(f, "RND V{:X}, 0x{:02X}", x, kk),
            Drw(x, y, n) => write!(f, "DRW V{:X}, V{:X}, 0x{:X}", x, y, n),
            Skp(x) => write!(f, "SKP V{:X}", x),
            Sknp(x) => write!(f, "SKNP V{:X}", x),
            LdFromDelay(x) => write!(f, "LD V{:X}, DT", x),
            LdKey(x) => write!(f, "LD V{:X}, K", x),
            LdDelay(x) => write!(f, "LD DT, V{:X}", x),
            LdSound(x) => write!(f, "LD ST, V{:X}", x),
            AddIndex(x) => write!(f, "ADD I, V{:X}", x),
            LdGlyph(x) => write!(f, "LD F, V{:X}", x),
            LdBcd(x) => write!(f, "LD B, V{:X}", x),
            Store(x) => write!(f, "LD [I], V{:X}", x),
            Load(x) => write!(f, "LD V{:X}, [I]", x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_families() {
        assert_eq!(Instruction::decode(0x00E0), Some(Instruction::Cls));
        assert_eq!(Instruction::decode(0x2210), Some(Instruction::Call(0x210)));
        assert_eq!(Instruction::decode(0x8AB6), Some(Instruction::Shr(0xA, 0xB)));
        assert_eq!(Instruction::decode(0xD125), Some(Instruction::Drw(1, 2, 5)));
        assert_eq!(Instruction::decode(0xF365), Some(Instruction::Load(3)));
    }

    #[test]
    fn rejects_illegal_words() {
        for word in [0x0000, 0x0123, 0x5121, 0x8128, 0x912F, 0xE19F, 0xF100, 0xF1FF] {
            assert_eq!(Instruction::decode(word), None, "0x{:04x}", word);
        }
    }

    #[test]
    fn renders_assembler_syntax() {
        let text = |word| Instruction::decode(word).unwrap().to_string();
        assert_eq!(text(0x600A), "LD V0, 0x0A");
        assert_eq!(text(0xB300), "JP V0, 0x300");
        assert_eq!(text(0xF00A), "LD V0, K");
        assert_eq!(text(0xFA55), "LD [I], VA");
        assert_eq!(text(0xD01F), "DRW V0, V1, 0xF");
    }
}
