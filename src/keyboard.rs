/// Set of pressed keys `0x0..=0xF`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Keyboard {
    pressed: u16,
}

impl Keyboard {
    pub fn press(&mut self, key: u8) {
        self.pressed |= 1 << (key & 0xF);
    }

    pub fn release(&mut self, key: u8) {
        self.pressed &= !(1 << (key & 0xF));
    }

    pub fn is_pressed(&self, key: u8) -> bool {
        self.pressed & (1 << (key & 0xF)) != 0
    }

    pub fn reset(&mut self) {
        self.pressed = 0;
    }

    pub fn pressed(&self) -> impl Iterator<Item = u8> + '_ {
        (0..16).filter(|key| self.is_pressed(*key))
    }
}
