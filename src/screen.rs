/// Monochrome pixel buffer, eight pixels per byte, rows packed left to right.
#[derive(Clone, Debug)]
pub struct Screen {
    width: usize,
    height: usize,
    bits: Vec<u8>,
    /// Set whenever the buffer changes, cleared when a frame is taken.
    dirty: bool,
}

/// Immutable copy of the screen handed to a display sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    width: usize,
    height: usize,
    bits: Vec<u8>,
}

/// Receives a frame snapshot whenever the screen has changed.
pub trait DisplaySink: Send {
    fn present(&mut self, frame: &Frame);
}

impl<F> DisplaySink for F
where
    F: FnMut(&Frame) + Send,
{
    fn present(&mut self, frame: &Frame) {
        self(frame)
    }
}

impl Screen {
    pub fn new(width: usize, height: usize) -> Self {
        debug_assert!(width % 8 == 0, "screen width must be byte aligned");
        Screen {
            width,
            height,
            bits: vec![0; width * height / 8],
            dirty: true,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn clear(&mut self) {
        self.bits.fill(0);
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn pixel(&self, x: usize, y: usize) -> bool {
        let (byte, mask) = self.locate(x, y);
        self.bits[byte] & mask != 0
    }

    /// XOR a sprite onto the screen with its top left corner at `(x, y)`.
    ///
    /// Every pixel wraps around the screen edges. Returns whether any set pixel was cleared.
    pub fn draw(&mut self, x: usize, y: usize, sprite: &[u8]) -> bool {
        let mut collision = false;
        for (row, line) in sprite.iter().enumerate() {
            for col in 0..8 {
                if line & (0x80 >> col) == 0 {
                    continue;
                }
                let (byte, mask) = self.locate(x + col, y + row);
                collision |= self.bits[byte] & mask != 0;
                self.bits[byte] ^= mask;
            }
        }
        self.dirty = true;
        collision
    }

    /// Snapshot the buffer and clear the dirty flag.
    pub fn take_frame(&mut self) -> Frame {
        self.dirty = false;
        self.frame()
    }

    pub fn frame(&self) -> Frame {
        Frame {
            width: self.width,
            height: self.height,
            bits: self.bits.clone(),
        }
    }

    #[inline]
    fn locate(&self, x: usize, y: usize) -> (usize, u8) {
        let x = x % self.width;
        let y = y % self.height;
        let bit = y * self.width + x;
        (bit / 8, 0x80 >> (bit % 8))
    }
}

impl Frame {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel(&self, x: usize, y: usize) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let bit = y * self.width + x;
        self.bits[bit / 8] & (0x80 >> (bit % 8)) != 0
    }

    /// Amount of pixels set.
    pub fn lit(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draws_and_collides() {
        let mut screen = Screen::new(64, 32);
        assert!(!screen.draw(0, 0, &[0b1010_0000]));
        assert!(screen.pixel(0, 0));
        assert!(!screen.pixel(1, 0));
        assert!(screen.pixel(2, 0));

        // Overlapping only on an unset pixel
        assert!(!screen.draw(1, 0, &[0b1000_0000]));
        // Clears (0, 0)
        assert!(screen.draw(0, 0, &[0b1000_0000]));
        assert!(!screen.pixel(0, 0));
    }

    #[test]
    fn wraps_around_edges() {
        let mut screen = Screen::new(64, 32);
        screen.draw(62, 31, &[0xF0, 0xF0]);
        assert!(screen.pixel(62, 31));
        assert!(screen.pixel(63, 31));
        assert!(screen.pixel(0, 31));
        assert!(screen.pixel(1, 31));
        assert!(screen.pixel(62, 0));
        assert!(screen.pixel(1, 0));
        assert_eq!(screen.frame().lit(), 8);
    }

    #[test]
    fn dirty_flag() {
        let mut screen = Screen::new(64, 32);
        let frame = screen.take_frame();
        assert!(!screen.is_dirty());
        assert_eq!(frame.lit(), 0);
        screen.draw(3, 4, &[0x80]);
        assert!(screen.is_dirty());
        let frame = screen.take_frame();
        assert!(frame.pixel(3, 4));
        assert!(!frame.pixel(64, 4));
        screen.clear();
        assert!(screen.is_dirty());
        assert!(!screen.pixel(3, 4));
    }
}
