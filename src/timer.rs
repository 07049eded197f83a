/// Pulses per second delivered to every timer.
pub const TIMER_HZ: u32 = 60;

/// Byte countdown decremented by an external 60Hz pulse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timer {
    value: u8,
}

impl Timer {
    pub fn value(&self) -> u8 {
        self.value
    }

    pub fn set(&mut self, value: u8) {
        self.value = value;
    }

    pub fn is_active(&self) -> bool {
        self.value > 0
    }

    /// Count down once. `on_zero` runs when this pulse brings the counter to zero.
    pub fn pulse(&mut self, on_zero: impl FnOnce()) {
        if self.value == 0 {
            return;
        }
        self.value -= 1;
        if self.value == 0 {
            on_zero();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_once_at_zero() {
        let mut timer = Timer::default();
        timer.set(2);
        let mut fired = 0;
        timer.pulse(|| fired += 1);
        assert_eq!(fired, 0);
        assert!(timer.is_active());
        timer.pulse(|| fired += 1);
        assert_eq!(fired, 1);
        timer.pulse(|| fired += 1);
        assert_eq!(fired, 1);
        assert_eq!(timer.value(), 0);
    }
}
