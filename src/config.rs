use std::fmt;
use std::str::FromStr;

/// Largest memory a 16-bit program counter can address.
pub const MAX_MEMORY_SIZE: usize = 0x10000;

/// Shape of the emulated machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MachineConfig {
    pub memory_size: usize,
    pub screen_width: usize,
    pub screen_height: usize,
    /// Where programs are loaded and where `pc` points after a reset.
    pub load_address: u16,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            memory_size: 4096,
            screen_width: 64,
            screen_height: 32,
            load_address: 0x200,
        }
    }
}

/// Everything needed to spawn an [`Emulator`](crate::Emulator).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriverConfig {
    pub machine: MachineConfig,
    /// Throttle in `[0,1]`. Values outside the range are clamped.
    pub speed: f32,
    /// Generate 60Hz timer pulses while running.
    pub timer_pulse: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            machine: MachineConfig::default(),
            speed: 1.0,
            timer_pulse: true,
        }
    }
}

impl MachineConfig {
    fn validate(&self) -> Result<(), String> {
        if self.memory_size > MAX_MEMORY_SIZE {
            return Err(format!(
                "Memory size {} exceeds the addressable {}",
                self.memory_size, MAX_MEMORY_SIZE
            ));
        }
        if self.memory_size <= self.load_address as usize {
            return Err(format!(
                "Load address 0x{:x} is outside of {} bytes of memory",
                self.load_address, self.memory_size
            ));
        }
        if self.memory_size < crate::memory::GLYPHS.len() {
            return Err("Memory is too small to hold the glyph ROM".to_string());
        }
        if self.screen_width == 0 || self.screen_height == 0 {
            return Err("Screen dimensions must be non-zero".to_string());
        }
        if self.screen_width % 8 != 0 {
            return Err(format!(
                "Screen width {} is not a multiple of 8",
                self.screen_width
            ));
        }
        Ok(())
    }
}

impl FromStr for MachineConfig {
    type Err = String;
    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let mut config = Self::default();
        let mut seen: Vec<&str> = Vec::new();
        for word in string.split(',') {
            let word = word.trim();
            if word.is_empty() {
                continue;
            }
            let Some((key, value)) = word.split_once('=') else {
                return Err(format!("Expected `key=value`, found '{}'", word));
            };
            let (key, value) = (key.trim(), value.trim());
            if seen.contains(&key) {
                return Err(format!("Cannot specify option '{}' twice", key));
            }
            let number = parse_number(value)
                .ok_or_else(|| format!("Invalid value '{}' for option '{}'", value, key))?;
            match key {
                "memory" => config.memory_size = number,
                "width" => config.screen_width = number,
                "height" => config.screen_height = number,
                "load" => {
                    config.load_address = u16::try_from(number)
                        .map_err(|_| format!("Load address '{}' does not fit 16 bits", value))?
                }
                _ => return Err(format!("Unknown option '{}'", key)),
            }
            seen.push(key);
        }
        config.validate()?;
        Ok(config)
    }
}

impl fmt::Display for MachineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory={},width={},height={},load=0x{:x}",
            self.memory_size, self.screen_width, self.screen_height, self.load_address
        )
    }
}

/// Decimal, or hexadecimal with a `0x` prefix.
pub fn parse_number(value: &str) -> Option<usize> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_empty_as_default() {
        assert_eq!("".parse::<MachineConfig>(), Ok(MachineConfig::default()));
    }

    #[test]
    fn parses_options() {
        let config: MachineConfig = "memory=0x1000, width=128,height=64,load=0x300"
            .parse()
            .unwrap();
        assert_eq!(config.memory_size, 4096);
        assert_eq!(config.screen_width, 128);
        assert_eq!(config.screen_height, 64);
        assert_eq!(config.load_address, 0x300);
        assert_eq!(config.to_string().parse::<MachineConfig>(), Ok(config));
    }

    #[test]
    fn rejects_bad_options() {
        assert!("speed=3".parse::<MachineConfig>().is_err());
        assert!("width=64,width=64".parse::<MachineConfig>().is_err());
        assert!("width".parse::<MachineConfig>().is_err());
        assert!("width=63".parse::<MachineConfig>().is_err());
        assert!("memory=0x20000".parse::<MachineConfig>().is_err());
        assert!("memory=0x100".parse::<MachineConfig>().is_err());
    }
}
