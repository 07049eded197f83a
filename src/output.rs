use std::str::Chars;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::{ColoredString, Colorize};

use crate::interpreter::Interpreter;
use crate::screen::Frame;

#[macro_export]
macro_rules! dprint {
    ( $cond:expr, $category:expr, $fmt:literal $($tt:tt)* ) => {{
        #[allow(unused_imports)]
        use $crate::output::{Category::*, Condition::*};
        let s = format!(
            $fmt
            $($tt)*
        );
        $crate::output::Output::Diagnostic($cond, $category).print_str(&s);
    }};
}

#[macro_export]
macro_rules! dprintln {
    ( $cond:expr ) => {{
        #[allow(unused_imports)]
        use $crate::output::{Category::*, Condition::*};
        $crate::output::Output::Diagnostic($cond, Normal).print_str("\n");
    }};
    ( $cond:expr, $category:expr, $fmt:literal $($tt:tt)* ) => {{
        #[allow(unused_imports)]
        use $crate::output::{Category::*, Condition::*};
        let s = format!(
            concat!($fmt, "\n")
            $($tt)*
        );
        $crate::output::Output::Diagnostic($cond, $category).print_str(&s);
    }};
}

#[derive(Clone, Copy, Debug)]
pub enum Output {
    /// Program output, such as a rendered frame. Goes to stdout.
    Normal,
    /// Driver and toolchain messages. Go to stderr.
    Diagnostic(Condition, Category),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    Always,
    /// Dropped entirely in minimal mode.
    Sometimes,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Category {
    #[default]
    Normal,
    Info,
    Warning,
    Error,
}

/// Minimal mode is read from the driver thread as well, so it cannot be thread-local.
static IS_MINIMAL: AtomicBool = AtomicBool::new(false);

struct Decolored<'a> {
    chars: Chars<'a>,
}

impl Output {
    pub fn set_minimal(new_value: bool) -> bool {
        IS_MINIMAL.swap(new_value, Ordering::Relaxed)
    }

    pub fn is_minimal() -> bool {
        IS_MINIMAL.load(Ordering::Relaxed)
    }

    pub fn print_str(&self, string: &str) {
        match self {
            Self::Normal => print!("{}", string),
            Self::Diagnostic(condition, category) => match (Self::is_minimal(), *condition) {
                (false, _) => eprint!("{}", category.paint(string)),
                (true, Condition::Always) => eprint_colorless(string),
                (true, Condition::Sometimes) => (),
            },
        }
    }

    pub fn print_registers(&self, state: &Interpreter) {
        if Self::is_minimal() {
            for (i, value) in state.registers().iter().enumerate() {
                self.print_str(&format!("V{:X} {}\n", i, value));
            }
            self.print_str(&format!("PC {}\n", state.pc()));
            self.print_str(&format!("I {}\n", state.index()));
            self.print_str(&format!("SP {}\n", state.sp()));
            return;
        }

        self.print_str("\x1b[2m┌──────────────────────────────────────┐\x1b[0m\n");
        for row in 0..4 {
            self.print_str("\x1b[2m│\x1b[0m");
            for col in 0..4 {
                let i = row * 4 + col;
                self.print_str(&format!(
                    " \x1b[1mV{:X}\x1b[0m 0x{:02x} ",
                    i,
                    state.registers()[i]
                ));
            }
            self.print_str("  \x1b[2m│\x1b[0m\n");
        }
        self.print_str("\x1b[2m│\x1b[0m");
        self.print_str(&format!(
            " \x1b[1mPC\x1b[0m 0x{:03x}  \x1b[1mI\x1b[0m 0x{:03x}  \x1b[1mSP\x1b[0m {:>2}  \x1b[1mDT\x1b[0m {:>3} ",
            state.pc(),
            state.index(),
            state.sp(),
            state.delay_timer(),
        ));
        self.print_str("\x1b[2m│\x1b[0m\n");
        self.print_str("\x1b[2m└──────────────────────────────────────┘\x1b[0m\n");
    }

    /// Draw a frame as text, two rows of pixels per line of output.
    pub fn print_frame(&self, frame: &Frame) {
        if Self::is_minimal() {
            for y in 0..frame.height() {
                let line: String = (0..frame.width())
                    .map(|x| if frame.pixel(x, y) { '#' } else { '.' })
                    .collect();
                self.print_str(&line);
                self.print_str("\n");
            }
            return;
        }

        for y in (0..frame.height()).step_by(2) {
            let line: String = (0..frame.width())
                .map(|x| {
                    let top = frame.pixel(x, y);
                    let bottom = y + 1 < frame.height() && frame.pixel(x, y + 1);
                    match (top, bottom) {
                        (true, true) => '█',
                        (true, false) => '▀',
                        (false, true) => '▄',
                        (false, false) => ' ',
                    }
                })
                .collect();
            self.print_str(&line);
            self.print_str("\n");
        }
    }
}

impl Category {
    fn paint(self, string: &str) -> ColoredString {
        let string = ColoredString::from(string);
        match self {
            Category::Normal => string,
            Category::Info => string.blue(),
            Category::Warning => string.yellow(),
            Category::Error => string.red(),
        }
    }
}

impl<'a> Decolored<'a> {
    pub fn new(string: &'a str) -> Self {
        Self {
            chars: string.chars(),
        }
    }
}

impl Iterator for Decolored<'_> {
    type Item = char;
    fn next(&mut self) -> Option<Self::Item> {
        while let Some(ch) = self.chars.next() {
            // Skip everything between '\x1b' and 'm' (inclusive)
            if ch == '\x1b' {
                while self.chars.next().is_some_and(|ch| ch != 'm') {}
                continue;
            }
            return Some(ch);
        }
        None
    }
}

fn eprint_colorless(string: &str) {
    let string: String = Decolored::new(string).collect();
    eprint!("{}", string);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decolored() {
        assert_eq!(Decolored::new("abcdef").collect::<String>(), "abcdef");
        assert_eq!(
            Decolored::new("abc\x1b[0;2mdef\x1b[0m").collect::<String>(),
            "abcdef"
        );
        assert_eq!(Decolored::new("abc\x1b[0xyz").collect::<String>(), "abc");
    }
}
