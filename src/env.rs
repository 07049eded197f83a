use std::ffi::OsStr;
use std::sync::OnceLock;

#[derive(Clone, Copy, Debug)]
struct Env {
    trace_enabled: bool,
}

/// Must only be written by `init` or the first accessor.
static ENV: OnceLock<Env> = OnceLock::new();

/// Read the process environment. Later calls are no-ops.
pub fn init() {
    let _ = with_env(|_| ());
}

/// `CHIP8_TRACE=1` logs every executed instruction.
pub fn is_trace_enabled() -> bool {
    with_env(|env| env.trace_enabled)
}

fn with_env<F, R>(callback: F) -> R
where
    F: Fn(&Env) -> R,
{
    let env = ENV.get_or_init(|| Env {
        trace_enabled: var_is("CHIP8_TRACE", "1"),
    });
    callback(env)
}

fn var_is(name: impl AsRef<OsStr>, value: impl AsRef<str>) -> bool {
    std::env::var(name.as_ref()).is_ok_and(|v| v == value.as_ref())
}
