//! Global output-mode flags, carried via environment variables so every
//! module can check them without threading state through.

pub fn is_json() -> bool {
    std::env::var("TAXPROBE_JSON").is_ok()
}

pub fn is_quiet() -> bool {
    std::env::var("TAXPROBE_QUIET").is_ok()
}

pub fn is_verbose() -> bool {
    std::env::var("TAXPROBE_VERBOSE").is_ok()
}

/// Print a machine-readable JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".into())
    );
}
