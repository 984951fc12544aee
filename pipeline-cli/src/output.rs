// Output formatting helpers for CLI commands

use pipeline_engine::{PlanStatus, Status};

/// Print a status message: "  Status message"
pub fn status(action: &str, message: &str) {
    eprintln!("\x1b[1;36m{:>12}\x1b[0m {}", action, message);
}

/// Print a success message with checkmark
pub fn success(message: &str) {
    eprintln!("\x1b[1;32m  \u{2713}\x1b[0m {}", message);
}

/// Print a failure message with X
pub fn failure(message: &str) {
    eprintln!("\x1b[1;31m  \u{2717}\x1b[0m {}", message);
}

/// Print a check/pass item
pub fn check(message: &str) {
    eprintln!("\x1b[32m  \u{2713}\x1b[0m {}", message);
}

/// Print a warning message
pub fn warning(message: &str) {
    eprintln!("\x1b[33m  !\x1b[0m {}", message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("\x1b[1;31merror:\x1b[0m {}", message);
}

/// Print an info message
pub fn info(message: &str) {
    eprintln!("\x1b[36m  i\x1b[0m {}", message);
}

/// Print a dim/muted message
pub fn dim(message: &str) {
    eprintln!("\x1b[2m{}\x1b[0m", message);
}

/// Print a header line
pub fn header(message: &str) {
    eprintln!("\x1b[1m==> {}\x1b[0m", message);
}

/// Print a node transition, colored by the status it landed in
pub fn node_status(node: &str, from: Status, to: Status) {
    let color = if to.is_positive() {
        "32"
    } else if to.is_broke() {
        "31"
    } else {
        "2"
    };
    eprintln!("    \x1b[{}m{:<12}\x1b[0m {} ({})", color, to, node, from);
}

/// Print the final plan outcome
pub fn plan_outcome(status: PlanStatus, seconds: f64) {
    match status {
        PlanStatus::Succeeded => success(&format!("Plan succeeded in {:.2}s", seconds)),
        other => failure(&format!("Plan ended {} after {:.2}s", other, seconds)),
    }
}
