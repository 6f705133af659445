//! Macros for printing to the terminal.
//!
//! All user-facing console output goes through these so that greppable
//! mode (verdict lines only) and accessible mode (no colour) are honoured
//! in one place.

/// Prints a general status message, suppressed in greppable mode.
#[macro_export]
macro_rules! output {
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            use colored::Colorize;
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{}", $name.bold());
            }
        }
    };
}

/// Prints a low-importance detail line, prefixed with `[~]`.
#[macro_export]
macro_rules! detail {
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            use colored::Colorize;
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", "[~]".cyan(), $name);
            }
        }
    };
}

/// Prints a warning the user should see, prefixed with `[!]`.
#[macro_export]
macro_rules! warning {
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            use colored::Colorize;
            if $accessible {
                eprintln!("{}", $name);
            } else {
                eprintln!("{} {}", "[!]".red(), $name);
            }
        }
    };
}
