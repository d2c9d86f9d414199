pub mod copy_file;
pub mod describe;
pub mod destroy;
pub mod launch;
pub mod lifecycle;
pub mod login;
pub mod resize;
pub mod run_command;

use std::io::Write;

/// Interactive yes/no prompt used when `--assume-yes` is not given.
pub fn prompt_yes_no(question: &str) -> bool {
    print!("{question} [y/N]: ");
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
