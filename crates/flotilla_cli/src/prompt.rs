//! Confirmation prompt for mutating commands.

use std::io::Write;

use console::Term;

/// Ask the operator to confirm a mutation. Returns `true` only on an
/// explicit `y`/`yes`; anything else aborts.
pub fn confirm(message: &str) -> bool {
    print!("{message} [y/N] ");
    let _ = std::io::stdout().flush();

    let answer = Term::stdout().read_line().unwrap_or_default();
    let yes = answer.trim().to_lowercase();
    if yes == "y" || yes == "yes" {
        return true;
    }

    println!("Aborted");
    false
}
