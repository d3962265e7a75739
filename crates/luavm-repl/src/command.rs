//! Line parsing for the REPL.
//!
//! Lines starting with `:` are front-end commands; everything else goes to
//! the interpreter. A leading `::` escapes a literal colon.

/// One line of user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Forward to the interpreter.
    Input(&'a str),
    /// Re-attach to the session.
    Attach,
    /// Detach; the interpreter keeps running.
    Detach,
    /// Print session snapshots as JSON.
    Sessions,
    /// Print VM snapshots as JSON.
    Vms,
    /// Print worker pool counters as JSON.
    Stats,
    /// Run code once on a side VM through the worker pool.
    Exec(&'a str),
    /// Print the command list.
    Help,
    /// Leave the REPL.
    Quit,
    /// Unrecognised `:` command.
    Unknown(&'a str),
}

pub const HELP: &str = "\
commands:
  :attach        re-attach and show buffered output
  :detach        stop showing output; the interpreter keeps running
  :sessions      list sessions as JSON
  :vms           list VMs as JSON
  :stats         worker pool counters as JSON
  :exec <code>   run <code> once in a fresh interpreter
  :help          this list
  :quit          exit
lines starting with '::' are sent with one leading ':' removed";

/// Parse one input line (without its trailing newline).
pub fn parse(line: &str) -> Command<'_> {
    if line.starts_with("::") {
        return Command::Input(&line[1..]);
    }
    let Some(rest) = line.strip_prefix(':') else {
        return Command::Input(line);
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest.trim(), ""),
    };
    match name {
        "attach" | "a" => Command::Attach,
        "detach" | "d" => Command::Detach,
        "sessions" => Command::Sessions,
        "vms" => Command::Vms,
        "stats" => Command::Stats,
        "exec" | "e" if !arg.is_empty() => Command::Exec(arg),
        "help" | "h" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        _ => Command::Unknown(rest),
    }
}
