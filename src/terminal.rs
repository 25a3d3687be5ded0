use std::io::{self, IsTerminal};

/// Reports whether the standard streams are attached to a terminal.
pub trait TerminalClient {
    /// Returns `true` when stdout is a terminal, enabling colour.
    fn stdout_is_terminal(&self) -> bool;

    /// Returns `true` when stderr is a terminal, enabling progress bars.
    fn stderr_is_terminal(&self) -> bool;
}

/// Terminal detection backed by the process's real streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTerminalClient;

impl TerminalClient for SystemTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        io::stdout().is_terminal()
    }

    fn stderr_is_terminal(&self) -> bool {
        io::stderr().is_terminal()
    }
}
