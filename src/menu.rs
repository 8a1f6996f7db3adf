//! Numbered operator menus shown before a session starts.
//!
//! Pure presentation: the menu knows nothing about sockets. Starting a
//! session is a callback supplied by the caller.

use std::error::Error;
use std::io::{self, Write};

/// Static description of one role's menu.
#[derive(Debug)]
pub struct Menu {
    pub title: &'static str,
    /// Full label of option 1, also accepted as typed input.
    pub start_label: &'static str,
    pub help: &'static [&'static str],
}

pub const SERVER: Menu = Menu {
    title: "=== Server Menu ===",
    start_label: "Start Server",
    help: &[
        "Help: This is a simple server program.",
        "Start Server: Starts the server and listens for clients.",
        "Exit: Closes the server.",
    ],
};

pub const CLIENT: Menu = Menu {
    title: "=== Client Menu ===",
    start_label: "Start Client",
    help: &[
        "Help: This is a simple client program.",
        "Start Client: Connects to the server and sends messages.",
        "Exit: Closes the client.",
    ],
};

/// A recognized menu choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Start,
    Help,
    Exit,
}

/// How the menu loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    SessionRan,
    Exited,
}

impl Menu {
    /// Match one line of input against the options.
    ///
    /// Accepts the number, the short word, or the full label, ignoring case
    /// and surrounding whitespace.
    pub fn parse(&self, input: &str) -> Option<Choice> {
        let input = input.trim().to_lowercase();
        match input.as_str() {
            "1" | "start" => Some(Choice::Start),
            "2" | "help" => Some(Choice::Help),
            "3" | "exit" => Some(Choice::Exit),
            other if other == self.start_label.to_lowercase() => Some(Choice::Start),
            _ => None,
        }
    }

    fn show<W: Write>(&self, output: &mut W) -> io::Result<()> {
        writeln!(output, "{}", self.title)?;
        writeln!(output, "1. {}", self.start_label)?;
        writeln!(output, "2. Help")?;
        writeln!(output, "3. Exit")
    }
}

/// Run the menu until a session has run or the operator exits.
///
/// `read_line` appends one line to the buffer and returns the bytes read,
/// with zero meaning end of input, like [`std::io::BufRead::read_line`].
pub fn run<L, W, F>(
    menu: &Menu,
    mut read_line: L,
    output: &mut W,
    mut start: F,
) -> Result<Outcome, Box<dyn Error>>
where
    L: FnMut(&mut String) -> io::Result<usize>,
    W: Write,
    F: FnMut() -> Result<(), Box<dyn Error>>,
{
    menu.show(output)?;
    let mut line = String::new();

    loop {
        write!(output, "> ")?;
        output.flush()?;

        line.clear();
        if read_line(&mut line)? == 0 {
            writeln!(output, "Exiting...")?;
            return Ok(Outcome::Exited);
        }

        match menu.parse(&line) {
            Some(Choice::Start) => {
                start()?;
                return Ok(Outcome::SessionRan);
            }
            Some(Choice::Help) => {
                writeln!(output)?;
                for help_line in menu.help {
                    writeln!(output, "{help_line}")?;
                }
                writeln!(output)?;
                menu.show(output)?;
            }
            Some(Choice::Exit) => {
                writeln!(output, "Exiting...")?;
                return Ok(Outcome::Exited);
            }
            None => writeln!(output, "Invalid choice. Please try again.")?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;

    fn drive(menu: &Menu, input: &str) -> (Outcome, usize, String) {
        let mut input = input.as_bytes();
        let mut output = Vec::new();
        let mut starts = 0;

        let outcome = run(menu, |buf| input.read_line(buf), &mut output, || {
            starts += 1;
            Ok(())
        })
        .unwrap();

        (outcome, starts, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_parse_choices() {
        assert_eq!(SERVER.parse("1"), Some(Choice::Start));
        assert_eq!(SERVER.parse(" Start Server \n"), Some(Choice::Start));
        assert_eq!(SERVER.parse("start"), Some(Choice::Start));
        assert_eq!(CLIENT.parse("HELP"), Some(Choice::Help));
        assert_eq!(CLIENT.parse("3"), Some(Choice::Exit));
        assert_eq!(CLIENT.parse("start server"), None);
        assert_eq!(CLIENT.parse("4"), None);
    }

    #[test]
    fn test_start_runs_callback_once() {
        let (outcome, starts, _) = drive(&CLIENT, "1\n1\n");
        assert_eq!(outcome, Outcome::SessionRan);
        assert_eq!(starts, 1);
    }

    #[test]
    fn test_help_then_invalid_then_exit() {
        let (outcome, starts, out) = drive(&SERVER, "help\nbogus\nexit\n");
        assert_eq!(outcome, Outcome::Exited);
        assert_eq!(starts, 0);
        assert!(out.contains("Start Server: Starts the server and listens for clients."));
        assert!(out.contains("Invalid choice. Please try again."));
        assert!(out.ends_with("Exiting...\n"));
    }

    #[test]
    fn test_end_of_input_exits() {
        let (outcome, starts, _) = drive(&SERVER, "");
        assert_eq!(outcome, Outcome::Exited);
        assert_eq!(starts, 0);
    }

    #[test]
    fn test_session_error_propagates() {
        let mut input = "1\n".as_bytes();
        let mut output = Vec::new();

        let result = run(&CLIENT, |buf| input.read_line(buf), &mut output, || {
            Err("bind failed".into())
        });
        assert!(result.is_err());
    }
}
