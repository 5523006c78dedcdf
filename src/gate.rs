//! Approval gate for operations that need a human yes
//!
//! The CLI builds one [`Approval`] from `--yes` and the terminal state and
//! passes it down explicitly. Nothing below the command layer consults
//! globals to decide whether to ask.

use colored::*;
use std::io::{self, BufRead, IsTerminal, Write};

use crate::error::{Error, Result};

/// Asks the user a yes/no question
pub trait Prompter {
    fn confirm(&self, question: &str) -> bool;
}

/// Prompts on stderr and reads the answer from stdin
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&self, question: &str) -> bool {
        eprint!("{} [y/N] ", question.red());
        if io::stderr().flush().is_err() {
            return false;
        }

        let mut input = String::new();
        if io::stdin().lock().read_line(&mut input).is_err() {
            return false;
        }
        matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

/// How a gated operation obtains consent
#[derive(Clone, Copy)]
pub enum Approval<'a> {
    /// Ask for every gated action
    Interactive(&'a dyn Prompter),
    /// Explicit bypass from the outer boundary (`--yes`)
    Bypass,
    /// No way to ask and no bypass: every gated action is denied
    Refuse,
}

impl<'a> Approval<'a> {
    /// `--yes` wins; otherwise ask only when stdin is a terminal
    pub fn from_cli(assume_yes: bool, prompter: &'a dyn Prompter) -> Self {
        if assume_yes {
            Approval::Bypass
        } else if io::stdin().is_terminal() {
            Approval::Interactive(prompter)
        } else {
            Approval::Refuse
        }
    }

    pub fn is_bypass(&self) -> bool {
        matches!(self, Approval::Bypass)
    }

    /// Fails fast when no action could ever be approved
    pub fn ensure_possible(&self, action: &str) -> Result<()> {
        match self {
            Approval::Refuse => Err(Error::denied(action, "confirmation required; pass --yes to skip")),
            _ => Ok(()),
        }
    }

    /// Obtain consent for one concrete action
    pub fn check(&self, action: &str, subject: &str) -> Result<()> {
        match self {
            Approval::Bypass => Ok(()),
            Approval::Refuse => Err(Error::denied(
                format!("{}: {}", action, subject),
                "confirmation required; pass --yes to skip",
            )),
            Approval::Interactive(prompter) => {
                if prompter.confirm(&format!("{}: {}?", action, subject)) {
                    Ok(())
                } else {
                    Err(Error::denied(format!("{}: {}", action, subject), "declined by user"))
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Prompter;
    use std::cell::RefCell;

    /// Replays canned answers and records every question
    pub struct ScriptedPrompter {
        answers: RefCell<Vec<bool>>,
        pub asked: RefCell<Vec<String>>,
    }

    impl ScriptedPrompter {
        pub fn new(answers: &[bool]) -> Self {
            let mut answers = answers.to_vec();
            answers.reverse();
            Self {
                answers: RefCell::new(answers),
                asked: RefCell::new(Vec::new()),
            }
        }
    }

    impl Prompter for ScriptedPrompter {
        fn confirm(&self, question: &str) -> bool {
            self.asked.borrow_mut().push(question.to_string());
            self.answers.borrow_mut().pop().unwrap_or(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedPrompter;
    use super::*;

    #[test]
    fn test_bypass_and_refuse() {
        assert!(Approval::Bypass.check("run", "ls").is_ok());
        let err = Approval::Refuse.check("run", "ls").unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
        assert!(err.to_string().contains("--yes"));
        assert!(Approval::Refuse.ensure_possible("run").is_err());
    }

    #[test]
    fn test_interactive_asks_each_time() {
        let prompter = ScriptedPrompter::new(&[true, false]);
        let approval = Approval::Interactive(&prompter);
        assert!(approval.check("run", "date").is_ok());
        assert!(approval.check("run", "rm -rf /tmp/x").is_err());
        assert_eq!(prompter.asked.borrow().len(), 2);
        assert!(prompter.asked.borrow()[1].contains("rm -rf /tmp/x"));
    }

    #[test]
    fn test_from_cli_prefers_yes() {
        let prompter = ScriptedPrompter::new(&[]);
        assert!(Approval::from_cli(true, &prompter).is_bypass());
    }
}
