//! Human-in-the-loop collaborator.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};

pub trait Operator {
    /// Ask whether to run iteration `next_iteration`. `false` cancels the run.
    fn confirm_continue(&self, next_iteration: u32) -> Result<bool>;

    /// Ask for feedback on a checkpoint. `None` means the operator gave up.
    fn checkpoint_feedback(&self, description: &str) -> Result<Option<String>>;
}

/// Operator on the terminal: prompts on stderr, answers on stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioOperator;

impl StdioOperator {
    fn ask(&self, prompt: &str) -> Result<Option<String>> {
        let mut err = std::io::stderr().lock();
        write!(err, "{prompt}").context("write prompt")?;
        err.flush().context("flush prompt")?;
        let mut line = String::new();
        let n = std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("read operator input")?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

impl Operator for StdioOperator {
    fn confirm_continue(&self, next_iteration: u32) -> Result<bool> {
        let answer = self.ask(&format!("Continue with iteration {next_iteration}? [Y/n] "))?;
        Ok(answer.as_deref().is_some_and(is_yes))
    }

    fn checkpoint_feedback(&self, description: &str) -> Result<Option<String>> {
        eprintln!("\nCheckpoint: {description}");
        let answer = self.ask("Feedback for the agent (empty line to stop): ")?;
        Ok(answer.filter(|text| !text.is_empty()))
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.to_ascii_lowercase().as_str(), "" | "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_answer_means_yes() {
        assert!(is_yes(""));
        assert!(is_yes("Y"));
        assert!(is_yes("yes"));
        assert!(!is_yes("n"));
        assert!(!is_yes("stop"));
    }
}
