//! Line-oriented terminal input.

use crate::error::CliResult;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Reads prompted lines from standard input.
pub struct Console {
    lines: Lines<BufReader<Stdin>>,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    /// Creates a console over standard input.
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Prints `prompt` and reads one line. Returns `None` at end of input.
    pub async fn read_line(&mut self, prompt: &str) -> CliResult<Option<String>> {
        print!("{prompt}");
        std::io::stdout().flush()?;
        Ok(self.lines.next_line().await?)
    }

    /// Asks a yes/no question. Anything but `y` or `yes` is a no.
    pub async fn confirm(&mut self, question: &str) -> CliResult<bool> {
        let answer = self.read_line(&format!("{question} (y/n): ")).await?;
        Ok(answer.as_deref().is_some_and(is_yes))
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_answers() {
        assert!(is_yes("y"));
        assert!(is_yes(" Y \r"));
        assert!(is_yes("yes"));
        assert!(!is_yes("n"));
        assert!(!is_yes(""));
        assert!(!is_yes("yep"));
    }
}
