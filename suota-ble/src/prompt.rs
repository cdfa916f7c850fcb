use std::io::Write as _;

use suota_engine::{Prompt, Question};
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};

/// y/n questions on stdin; end of input counts as no
pub struct StdinPrompt {
    lines: tokio::io::Lines<BufReader<Stdin>>,
}

impl StdinPrompt {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinPrompt {
    fn default() -> Self {
        Self::new()
    }
}

fn question_text(question: Question) -> &'static str {
    match question {
        Question::UpdateAnother => "Update another device? (y/n)",
        Question::RetryAfterFailure => "Do you want to try again? (y/n)",
    }
}

pub fn is_yes(answer: &str) -> bool {
    answer.trim_start().chars().next().is_some_and(|c| c.eq_ignore_ascii_case(&'y'))
}

impl Prompt for StdinPrompt {
    async fn confirm(&mut self, question: Question) -> bool {
        print!("{}\n>>", question_text(question));
        let _ = std::io::stdout().flush();

        match self.lines.next_line().await {
            Ok(Some(answer)) => is_yes(&answer),
            _ => false,
        }
    }
}
