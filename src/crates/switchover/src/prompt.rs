//! Interactive confirmation
//!
//! The cutover blocks on a yes/no answer before the destructive phase. The
//! terminal reader is created on first use, so non-interactive runs never
//! touch stdin.

use crate::error::{Result, SwitchoverError};
use async_trait::async_trait;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

/// Asks the operator a yes/no question
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, question: &str) -> Result<bool>;
}

/// Parse a `[y|n]` answer, case-insensitively
pub fn parse_answer(input: &str) -> Option<bool> {
    match input.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Stdin-backed prompt
#[derive(Default)]
pub struct TerminalPrompt {
    lines: Mutex<Option<Lines<BufReader<Stdin>>>>,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Confirm for TerminalPrompt {
    async fn confirm(&self, question: &str) -> Result<bool> {
        let mut guard = self.lines.lock().await;
        let lines = guard.get_or_insert_with(|| BufReader::new(tokio::io::stdin()).lines());
        let mut stdout = tokio::io::stdout();

        loop {
            stdout
                .write_all(format!("{} [y|n] ", question.yellow()).as_bytes())
                .await?;
            stdout.flush().await?;

            let line = lines
                .next_line()
                .await?
                .ok_or_else(|| SwitchoverError::Prompt("stdin closed before an answer was given".to_string()))?;

            match parse_answer(&line) {
                Some(answer) => return Ok(answer),
                None => {
                    stdout
                        .write_all(b"Please answer 'y' or 'n'.\n")
                        .await?;
                }
            }
        }
    }
}

/// Prompt with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

#[async_trait]
impl Confirm for AutoConfirm {
    async fn confirm(&self, question: &str) -> Result<bool> {
        tracing::info!(question = %question, answer = self.0, "Answering confirmation automatically");
        Ok(self.0)
    }
}
