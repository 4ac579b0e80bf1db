//! Operator interaction for secret types that need a human.

use std::collections::VecDeque;
use std::io::IsTerminal;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::{Error, Result};

/// A channel to the operator running the tool.
pub trait Console: Send + Sync {
    /// Returns true if prompts can be answered.
    fn is_interactive(&self) -> bool;

    /// Shows `message` to the operator.
    fn write_line<'a>(&'a self, message: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Asks a question and returns the trimmed answer.
    fn prompt<'a>(&'a self, question: &'a str) -> BoxFuture<'a, Result<String>>;

    /// Asks a yes/no question.
    fn confirm<'a>(&'a self, question: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let answer = self.prompt(&format!("{question} [y/N]")).await?;
            Ok(matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
        })
    }
}

/// Talks to the operator over stdin/stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalConsole;

impl Console for TerminalConsole {
    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal()
    }

    fn write_line<'a>(&'a self, message: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut stderr = tokio::io::stderr();
            stderr
                .write_all(format!("{message}\n").as_bytes())
                .await
                .map_err(|source| Error::Io {
                    path: "<stderr>".to_string(),
                    source,
                })
        })
    }

    fn prompt<'a>(&'a self, question: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let mut stderr = tokio::io::stderr();
            let io_err = |source| Error::Io {
                path: "<terminal>".to_string(),
                source,
            };
            stderr
                .write_all(format!("{question}: ").as_bytes())
                .await
                .map_err(io_err)?;
            stderr.flush().await.map_err(io_err)?;

            let mut line = String::new();
            BufReader::new(tokio::io::stdin())
                .read_line(&mut line)
                .await
                .map_err(io_err)?;
            Ok(line.trim().to_string())
        })
    }
}

/// Refuses every prompt; used for unattended runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractiveConsole;

impl Console for NonInteractiveConsole {
    fn is_interactive(&self) -> bool {
        false
    }

    fn write_line<'a>(&'a self, message: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            tracing::info!("{message}");
            Ok(())
        })
    }

    fn prompt<'a>(&'a self, question: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            Err(Error::storage(format!(
                "cannot prompt '{question}' in a non-interactive session"
            )))
        })
    }
}

/// Answers prompts from a fixed script and records everything shown.
#[derive(Debug, Default)]
pub struct ScriptedConsole {
    answers: Mutex<VecDeque<String>>,
    transcript: Mutex<Vec<String>>,
}

impl ScriptedConsole {
    /// Creates a console that will answer with `answers`, in order.
    #[must_use]
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            transcript: Mutex::new(Vec::new()),
        }
    }

    /// Returns every message and question shown so far.
    #[must_use]
    pub fn transcript(&self) -> Vec<String> {
        self.transcript.lock().clone()
    }
}

impl Console for ScriptedConsole {
    fn is_interactive(&self) -> bool {
        true
    }

    fn write_line<'a>(&'a self, message: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.transcript.lock().push(message.to_string());
            Ok(())
        })
    }

    fn prompt<'a>(&'a self, question: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.transcript.lock().push(question.to_string());
            self.answers
                .lock()
                .pop_front()
                .ok_or_else(|| Error::storage(format!("no scripted answer for '{question}'")))
        })
    }
}
