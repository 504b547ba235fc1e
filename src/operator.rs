//! Human-in-the-loop prompts used by interactive tests and manual power
//! control.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin};
use tokio::sync::Mutex;

/// Errors raised while talking to the operator.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OperatorError {
    /// Raised when the prompt cannot be written or the answer read.
    #[error("operator prompt failed: {0}")]
    Io(String),
}

/// Future returned by operator prompts.
pub type OperatorFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, OperatorError>> + Send + 'a>>;

/// Person (or stand-in) able to act on the physical device.
pub trait Operator: Send + Sync + fmt::Debug {
    /// Shows `message` and waits until the operator acknowledges it.
    fn instruct<'a>(&'a self, message: &'a str) -> OperatorFuture<'a, ()>;

    /// Asks a yes/no question.
    fn confirm<'a>(&'a self, question: &'a str) -> OperatorFuture<'a, bool>;
}

/// Operator prompted on the controlling terminal.
///
/// Prompts go to stderr so they never mix with command output. End of input
/// acknowledges instructions and answers "no" to questions, which lets
/// unattended runs finish instead of hanging.
#[derive(Debug)]
pub struct TerminalOperator {
    input: Mutex<BufReader<Stdin>>,
}

impl TerminalOperator {
    /// Creates an operator reading answers from stdin.
    #[must_use]
    pub fn new() -> Self {
        Self {
            input: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }

    async fn ask(&self, prompt: &str) -> Result<Option<String>, OperatorError> {
        write_prompt(&mut tokio::io::stderr(), prompt).await?;
        let mut line = String::new();
        let read = self
            .input
            .lock()
            .await
            .read_line(&mut line)
            .await
            .map_err(|err| OperatorError::Io(err.to_string()))?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_owned()))
    }
}

impl Default for TerminalOperator {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for TerminalOperator {
    fn instruct<'a>(&'a self, message: &'a str) -> OperatorFuture<'a, ()> {
        Box::pin(async move {
            self.ask(&format!("{message}\n[press enter when done] ")).await?;
            Ok(())
        })
    }

    fn confirm<'a>(&'a self, question: &'a str) -> OperatorFuture<'a, bool> {
        Box::pin(async move {
            let answer = self.ask(&format!("{question} [y/N] ")).await?;
            Ok(answer.is_some_and(|text| is_affirmative(&text)))
        })
    }
}

async fn write_prompt<W>(out: &mut W, prompt: &str) -> Result<(), OperatorError>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(prompt.as_bytes())
        .await
        .map_err(|err| OperatorError::Io(err.to_string()))?;
    out.flush()
        .await
        .map_err(|err| OperatorError::Io(err.to_string()))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes")
}
