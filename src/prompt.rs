//! Interactive operator gate between instances

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Operator answer at the prompt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptDecision {
    /// Go on to the next instance
    Continue,
    /// Stop the whole rolling update
    Stop,
    /// Go on and never ask again for the rest of the run
    AlwaysContinue,
}

/// Map one line of operator input to a decision
///
/// Anything other than "n" or "a" (including an empty line) continues.
pub fn parse_answer(line: &str) -> PromptDecision {
    match line.trim().to_lowercase().as_str() {
        "n" => PromptDecision::Stop,
        "a" => PromptDecision::AlwaysContinue,
        _ => PromptDecision::Continue,
    }
}

/// Asks the operator whether to continue after an instance was replaced
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Ask about the instance that was just replaced
    async fn prompt<'a>(
        &self,
        instance_id: &str,
        node_name: Option<&'a str>,
    ) -> Result<PromptDecision, Error>;
}

/// Prompter reading answers from a line-oriented reader
pub struct TerminalPrompter<R, W> {
    io: Mutex<(R, W)>,
}

impl<R, W> TerminalPrompter<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Create a prompter over a reader and writer
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }
}

impl TerminalPrompter<BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    /// Prompter on the process's standard input and output
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

#[async_trait]
impl<R, W> Prompter for TerminalPrompter<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn prompt<'a>(
        &self,
        instance_id: &str,
        node_name: Option<&'a str>,
    ) -> Result<PromptDecision, Error> {
        let mut io = self.io.lock().await;
        let (reader, writer) = &mut *io;

        let target = match node_name {
            Some(node) => format!("instance {instance_id} (node {node})"),
            None => format!("instance {instance_id}"),
        };
        let question = format!(
            "Replaced {target}. Continue? (Y)es, (N)o, (A)lwaysYes: [Y] "
        );
        writer
            .write_all(question.as_bytes())
            .await
            .map_err(|e| Error::prompt(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::prompt(e.to_string()))?;

        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| Error::prompt(e.to_string()))?;
        if read == 0 {
            return Ok(PromptDecision::Continue);
        }
        Ok(parse_answer(&line))
    }
}
