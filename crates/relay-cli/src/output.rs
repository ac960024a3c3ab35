use std::io::{self, Write};

use relay_stream::{ExecutionBlock, ReducerOutput, ReducerStatus, ToolStatus};

const RESULT_PREVIEW_CHARS: usize = 500;

/// How far each block has been written out.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Printed {
    Text(usize),
    ToolHeader,
    ToolDone,
    Whole,
}

/// Renders successive block snapshots incrementally: growing text is
/// written as a suffix, tool blocks once when they start and once when
/// they finish.
#[derive(Default)]
pub struct BlockPrinter {
    printed: Vec<Printed>,
    quiet: bool,
}

impl BlockPrinter {
    pub fn new(quiet: bool) -> Self {
        Self {
            printed: Vec::new(),
            quiet,
        }
    }

    pub fn render(&mut self, blocks: &[ExecutionBlock], out: &mut impl Write) -> io::Result<()> {
        for (i, block) in blocks.iter().enumerate() {
            let state = self.printed.get(i).copied();
            let next = self.render_block(block, state, out)?;
            match self.printed.get_mut(i) {
                Some(slot) => *slot = next,
                None => self.printed.push(next),
            }
        }
        out.flush()
    }

    fn render_block(
        &self,
        block: &ExecutionBlock,
        state: Option<Printed>,
        out: &mut impl Write,
    ) -> io::Result<Printed> {
        match block {
            ExecutionBlock::Content { text } => {
                let done = match state {
                    Some(Printed::Text(n)) => n,
                    _ => 0,
                };
                write!(out, "{}", &text[done.min(text.len())..])?;
                Ok(Printed::Text(text.len()))
            }
            ExecutionBlock::Thinking { text } => {
                let done = match state {
                    Some(Printed::Text(n)) => n,
                    _ => 0,
                };
                if !self.quiet {
                    write!(out, "\x1b[3;90m{}\x1b[0m", &text[done.min(text.len())..])?;
                }
                Ok(Printed::Text(text.len()))
            }
            ExecutionBlock::ToolUse {
                tool_name,
                status,
                result,
                ..
            } => {
                if state.is_none() {
                    writeln!(out, "\n\x1b[36;1m[tool: {tool_name}]\x1b[0m")?;
                }
                if *status == ToolStatus::Running {
                    return Ok(Printed::ToolHeader);
                }
                if state != Some(Printed::ToolDone) {
                    let result = result.as_deref().unwrap_or_default();
                    if *status == ToolStatus::Error {
                        writeln!(out, "\x1b[31;1m[error: {tool_name}]\x1b[0m {result}")?;
                    } else if !self.quiet {
                        writeln!(out, "\x1b[90m{}\x1b[0m", preview(result))?;
                    }
                }
                Ok(Printed::ToolDone)
            }
            ExecutionBlock::FileOutput {
                file_path,
                operation,
                ..
            } => {
                if state.is_none() {
                    writeln!(out, "\x1b[32m[{operation:?}] {file_path}\x1b[0m")?;
                }
                Ok(Printed::Whole)
            }
            ExecutionBlock::TurnSeparator { turn_number } => {
                if state.is_none() && !self.quiet {
                    writeln!(out, "\n\x1b[90m--- turn {turn_number} ---\x1b[0m")?;
                }
                Ok(Printed::Whole)
            }
        }
    }
}

fn preview(result: &str) -> String {
    if result.len() <= RESULT_PREVIEW_CHARS {
        return result.to_string();
    }
    let mut boundary = RESULT_PREVIEW_CHARS;
    while !result.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!("{}... ({} chars)", &result[..boundary], result.len())
}

/// One-line summary printed after the stream settles.
pub fn summary(output: &ReducerOutput) -> String {
    let turns = output
        .blocks
        .iter()
        .filter(|b| matches!(b, ExecutionBlock::TurnSeparator { .. }))
        .count();
    let failed = output.tool_calls.iter().filter(|t| t.status == ToolStatus::Error).count();
    let status = match output.status {
        ReducerStatus::Completed => "\x1b[32mcompleted\x1b[0m".to_string(),
        ReducerStatus::Aborted => "\x1b[33maborted\x1b[0m".to_string(),
        ReducerStatus::Errored => format!(
            "\x1b[31merror\x1b[0m: {}",
            output.error.as_deref().unwrap_or("unknown")
        ),
        other => format!("{other:?}").to_lowercase(),
    };
    format!(
        "[{status}] turns {turns} / tools {} ({failed} failed) / doc updates {}",
        output.tool_calls.len(),
        output.doc_updates.len(),
    )
}
