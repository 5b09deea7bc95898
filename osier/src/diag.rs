//! Error sink: collects structured diagnostics and formats them.

use std::io::{self, Write};

use osier_syntax::{ParseError, SourceId};

use crate::source::{SourceLocation, SourceReader};

/// One collected diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Where the problem was observed, when known.
    pub location: Option<SourceLocation>,
    /// Pipeline stage or grammar production.
    pub context: String,
    /// Human-readable description.
    pub message: String,
}

impl core::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{location}: {}: {}", self.context, self.message),
            None => write!(f, "{}: {}", self.context, self.message),
        }
    }
}

/// Gathers diagnostics during a compilation.
///
/// The core never throws past this sink: recoverable failures are recorded
/// here and surface as a `false` compilation result; invariant violations
/// panic.
#[derive(Debug, Default)]
pub struct ErrorSink {
    diagnostics: Vec<Diagnostic>,
}

impl ErrorSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a diagnostic.
    pub fn report(
        &mut self,
        location: Option<SourceLocation>,
        context: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            location,
            context: context.into(),
            message: message.into(),
        });
    }

    /// Records a parse error, resolving its location against `sources`.
    ///
    /// `file_base` is the global source offset of the file the tokens came
    /// from.
    pub fn report_parse_error(
        &mut self,
        sources: &SourceReader,
        file_base: u32,
        error: &ParseError,
    ) {
        let location = match error {
            ParseError::UnexpectedToken { range, .. }
            | ParseError::InvalidSyntax { range, .. } => {
                sources.resolve(SourceId::new(file_base + range.begin))
            }
            ParseError::UnexpectedEndOfStream { .. } | ParseError::OutOfMemory { .. } => None,
        };

        let context = match error {
            ParseError::UnexpectedEndOfStream { context }
            | ParseError::UnexpectedToken { context, .. }
            | ParseError::InvalidSyntax { context, .. }
            | ParseError::OutOfMemory { context } => *context,
        };

        self.report(location, context, error.to_string());
    }

    /// Diagnostics collected so far.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Whether anything was reported.
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    /// Formats every diagnostic to `out`, one per line.
    pub fn print_all(&self, out: &mut dyn Write) -> io::Result<()> {
        for diagnostic in &self.diagnostics {
            writeln!(out, "error: {diagnostic}")?;
        }

        Ok(())
    }
}
