use miette::Diagnostic;
use thiserror::Error;
use winnow::error::{Error as WinnowError, ErrMode};

/// Failures while restoring a persisted state record. Restore is
/// all-or-nothing: any of these leaves the in-memory state untouched.
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("unrecognized state record header: {found:?}")]
    #[diagnostic(code(bioscope::session::bad_header))]
    BadHeader { found: String },

    #[error("malformed state record near {0:?}")]
    #[diagnostic(code(bioscope::session::syntax))]
    Syntax(String),

    #[error("state record ends early")]
    #[diagnostic(code(bioscope::session::truncated))]
    Truncated,
}

impl<'a> From<ErrMode<WinnowError<&'a str>>> for Error {
    fn from(err: ErrMode<WinnowError<&'a str>>) -> Self {
        match err {
            ErrMode::Incomplete(_) => Error::Truncated,
            ErrMode::Backtrack(e) | ErrMode::Cut(e) => {
                if e.input.is_empty() {
                    Error::Truncated
                } else {
                    Error::Syntax(snippet(e.input))
                }
            }
        }
    }
}

fn snippet(input: &str) -> String {
    input
        .lines()
        .next()
        .unwrap_or("")
        .chars()
        .take(40)
        .collect()
}
