#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

use crate::ast::Span;

#[derive(Debug, Error, Diagnostic)]
pub enum ParseError {
    #[error("Syntax error: {message}")]
    #[diagnostic(code(serval::parse::syntax))]
    Syntax {
        message: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Duplicate request: {name}")]
    #[diagnostic(
        code(serval::parse::duplicate),
        help("each request block needs a distinct name")
    )]
    Duplicate {
        name: String,
        #[label("duplicate")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Integer literal out of range: {literal}")]
    #[diagnostic(code(serval::parse::number))]
    InvalidNumber {
        literal: String,
        #[label("does not fit in a signed 64-bit integer")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },
}

fn source_span(span: Span) -> miette::SourceSpan {
    (span.start, span.end.saturating_sub(span.start)).into()
}

impl ParseError {
    pub fn syntax(message: impl Into<String>, span: Span, source: &str, filename: &str) -> Self {
        ParseError::Syntax {
            message: message.into(),
            span: source_span(span),
            src: miette::NamedSource::new(filename, source.to_owned()),
        }
    }

    pub fn duplicate(name: impl Into<String>, span: Span, source: &str, filename: &str) -> Self {
        ParseError::Duplicate {
            name: name.into(),
            span: source_span(span),
            src: miette::NamedSource::new(filename, source.to_owned()),
        }
    }

    pub fn invalid_number(
        literal: impl Into<String>,
        span: Span,
        source: &str,
        filename: &str,
    ) -> Self {
        ParseError::InvalidNumber {
            literal: literal.into(),
            span: source_span(span),
            src: miette::NamedSource::new(filename, source.to_owned()),
        }
    }
}
