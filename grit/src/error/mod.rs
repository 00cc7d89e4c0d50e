//! Error reporting

pub use crate::interp::{ErrorKind, Result, RuntimeError};

/// Report a runtime error with ariadne
pub fn report_error(filename: &str, source: &str, error: &RuntimeError) {
    use ariadne::{Color, Label, Report, ReportKind, Source};

    if let Some(span) = error.span {
        Report::build(ReportKind::Error, (filename, span.start..span.end))
            .with_message("Runtime error")
            .with_label(
                Label::new((filename, span.start..span.end))
                    .with_message(&error.message)
                    .with_color(Color::Red),
            )
            .finish()
            .print((filename, Source::from(source)))
            .ok();
    } else {
        // Errors without a span (stack, operand and bracket conditions)
        Report::build(ReportKind::Error, (filename, 0..0))
            .with_message(format!("Runtime error: {}", error.message))
            .finish()
            .print((filename, Source::from(source)))
            .ok();
    }
}
