use miette::{LabeledSpan, MietteDiagnostic, NamedSource, Report, Severity};

use crate::span::Span;

/// One assembler diagnostic, pinned to a stretch of source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub severity: Severity,
    pub code: &'static str,
    pub span: Span,
    pub text: String,
    pub label: Option<String>,
    pub help: Option<String>,
}

impl Message {
    fn new(severity: Severity, code: &'static str, span: Span, text: impl Into<String>) -> Self {
        Message {
            severity,
            code,
            span,
            text: text.into(),
            label: None,
            help: None,
        }
    }

    pub fn error(code: &'static str, span: Span, text: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, span, text)
    }

    pub fn warning(code: &'static str, span: Span, text: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, span, text)
    }

    /// Informational note, shown as miette advice.
    pub fn info(code: &'static str, span: Span, text: impl Into<String>) -> Self {
        Self::new(Severity::Advice, code, span, text)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Attach source text and turn into a printable report.
    pub fn report(&self, name: &str, src: &str) -> Report {
        let label = match &self.label {
            Some(label) => LabeledSpan::at(self.span, label.clone()),
            None => LabeledSpan::underline(self.span),
        };
        let mut diagnostic = MietteDiagnostic::new(self.text.clone())
            .with_severity(self.severity)
            .with_code(self.code)
            .with_label(label);
        if let Some(help) = &self.help {
            diagnostic = diagnostic.with_help(help.clone());
        }
        Report::new(diagnostic).with_source_code(NamedSource::new(name, src.to_string()))
    }
}

/// Whether any message would make compilation fail.
pub fn has_errors(messages: &[Message]) -> bool {
    messages.iter().any(Message::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Idx;

    #[test]
    fn report_keeps_severity_and_text() {
        let message = Message::warning("asm::alignment", Span::new(Idx(0), 3), "odd address")
            .with_label("here")
            .with_help("use .origin");
        assert!(!message.is_error());
        let report = message.report("test.c8s", "cls\n");
        assert_eq!(report.severity(), Some(Severity::Warning));
        assert_eq!(report.to_string(), "odd address");
        assert!(has_errors(&[
            message,
            Message::error("asm::range", Span::default(), "too big")
        ]));
    }
}
