//! Error-report stack.
//!
//! Analyses push reports while working and inspect the top between phases.
//! The stack is owned by the solver value; it is never global.

use crate::error::Error;

/// Stable report categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Pivot,
    NaFailed,
    NoConvergence,
    ZeroDivision,
    WrongVoltage,
    Singular,
    Math,
    NonFinite,
}

/// A single entry on the error-report stack.
#[derive(Debug, Clone)]
pub struct Report {
    pub kind: ReportKind,
    pub data: i64,
    pub text: String,
}

impl Report {
    pub fn new(kind: ReportKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            data: 0,
            text: text.into(),
        }
    }

    pub fn with_data(mut self, data: i64) -> Self {
        self.data = data;
        self
    }
}

impl From<&Error> for Report {
    fn from(err: &Error) -> Self {
        let kind = match err {
            Error::Singular => ReportKind::Singular,
            Error::Pivot => ReportKind::Pivot,
            Error::NonFinite => ReportKind::NonFinite,
            Error::NoConvergence(_) => ReportKind::NoConvergence,
            Error::Math(_) => ReportKind::Math,
            Error::ZeroDivision(_) => ReportKind::ZeroDivision,
            Error::WrongVoltage(_) => ReportKind::WrongVoltage,
            _ => ReportKind::NaFailed,
        };
        Report::new(kind, err.to_string())
    }
}

/// LIFO stack of error reports.
#[derive(Debug, Default)]
pub struct ErrorStack {
    reports: Vec<Report>,
}

impl ErrorStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, report: Report) {
        self.reports.push(report);
    }

    pub fn pop(&mut self) -> Option<Report> {
        self.reports.pop()
    }

    pub fn top(&self) -> Option<&Report> {
        self.reports.last()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn clear(&mut self) {
        self.reports.clear();
    }

    /// Logs every report, most recent first, and clears the stack.
    pub fn print(&mut self) {
        while let Some(report) = self.reports.pop() {
            log::error!("{:?}: {}", report.kind, report.text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_is_lifo() {
        let mut stack = ErrorStack::new();
        stack.push(Report::new(ReportKind::Singular, "first"));
        stack.push(Report::new(ReportKind::NoConvergence, "second"));

        assert_eq!(stack.top().unwrap().kind, ReportKind::NoConvergence);
        assert_eq!(stack.pop().unwrap().text, "second");
        assert_eq!(stack.pop().unwrap().text, "first");
        assert!(stack.is_empty());
    }

    #[test]
    fn report_from_error() {
        let report = Report::from(&Error::Singular);
        assert_eq!(report.kind, ReportKind::Singular);
        let report = Report::from(&Error::NoConvergence(42));
        assert_eq!(report.kind, ReportKind::NoConvergence);
    }
}
