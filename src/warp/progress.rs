//! Progress reporting.

/// Receives progress as a fraction in [0, 1]; returning `false` requests
/// cancellation.
pub trait ProgressSink {
    fn report(&mut self, fraction: f64, message: &str) -> bool;
}

impl<F> ProgressSink for F
where
    F: FnMut(f64, &str) -> bool,
{
    fn report(&mut self, fraction: f64, message: &str) -> bool {
        self(fraction, message)
    }
}

/// Sink that ignores every report.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _fraction: f64, _message: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_sink() {
        let mut seen = Vec::new();
        let mut sink = |f: f64, _: &str| {
            seen.push(f);
            f < 0.5
        };
        assert!(sink.report(0.25, "a"));
        assert!(!sink.report(0.75, "b"));
        assert_eq!(seen, vec![0.25, 0.75]);
    }

    #[test]
    fn test_no_progress() {
        assert!(NoProgress.report(1.0, ""));
    }
}
