// Codes already processed within one import run.
//
// Box ladders in particular are listed under every year they span, so the
// same code can come back while scanning older years.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct VisitedSet {
    codes: HashSet<String>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    pub fn mark_seen(&mut self, code: &str) {
        self.codes.insert(code.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_and_reports_codes() {
        let mut visited = VisitedSet::new();
        assert!(!visited.seen("A1"));
        visited.mark_seen("A1");
        assert!(visited.seen("A1"));
        assert!(!visited.seen("a1"));
        visited.mark_seen("A1");
        assert!(visited.seen("A1"));
    }
}
