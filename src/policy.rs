use std::collections::HashMap;

/// Label to probability, as returned by the classifier for one image.
pub type CategoryScores = HashMap<String, f32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// Rejects a photo when any explicit category scores strictly above the
/// threshold. Categories the classifier did not report count as zero.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionPolicy {
    threshold: f32,
    categories: Vec<String>,
}

impl DecisionPolicy {
    pub const DEFAULT_THRESHOLD: f32 = 0.3;
    pub const DEFAULT_CATEGORIES: [&'static str; 3] = ["Sexy", "Porn", "Hentai"];

    pub fn new(threshold: f32, categories: Vec<String>) -> Self {
        Self {
            threshold,
            categories,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Highest-scoring explicit category and its probability.
    pub fn top_explicit<'a>(&'a self, scores: &CategoryScores) -> Option<(&'a str, f32)> {
        self.categories
            .iter()
            .map(|c| (c.as_str(), scores.get(c).copied().unwrap_or(0.0)))
            .fold(None, |best, (label, p)| match best {
                Some((_, best_p)) if best_p >= p => best,
                _ => Some((label, p)),
            })
    }

    pub fn decide(&self, scores: &CategoryScores) -> Decision {
        match self.top_explicit(scores) {
            Some((_, p)) if p > self.threshold => Decision::Reject,
            _ => Decision::Accept,
        }
    }
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_THRESHOLD,
            Self::DEFAULT_CATEGORIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pairs: &[(&str, f32)]) -> CategoryScores {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn accepts_mostly_neutral_photo() {
        let s = scores(&[("Sexy", 0.1), ("Porn", 0.05), ("Hentai", 0.02), ("Neutral", 0.8)]);
        assert_eq!(DecisionPolicy::default().decide(&s), Decision::Accept);
    }

    #[test]
    fn rejects_when_any_explicit_category_exceeds_threshold() {
        let policy = DecisionPolicy::default();
        for label in ["Sexy", "Porn", "Hentai"] {
            let s = scores(&[(label, 0.35), ("Neutral", 0.65)]);
            assert_eq!(policy.decide(&s), Decision::Reject, "{label}");
        }
    }

    #[test]
    fn threshold_is_strict() {
        let policy = DecisionPolicy::default();
        let at = scores(&[("Sexy", 0.3), ("Porn", 0.3), ("Hentai", 0.3)]);
        assert_eq!(policy.decide(&at), Decision::Accept);

        let above = scores(&[("Porn", 0.300_001)]);
        assert_eq!(policy.decide(&above), Decision::Reject);
    }

    #[test]
    fn non_explicit_categories_are_ignored() {
        let s = scores(&[("Drawing", 0.99), ("Neutral", 0.99)]);
        assert_eq!(DecisionPolicy::default().decide(&s), Decision::Accept);
        assert_eq!(DecisionPolicy::default().decide(&CategoryScores::new()), Decision::Accept);
    }

    #[test]
    fn decision_is_idempotent_and_leaves_scores_untouched() {
        let policy = DecisionPolicy::default();
        let s = scores(&[("Sexy", 0.35), ("Porn", 0.1), ("Hentai", 0.1)]);
        let before = s.clone();
        let first = policy.decide(&s);
        let second = policy.decide(&s);
        assert_eq!(first, Decision::Reject);
        assert_eq!(first, second);
        assert_eq!(s, before);
    }

    #[test]
    fn custom_threshold_and_categories() {
        let policy = DecisionPolicy::new(0.9, vec!["Drawing".into()]);
        assert_eq!(policy.decide(&scores(&[("Porn", 0.99)])), Decision::Accept);
        assert_eq!(policy.decide(&scores(&[("Drawing", 0.95)])), Decision::Reject);
    }

    #[test]
    fn top_explicit_reports_the_maximum() {
        let s = scores(&[("Sexy", 0.2), ("Porn", 0.6), ("Hentai", 0.1)]);
        assert_eq!(DecisionPolicy::default().top_explicit(&s), Some(("Porn", 0.6)));
    }
}
