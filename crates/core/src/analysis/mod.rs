use serde::{Deserialize, Serialize};

use crate::{Expression, ExpressionScores, Mood};

/// Scores below this value are considered too ambiguous to trust.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.55;

/// Interpreted outcome of a single detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub expression: Expression,
    /// Score of the strongest raw expression. Kept as-is even when the
    /// expression itself was overridden to `neutral`.
    pub confidence: f32,
    pub mood: Mood,
}

impl Classification {
    /// Confidence as a rounded percentage.
    pub fn percent(&self) -> u32 {
        (self.confidence * 100.0).round() as u32
    }

    /// One-line summary, e.g. `Happy (80%)  Happy Music`.
    pub fn headline(&self) -> String {
        let label = self.expression.label();
        let mut chars = label.chars();
        let capitalised = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
            None => String::new(),
        };
        format!("{capitalised} ({}%)  {} Music", self.percent(), self.mood)
    }
}

/// Turns raw expression scores into a music mood.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoodClassifier {
    threshold: f32,
}

impl Default for MoodClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl MoodClassifier {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Picks the strongest expression, falling back to `neutral` when the
    /// winning score is below the threshold.
    pub fn classify(&self, scores: &ExpressionScores) -> Classification {
        let (strongest, confidence) = scores.iter().fold(
            (Expression::Neutral, f32::NEG_INFINITY),
            |best, candidate| if candidate.1 > best.1 { candidate } else { best },
        );

        let expression = if confidence < self.threshold {
            Expression::Neutral
        } else {
            strongest
        };

        Classification {
            expression,
            confidence,
            mood: expression.mood(),
        }
    }
}
