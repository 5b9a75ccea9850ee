use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Raw facial expression labels reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

impl Expression {
    /// Fixed iteration order. Ties between equal scores resolve to the entry
    /// that appears first here.
    pub const ALL: [Expression; 7] = [
        Expression::Neutral,
        Expression::Happy,
        Expression::Sad,
        Expression::Angry,
        Expression::Fearful,
        Expression::Disgusted,
        Expression::Surprised,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Happy => "happy",
            Expression::Sad => "sad",
            Expression::Angry => "angry",
            Expression::Fearful => "fearful",
            Expression::Disgusted => "disgusted",
            Expression::Surprised => "surprised",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|expression| expression.label().eq_ignore_ascii_case(label.trim()))
    }

    /// Music mood recommended for this expression.
    pub fn mood(self) -> Mood {
        match self {
            Expression::Happy => Mood::Happy,
            Expression::Sad => Mood::Sad,
            Expression::Angry | Expression::Surprised => Mood::Energetic,
            Expression::Fearful | Expression::Disgusted => Mood::Calm,
            Expression::Neutral => Mood::Chill,
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Expression::Happy => "😊",
            Expression::Sad => "😢",
            Expression::Angry => "😠",
            Expression::Surprised => "😲",
            Expression::Fearful => "😨",
            Expression::Disgusted => "🤢",
            Expression::Neutral => "😐",
        }
    }

    /// Short line shown under a classified result.
    pub fn encouragement(self) -> &'static str {
        match self {
            Expression::Happy => "Great to see you happy! Enjoy uplifting music.",
            Expression::Sad => "We'll play comforting music to lift your spirits.",
            Expression::Angry => "Let's calm down with some relaxing tunes.",
            Expression::Neutral => "We'll find music that matches your balanced mood.",
            _ => "Enjoy music tailored to your emotions.",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Music categories offered by the recommendation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mood {
    Happy,
    Sad,
    Energetic,
    Calm,
    Chill,
}

impl Mood {
    pub const ALL: [Mood; 5] = [Mood::Happy, Mood::Sad, Mood::Energetic, Mood::Calm, Mood::Chill];

    pub fn as_str(self) -> &'static str {
        match self {
            Mood::Happy => "Happy",
            Mood::Sad => "Sad",
            Mood::Energetic => "Energetic",
            Mood::Calm => "Calm",
            Mood::Chill => "Chill",
        }
    }

    /// Title used for the recommended playlist.
    pub fn playlist_title(self) -> String {
        format!("{} Mood Songs", self.as_str())
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps an arbitrary expression label to a mood. Unknown labels fall back to
/// [`Mood::Chill`].
pub fn mood_for_label(label: &str) -> Mood {
    Expression::from_label(label)
        .map(Expression::mood)
        .unwrap_or(Mood::Chill)
}

/// Confidence per expression for a single detected face.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, f32>", into = "BTreeMap<String, f32>")]
pub struct ExpressionScores {
    values: [f32; 7],
}

impl ExpressionScores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter; values are clamped to [0, 1].
    pub fn with(mut self, expression: Expression, confidence: f32) -> Self {
        self.set(expression, confidence);
        self
    }

    pub fn set(&mut self, expression: Expression, confidence: f32) {
        let value = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.values[expression.index()] = value;
    }

    pub fn get(&self, expression: Expression) -> f32 {
        self.values[expression.index()]
    }

    /// Scores in the fixed vocabulary order.
    pub fn iter(&self) -> impl Iterator<Item = (Expression, f32)> + '_ {
        Expression::ALL
            .into_iter()
            .map(move |expression| (expression, self.get(expression)))
    }
}

impl From<BTreeMap<String, f32>> for ExpressionScores {
    fn from(raw: BTreeMap<String, f32>) -> Self {
        raw.iter().fold(Self::default(), |scores, (label, value)| {
            match Expression::from_label(label) {
                Some(expression) => scores.with(expression, *value),
                None => scores,
            }
        })
    }
}

impl From<ExpressionScores> for BTreeMap<String, f32> {
    fn from(scores: ExpressionScores) -> Self {
        scores
            .iter()
            .map(|(expression, value)| (expression.label().to_string(), value))
            .collect()
    }
}

impl FromIterator<(Expression, f32)> for ExpressionScores {
    fn from_iter<T: IntoIterator<Item = (Expression, f32)>>(iter: T) -> Self {
        iter.into_iter()
            .fold(Self::default(), |scores, (expression, value)| {
                scores.with(expression, value)
            })
    }
}
