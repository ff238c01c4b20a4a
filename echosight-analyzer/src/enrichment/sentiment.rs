//! Lexicon sentiment scorer
//!
//! Polarity is the mean of the scored polar words in the text. An intensifier
//! multiplies the polar word right after it. A negator within three words
//! before a polar word flips it and halves its weight.

use super::SentimentScorer;
use crate::error::EnrichmentError;
use std::collections::HashMap;

/// Words a negator reaches forward over
const NEGATION_WINDOW: usize = 3;

/// Weight applied to a negated polar word
const NEGATION_FACTOR: f64 = -0.5;

const POLAR_WORDS: &[(&str, f64)] = &[
    ("amazing", 0.6),
    ("awesome", 1.0),
    ("beautiful", 0.85),
    ("best", 1.0),
    ("better", 0.5),
    ("brilliant", 0.9),
    ("cool", 0.35),
    ("delighted", 0.7),
    ("easy", 0.43),
    ("enjoy", 0.4),
    ("excellent", 1.0),
    ("excited", 0.375),
    ("exciting", 0.3),
    ("fantastic", 0.4),
    ("fast", 0.2),
    ("fine", 0.42),
    ("fun", 0.3),
    ("glad", 0.5),
    ("good", 0.7),
    ("great", 0.8),
    ("happy", 0.8),
    ("helpful", 0.5),
    ("impressive", 1.0),
    ("incredible", 0.9),
    ("like", 0.2),
    ("love", 0.5),
    ("loved", 0.7),
    ("lovely", 0.5),
    ("nice", 0.6),
    ("perfect", 1.0),
    ("pleased", 0.5),
    ("positive", 0.23),
    ("recommend", 0.4),
    ("reliable", 0.5),
    ("smooth", 0.4),
    ("solid", 0.3),
    ("stable", 0.3),
    ("success", 0.3),
    ("superb", 1.0),
    ("thanks", 0.2),
    ("useful", 0.3),
    ("win", 0.8),
    ("wonderful", 1.0),
    ("wow", 0.1),
    ("angry", -0.5),
    ("annoying", -0.8),
    ("awful", -1.0),
    ("bad", -0.7),
    ("boring", -1.0),
    ("broken", -0.4),
    ("buggy", -0.5),
    ("crash", -0.4),
    ("crashes", -0.4),
    ("disappointed", -0.75),
    ("disappointing", -0.6),
    ("disaster", -0.8),
    ("dislike", -0.4),
    ("fail", -0.5),
    ("failed", -0.5),
    ("failure", -0.3),
    ("hate", -0.8),
    ("horrible", -1.0),
    ("lame", -0.5),
    ("laggy", -0.4),
    ("mediocre", -0.3),
    ("negative", -0.3),
    ("pathetic", -1.0),
    ("poor", -0.4),
    ("problem", -0.3),
    ("sad", -0.5),
    ("scam", -0.8),
    ("slow", -0.3),
    ("stupid", -0.8),
    ("terrible", -1.0),
    ("ugly", -0.7),
    ("unusable", -0.8),
    ("useless", -0.5),
    ("worse", -0.4),
    ("worst", -1.0),
    ("wrong", -0.5),
];

const INTENSIFIERS: &[(&str, f64)] = &[
    ("absolutely", 1.4),
    ("barely", 0.4),
    ("extremely", 1.5),
    ("highly", 1.3),
    ("incredibly", 1.5),
    ("quite", 1.1),
    ("really", 1.3),
    ("slightly", 0.5),
    ("so", 1.2),
    ("somewhat", 0.7),
    ("super", 1.3),
    ("totally", 1.3),
    ("very", 1.3),
];

const NEGATORS: &[&str] = &["never", "no", "nor", "not", "nothing", "without"];

/// Rule-based polarity model over an embedded English lexicon
pub struct LexiconSentiment {
    polarity: HashMap<&'static str, f64>,
    intensity: HashMap<&'static str, f64>,
}

impl LexiconSentiment {
    pub fn new() -> Self {
        Self {
            polarity: POLAR_WORDS.iter().copied().collect(),
            intensity: INTENSIFIERS.iter().copied().collect(),
        }
    }

    fn is_negator(token: &str) -> bool {
        NEGATORS.contains(&token) || token.ends_with("n't")
    }
}

impl Default for LexiconSentiment {
    fn default() -> Self {
        Self::new()
    }
}

impl SentimentScorer for LexiconSentiment {
    fn name(&self) -> &'static str {
        "lexicon"
    }

    fn polarity(&self, text: &str) -> Result<f64, EnrichmentError> {
        let mut scores = Vec::new();
        let mut modifier = 1.0;
        let mut negation_left = 0usize;

        for token in tokenize(text) {
            if Self::is_negator(&token) {
                negation_left = NEGATION_WINDOW;
                modifier = 1.0;
                continue;
            }

            if let Some(factor) = self.intensity.get(token.as_str()) {
                modifier *= factor;
                continue;
            }

            if let Some(polarity) = self.polarity.get(token.as_str()) {
                let mut score = polarity * modifier;
                if negation_left > 0 {
                    score *= NEGATION_FACTOR;
                }
                scores.push(score.clamp(-1.0, 1.0));
                negation_left = 0;
            } else {
                negation_left = negation_left.saturating_sub(1);
            }
            modifier = 1.0;
        }

        if scores.is_empty() {
            return Ok(0.0);
        }

        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        Ok(mean.clamp(-1.0, 1.0))
    }
}

/// Lowercased words; apostrophes stay inside words so "don't" is one token
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '\u{2019}'))
        .map(|word| word.trim_matches(|c| c == '\'' || c == '\u{2019}'))
        .filter(|word| !word.is_empty())
        .map(|word| word.replace('\u{2019}', "'").to_lowercase())
}
