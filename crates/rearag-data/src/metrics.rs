//! Answer scoring

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::store::GroundTruth;

static ARTICLES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(a|an|the)\b").unwrap());

/// Lowercase, drop punctuation and English articles, collapse whitespace
pub fn normalize_answer(text: &str) -> String {
    let lower = text.to_lowercase();
    let no_punct: String = lower.chars().filter(|c| !c.is_ascii_punctuation()).collect();
    let no_articles = ARTICLES.replace_all(&no_punct, " ");
    no_articles.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Token-level F1 between a prediction and one reference
pub fn f1_score(prediction: &str, reference: &str) -> f64 {
    let pred = normalize_answer(prediction);
    let gold = normalize_answer(reference);
    let pred_tokens: Vec<&str> = pred.split_whitespace().collect();
    let gold_tokens: Vec<&str> = gold.split_whitespace().collect();
    if pred_tokens.is_empty() || gold_tokens.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for t in &gold_tokens {
        *counts.entry(*t).or_default() += 1;
    }
    let mut same = 0usize;
    for t in &pred_tokens {
        if let Some(c) = counts.get_mut(t).filter(|c| **c > 0) {
            *c -= 1;
            same += 1;
        }
    }
    if same == 0 {
        return 0.0;
    }
    let precision = same as f64 / pred_tokens.len() as f64;
    let recall = same as f64 / gold_tokens.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

/// Best F1 of `prediction` over every acceptable answer
pub fn qa_f1_score(ground_truth: &GroundTruth, prediction: &str) -> f64 {
    ground_truth
        .answers()
        .iter()
        .map(|gold| f1_score(prediction, gold))
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_answer("The  Eiffel Tower!"), "eiffel tower");
        assert_eq!(normalize_answer("An apple, a day"), "apple day");
        assert_eq!(normalize_answer("theatre"), "theatre");
    }

    #[test]
    fn test_exact_and_partial() {
        assert_eq!(f1_score("Tucson", "tucson."), 1.0);
        let partial = f1_score("Tucson Arizona", "Tucson");
        assert!((partial - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(f1_score("Phoenix", "Tucson"), 0.0);
        assert_eq!(f1_score("the", "Tucson"), 0.0);
    }

    #[test]
    fn test_max_over_ground_truths() {
        let gt = GroundTruth::Many(vec!["Tucson".into(), "Tucson, Arizona".into()]);
        assert_eq!(qa_f1_score(&gt, "tucson arizona"), 1.0);
        assert_eq!(qa_f1_score(&GroundTruth::Many(vec![]), "x"), 0.0);
    }
}
