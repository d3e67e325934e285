//! Deterministic completeness scoring.
//!
//! The score is a weighted sum over three independent buckets (contact,
//! location, service detail). Each bucket contributes at most its own weight
//! and the total is clamped to [0, 1].

use serde::Serialize;

use crate::models::Service;

/// Description length (chars) that earns the full description share.
const RICH_DESCRIPTION_LEN: usize = 100;
/// Description length (chars) that earns half the description share.
const BASIC_DESCRIPTION_LEN: usize = 20;
/// Share of the detail bucket taken by the description (rest is categories).
const DESCRIPTION_SHARE: f64 = 0.625;

/// Bucket weights. They are rescaled to sum to 1 before scoring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityWeights {
    pub contact: f64,
    pub location: f64,
    pub detail: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            contact: 0.30,
            location: 0.30,
            detail: 0.40,
        }
    }
}

/// Score plus the expected fields the record is missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityAssessment {
    pub score: f64,
    pub missing: Vec<&'static str>,
}

#[derive(Debug, Clone, Default)]
pub struct QualityScorer {
    weights: QualityWeights,
}

impl QualityScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(weights: QualityWeights) -> Self {
        Self { weights }
    }

    pub fn score(&self, service: &Service) -> f64 {
        self.assess(service).score
    }

    pub fn assess(&self, service: &Service) -> QualityAssessment {
        let mut missing = Vec::new();

        let contact = fraction_present(
            &[
                ("phone", has_text(&service.contact.phone)),
                ("email", has_text(&service.contact.email)),
                (
                    "website",
                    has_text(&service.contact.website) || has_text(&service.url),
                ),
            ],
            &mut missing,
        );

        let location = fraction_present(
            &[
                ("address", has_text(&service.location.address)),
                ("suburb", has_text(&service.location.suburb)),
                ("postcode", has_text(&service.location.postcode)),
            ],
            &mut missing,
        );

        let description_len = service
            .description
            .as_deref()
            .map(|d| d.trim().chars().count())
            .unwrap_or(0);
        let description = if description_len >= RICH_DESCRIPTION_LEN {
            1.0
        } else if description_len >= BASIC_DESCRIPTION_LEN {
            0.5
        } else {
            missing.push("description");
            0.0
        };
        let categories = match service.categories.len() {
            0 => {
                missing.push("categories");
                0.0
            }
            1 => 0.5,
            _ => 1.0,
        };
        let detail = description * DESCRIPTION_SHARE + categories * (1.0 - DESCRIPTION_SHARE);

        let QualityWeights {
            contact: wc,
            location: wl,
            detail: wd,
        } = self.normalized_weights();
        let total = contact * wc + location * wl + detail * wd;

        QualityAssessment {
            score: if total.is_nan() {
                0.0
            } else {
                total.clamp(0.0, 1.0)
            },
            missing,
        }
    }

    fn normalized_weights(&self) -> QualityWeights {
        let w = self.weights;
        let contact = w.contact.max(0.0);
        let location = w.location.max(0.0);
        let detail = w.detail.max(0.0);
        let sum = contact + location + detail;
        if sum <= f64::EPSILON {
            return QualityWeights::default();
        }
        QualityWeights {
            contact: contact / sum,
            location: location / sum,
            detail: detail / sum,
        }
    }
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn fraction_present(checks: &[(&'static str, bool)], missing: &mut Vec<&'static str>) -> f64 {
    let mut present = 0usize;
    for &(field, ok) in checks {
        if ok {
            present += 1;
        } else {
            missing.push(field);
        }
    }
    present as f64 / checks.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare() -> Service {
        let mut service = Service::new("test", "1", "Community Pantry");
        service.organization.name = "Pantry Inc".into();
        service
    }

    fn complete() -> Service {
        let mut service = bare();
        service.contact.phone = Some("07 3000 0000".into());
        service.contact.email = Some("hello@pantry.org".into());
        service.contact.website = Some("https://pantry.org".into());
        service.location.address = Some("1 Main St".into());
        service.location.suburb = Some("Fortitude Valley".into());
        service.location.postcode = Some("4006".into());
        service.description = Some("x".repeat(120));
        service.categories.insert("Food".into());
        service.categories.insert("Emergency Relief".into());
        service
    }

    #[test]
    fn bare_record_scores_zero() {
        let assessment = QualityScorer::new().assess(&bare());
        assert_eq!(assessment.score, 0.0);
        assert_eq!(assessment.missing.len(), 8);
    }

    #[test]
    fn complete_record_scores_one() {
        let assessment = QualityScorer::new().assess(&complete());
        assert!((assessment.score - 1.0).abs() < 1e-9);
        assert!(assessment.missing.is_empty());
    }

    #[test]
    fn buckets_contribute_their_weight() {
        let mut service = bare();
        service.contact.phone = Some("07 3000 0000".into());
        service.contact.email = Some("a@b.org".into());
        service.contact.website = Some("https://b.org".into());
        let score = QualityScorer::new().score(&service);
        assert!((score - 0.30).abs() < 1e-9);

        service.categories.insert("Food".into());
        let score = QualityScorer::new().score(&service);
        assert!((score - (0.30 + 0.40 * 0.375 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn score_is_deterministic_and_bounded() {
        let scorer = QualityScorer::with_weights(QualityWeights {
            contact: 5.0,
            location: 5.0,
            detail: 5.0,
        });
        let service = complete();
        let first = scorer.score(&service);
        for _ in 0..10 {
            assert_eq!(scorer.score(&service), first);
        }
        for service in [bare(), complete()] {
            let s = scorer.score(&service);
            assert!((0.0..=1.0).contains(&s));
        }
    }

    #[test]
    fn degenerate_weights_fall_back_to_defaults() {
        let scorer = QualityScorer::with_weights(QualityWeights {
            contact: 0.0,
            location: -1.0,
            detail: 0.0,
        });
        assert!((scorer.score(&complete()) - 1.0).abs() < 1e-9);
    }
}
