use crate::domain::rules::{ScoringRule, ScoringRules, ThresholdRange};
use anyhow::{bail, ensure, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// External (JSON) form of a rule set. `null` bounds are unbounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSetDocument {
    pub rules: BTreeMap<String, RuleDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDocument {
    pub weight: f64,
    pub ranges: Vec<RangeDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeDocument {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub score: f64,
}

impl RuleSetDocument {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text)
            .context("scoring rules are not valid JSON for the rule set schema")
    }

    pub fn load(path: &str) -> anyhow::Result<ScoringRules> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scoring rules from {path}"))?;
        Self::from_json(&text)?.validate_and_into_rules()
    }

    pub fn validate_and_into_rules(self) -> anyhow::Result<ScoringRules> {
        ensure!(!self.rules.is_empty(), "rule set must contain at least one rule");

        let mut rules = BTreeMap::new();
        for (name, doc) in self.rules {
            let name = name.trim().to_string();
            ensure!(!name.is_empty(), "metric name must be non-empty");
            let rule = doc
                .validate_and_into_rule()
                .with_context(|| format!("invalid rule for {name}"))?;
            if rules.insert(name.clone(), rule).is_some() {
                bail!("duplicate rule for {name}");
            }
        }

        let rules = ScoringRules::new(rules);
        let total = rules.total_weight();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            tracing::warn!(total_weight = total, "scoring rule weights do not sum to 1.0");
        }
        Ok(rules)
    }
}

impl RuleDocument {
    fn validate_and_into_rule(self) -> anyhow::Result<ScoringRule> {
        ensure!(
            self.weight.is_finite() && (0.0..=1.0).contains(&self.weight),
            "weight must be between 0 and 1 (got {})",
            self.weight
        );
        ensure!(!self.ranges.is_empty(), "ranges must be non-empty");

        let mut ranges = Vec::with_capacity(self.ranges.len());
        for r in self.ranges {
            let min = r.min.unwrap_or(f64::NEG_INFINITY);
            let max = r.max.unwrap_or(f64::INFINITY);
            ensure!(!min.is_nan() && !max.is_nan(), "range bounds must be numbers");
            ensure!(min < max, "range min must be below max (got [{min}, {max}))");
            ensure!(r.score.is_finite(), "range score must be finite");
            ranges.push(ThresholdRange::new(min, max, r.score));
        }

        ensure_exhaustive(&ranges)?;
        Ok(ScoringRule::new(self.weight, ranges))
    }
}

/// Ranges must tile (-inf, +inf) with no gaps and no overlaps.
fn ensure_exhaustive(ranges: &[ThresholdRange]) -> anyhow::Result<()> {
    let mut sorted: Vec<&ThresholdRange> = ranges.iter().collect();
    sorted.sort_by(|a, b| a.min.total_cmp(&b.min));

    ensure!(
        sorted[0].min == f64::NEG_INFINITY,
        "ranges leave values below {} unscored",
        sorted[0].min
    );
    for pair in sorted.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if lo.max > hi.min {
            bail!(
                "ranges [{}, {}) and [{}, {}) overlap",
                lo.min,
                lo.max,
                hi.min,
                hi.max
            );
        }
        if lo.max < hi.min {
            bail!("ranges leave a gap between {} and {}", lo.max, hi.min);
        }
    }
    let last = sorted[sorted.len() - 1];
    ensure!(
        last.max == f64::INFINITY,
        "ranges leave values from {} upward unscored",
        last.max
    );
    Ok(())
}

impl From<&ScoringRules> for RuleSetDocument {
    fn from(rules: &ScoringRules) -> Self {
        let bound = |v: f64| v.is_finite().then_some(v);
        let rules = rules
            .iter()
            .map(|(name, rule)| {
                let ranges = rule
                    .ranges
                    .iter()
                    .map(|r| RangeDocument {
                        min: bound(r.min),
                        max: bound(r.max),
                        score: r.score,
                    })
                    .collect();
                (
                    name.to_string(),
                    RuleDocument {
                        weight: rule.weight,
                        ranges,
                    },
                )
            })
            .collect();
        Self { rules }
    }
}
