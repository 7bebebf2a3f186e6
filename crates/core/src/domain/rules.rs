use std::collections::BTreeMap;

const HIGH_SCORE: f64 = 10.0;
const MEDIUM_SCORE: f64 = 7.0;
const LOW_SCORE: f64 = 5.0;
const VERY_LOW_SCORE: f64 = 3.0;
const NO_SCORE: f64 = 0.0;

/// Half-open interval `[min, max)` carrying a tier score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdRange {
    pub min: f64,
    pub max: f64,
    pub score: f64,
}

impl ThresholdRange {
    pub const fn new(min: f64, max: f64, score: f64) -> Self {
        Self { min, max, score }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value < self.max
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringRule {
    pub ranges: Vec<ThresholdRange>,
    pub weight: f64,
}

impl ScoringRule {
    pub fn new(weight: f64, ranges: Vec<ThresholdRange>) -> Self {
        Self { ranges, weight }
    }

    /// First range containing `value`, in rule order.
    pub fn tier(&self, value: f64) -> Option<&ThresholdRange> {
        self.ranges.iter().find(|r| r.contains(value))
    }

    /// Weighted sub-score; values outside every range contribute nothing.
    pub fn evaluate(&self, value: f64) -> f64 {
        self.tier(value)
            .map(|r| r.score * self.weight)
            .unwrap_or(0.0)
    }
}

/// Immutable rule table keyed by metric name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScoringRules {
    rules: BTreeMap<String, ScoringRule>,
}

impl ScoringRules {
    pub fn new(rules: BTreeMap<String, ScoringRule>) -> Self {
        Self { rules }
    }

    pub fn canonical() -> Self {
        let rules = [
            ("P/E Ratio", pe_ratio_rule()),
            ("EPS", eps_rule()),
            ("Revenue Growth", revenue_growth_rule()),
            (crate::domain::market::DEBT_EQUITY_RATIO, debt_equity_rule()),
            ("Dividend Yield", dividend_yield_rule()),
            ("Market Cap", market_cap_rule()),
        ]
        .into_iter()
        .map(|(name, rule)| (name.to_string(), rule))
        .collect();
        Self { rules }
    }

    pub fn get(&self, metric_name: &str) -> Option<&ScoringRule> {
        self.rules.get(metric_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScoringRule)> {
        self.rules.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.rules.values().map(|r| r.weight).sum()
    }

    /// Highest attainable total score.
    pub fn max_score(&self) -> f64 {
        self.rules
            .values()
            .map(|r| {
                r.ranges
                    .iter()
                    .map(|t| t.score)
                    .fold(0.0_f64, f64::max)
                    * r.weight
            })
            .sum()
    }
}

fn pe_ratio_rule() -> ScoringRule {
    const LOW: f64 = 10.0;
    const MEDIUM: f64 = 20.0;
    const HIGH: f64 = 30.0;
    ScoringRule::new(
        0.16,
        vec![
            ThresholdRange::new(0.0, LOW, HIGH_SCORE),
            ThresholdRange::new(LOW, MEDIUM, MEDIUM_SCORE),
            ThresholdRange::new(MEDIUM, HIGH, LOW_SCORE),
            ThresholdRange::new(HIGH, f64::INFINITY, VERY_LOW_SCORE),
            ThresholdRange::new(f64::NEG_INFINITY, 0.0, NO_SCORE),
        ],
    )
}

fn eps_rule() -> ScoringRule {
    const LOW: f64 = 2.0;
    const HIGH: f64 = 5.0;
    ScoringRule::new(
        0.12,
        vec![
            ThresholdRange::new(HIGH, f64::INFINITY, HIGH_SCORE),
            ThresholdRange::new(LOW, HIGH, MEDIUM_SCORE),
            ThresholdRange::new(0.0, LOW, VERY_LOW_SCORE),
            ThresholdRange::new(f64::NEG_INFINITY, 0.0, NO_SCORE),
        ],
    )
}

fn revenue_growth_rule() -> ScoringRule {
    const HIGH: f64 = 0.1;
    ScoringRule::new(
        0.24,
        vec![
            ThresholdRange::new(HIGH, f64::INFINITY, HIGH_SCORE),
            ThresholdRange::new(0.0, HIGH, MEDIUM_SCORE),
            ThresholdRange::new(f64::NEG_INFINITY, 0.0, VERY_LOW_SCORE),
        ],
    )
}

fn debt_equity_rule() -> ScoringRule {
    const MEDIUM: f64 = 0.5;
    const HIGH: f64 = 1.0;
    ScoringRule::new(
        0.16,
        vec![
            ThresholdRange::new(0.0, MEDIUM, HIGH_SCORE),
            ThresholdRange::new(MEDIUM, HIGH, MEDIUM_SCORE),
            ThresholdRange::new(HIGH, f64::INFINITY, VERY_LOW_SCORE),
            ThresholdRange::new(f64::NEG_INFINITY, 0.0, NO_SCORE),
        ],
    )
}

fn dividend_yield_rule() -> ScoringRule {
    const MEDIUM: f64 = 0.03;
    const HIGH: f64 = 0.05;
    ScoringRule::new(
        0.08,
        vec![
            ThresholdRange::new(HIGH, f64::INFINITY, HIGH_SCORE),
            ThresholdRange::new(MEDIUM, HIGH, MEDIUM_SCORE),
            ThresholdRange::new(0.0, MEDIUM, VERY_LOW_SCORE),
            ThresholdRange::new(f64::NEG_INFINITY, 0.0, NO_SCORE),
        ],
    )
}

fn market_cap_rule() -> ScoringRule {
    const SMALL_CAP: f64 = 2_000_000_000.0;
    const MID_CAP: f64 = 20_000_000_000.0;
    const LARGE_CAP: f64 = 100_000_000_000.0;
    ScoringRule::new(
        0.24,
        vec![
            ThresholdRange::new(LARGE_CAP, f64::INFINITY, HIGH_SCORE),
            ThresholdRange::new(MID_CAP, LARGE_CAP, MEDIUM_SCORE),
            ThresholdRange::new(SMALL_CAP, MID_CAP, LOW_SCORE),
            ThresholdRange::new(0.0, SMALL_CAP, VERY_LOW_SCORE),
            ThresholdRange::new(f64::NEG_INFINITY, 0.0, NO_SCORE),
        ],
    )
}
