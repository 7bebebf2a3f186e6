use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "Strong Buy")]
    StrongBuy,
    #[serde(rename = "Buy")]
    Buy,
    #[serde(rename = "Hold")]
    Hold,
    #[serde(rename = "Sell")]
    Sell,
    #[serde(rename = "Strong Sell")]
    StrongSell,
}

impl Action {
    /// Breakpoints are inclusive lower bounds, checked from the top tier down.
    pub fn from_score(score: f64) -> Self {
        if score >= 8.0 {
            Action::StrongBuy
        } else if score >= 6.0 {
            Action::Buy
        } else if score >= 4.0 {
            Action::Hold
        } else if score >= 2.0 {
            Action::Sell
        } else {
            Action::StrongSell
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::StrongBuy => "Strong Buy",
            Action::Buy => "Buy",
            Action::Hold => "Hold",
            Action::Sell => "Sell",
            Action::StrongSell => "Strong Sell",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stock_id: Uuid,
    pub score: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub action: Action,
    pub confidence_level: f64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_breakpoints() {
        assert_eq!(Action::from_score(10.0), Action::StrongBuy);
        assert_eq!(Action::from_score(8.0), Action::StrongBuy);
        assert_eq!(Action::from_score(7.99), Action::Buy);
        assert_eq!(Action::from_score(6.0), Action::Buy);
        assert_eq!(Action::from_score(4.0), Action::Hold);
        assert_eq!(Action::from_score(3.5), Action::Sell);
        assert_eq!(Action::from_score(2.0), Action::Sell);
        assert_eq!(Action::from_score(1.99), Action::StrongSell);
        assert_eq!(Action::from_score(0.0), Action::StrongSell);
    }

    #[test]
    fn action_round_trips_through_display_strings() {
        for action in [
            Action::StrongBuy,
            Action::Buy,
            Action::Hold,
            Action::Sell,
            Action::StrongSell,
        ] {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action));
            assert_eq!(serde_json::from_str::<Action>(&json).unwrap(), action);
        }
        assert!(serde_json::from_str::<Action>("\"buy\"").is_err());
    }
}
