pub mod confidence;
pub mod extract;
pub mod recommend;
pub mod scoring;

pub use extract::MetricExtractor;
pub use recommend::RecommendationBuilder;
pub use scoring::ScoringEngine;
