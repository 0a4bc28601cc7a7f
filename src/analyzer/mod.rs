// Analyzer module: one submodule per analytics engine.

pub mod benchmark;
pub mod channels;
pub mod market;
pub mod promotions;
pub mod stats;
pub mod trends;

pub use benchmark::BenchmarkAnalyzer;
pub use channels::ChannelStrategy;
pub use market::CompetitionAnalyzer;
pub use promotions::PromotionAnalyzer;
pub use trends::DashboardAnalyzer;
