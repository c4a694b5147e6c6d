pub mod aggregator;
pub mod command;
pub mod config;
pub mod error;
pub mod handler;
pub mod hardware;
pub mod processor;
pub mod sampler;
pub mod scene_cut;
pub mod scene_detector;
pub mod scoring;
pub mod transition_model;
pub mod video_processor;

pub use aggregator::{aggregate, SceneAnalysis, SceneResult};
pub use config::{AnalyzerConfig, ConfigLoader, ConfigOverrides};
pub use error::{AnalyzerError, AnalyzerResult};
pub use hardware::HardwareCapability;
pub use processor::{AnalysisReport, AnalyzeOptions, SceneAnalyzer};
pub use scene_detector::{Scene, SceneDetector, SegmentationMethod};
pub use scoring::{FrameScorer, ScoreSample, ScoringClient};
pub use video_processor::{MediaSource, VideoInfo, VideoProcessor};
