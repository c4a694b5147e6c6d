use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AnalyzerError, AnalyzerResult};
use crate::scene_cut::SceneCutDetector;
use crate::transition_model::{ModelAvailability, TransitionModel};
use crate::video_processor::{FrameRate, VideoInfo};

/// 转场概率阈值，超过即视为切换帧
pub const TRANSITION_PROBABILITY_THRESHOLD: f64 = 0.5;
/// AI 模型策略的最小场景时长（秒）
pub const AI_MIN_SCENE_SECS: f64 = 1.0;
/// ffmpeg 滤镜策略的最小场景时长（秒）
pub const FILTER_MIN_SCENE_SECS: f64 = 2.0;
pub const DEFAULT_FILTER_THRESHOLD: f64 = 0.3;
pub const DEFAULT_INTERVAL_SECS: f64 = 30.0;
/// 固定间隔策略允许的最小间隔（秒）
pub const MIN_INTERVAL_SECS: f64 = 1.0;

/// 场景分割策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationMethod {
    /// AI 转场检测模型（TransNetV2）
    AiModel,
    /// ffmpeg 场景切换滤镜
    FilterBased,
    /// 固定间隔切分
    FixedInterval,
}

impl SegmentationMethod {
    /// 解析请求中的 `scene_detection_method`，无法识别的值按 AI 模型处理
    pub fn from_wire(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "ffmpeg" | "filter_based" => Self::FilterBased,
            "sampling" | "fixed_interval" => Self::FixedInterval,
            _ => Self::AiModel,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiModel => "ai_model",
            Self::FilterBased => "filter_based",
            Self::FixedInterval => "fixed_interval",
        }
    }
}

/// 分割参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentationParams {
    /// ffmpeg 场景切换灵敏度
    pub filter_threshold: f64,
    /// 固定间隔策略的间隔（秒）
    pub interval_secs: f64,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            filter_threshold: DEFAULT_FILTER_THRESHOLD,
            interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

/// 视频中一段连续的时间区间
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Scene {
    /// 场景编号（从 0 开始）
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

impl Scene {
    pub fn new(index: usize, start: f64, end: f64) -> Self {
        Self {
            index,
            start,
            end,
            duration: end - start,
        }
    }

    pub fn midpoint(&self) -> f64 {
        (self.start + self.end) / 2.0
    }
}

/// 规整切换点：排序，去掉 (0, duration) 之外的点，再合并过近的切换点
///
/// 每组切换点以组内第一个点为锚点：与锚点间隔小于 `min_gap` 的点替换该组已接受的点，
/// 超出锚点窗口但与已接受点仍过近的点直接丢弃。替换不会移动锚点，
/// 因此连续的密集切换只会在每个窗口内合并，不会整段合并成一个切换点。
pub fn merge_close_boundaries(mut boundaries: Vec<f64>, min_gap: f64, duration: f64) -> Vec<f64> {
    boundaries.retain(|b| b.is_finite() && *b > 0.0 && *b < duration);
    boundaries.sort_by(|a, b| a.total_cmp(b));

    let mut accepted: Vec<f64> = Vec::with_capacity(boundaries.len());
    let mut anchor = f64::NEG_INFINITY;
    for boundary in boundaries {
        match accepted.last_mut() {
            Some(last) if boundary - *last < min_gap => {
                if boundary - anchor < min_gap {
                    *last = boundary;
                }
            }
            _ => {
                accepted.push(boundary);
                anchor = boundary;
            }
        }
    }
    accepted
}

/// 由切换点生成首尾相接的场景，覆盖 [0, duration]
///
/// 没有切换点时整段视频作为一个场景。
pub fn scenes_from_boundaries(boundaries: &[f64], duration: f64) -> Vec<Scene> {
    let mut scenes = Vec::with_capacity(boundaries.len() + 1);
    let mut prev = 0.0;
    for &boundary in boundaries {
        scenes.push(Scene::new(scenes.len(), prev, boundary));
        prev = boundary;
    }
    scenes.push(Scene::new(scenes.len(), prev, duration.max(prev)));
    scenes
}

/// 固定间隔切换点：interval, 2*interval, ... （严格小于 duration）
pub fn fixed_interval_boundaries(duration: f64, interval: f64) -> Vec<f64> {
    const EPSILON: f64 = 1e-9;
    (1..)
        .map(|k| k as f64 * interval)
        .take_while(|t| *t < duration - EPSILON)
        .collect()
}

/// 转场概率超过阈值的帧，换算为秒
pub fn transition_boundaries(probabilities: &[f64], frame_rate: FrameRate, threshold: f64) -> Vec<f64> {
    let fps = frame_rate.as_f64();
    probabilities
        .iter()
        .enumerate()
        .filter(|(_, p)| **p > threshold)
        .map(|(frame, _)| frame as f64 / fps)
        .collect()
}

/// 场景分割引擎
pub struct SceneDetector {
    cut_detector: Arc<dyn SceneCutDetector>,
    /// 仅在启动时模型就绪的情况下存在
    transition_model: Option<Arc<dyn TransitionModel>>,
}

impl SceneDetector {
    pub fn new(
        cut_detector: Arc<dyn SceneCutDetector>,
        transition_model: Option<Arc<dyn TransitionModel>>,
    ) -> Self {
        Self {
            cut_detector,
            transition_model,
        }
    }

    pub fn availability(&self) -> ModelAvailability {
        ModelAvailability {
            transition_model: self.transition_model.is_some(),
        }
    }

    /// 请求未指定策略时：模型可用则用 AI 模型，否则用 ffmpeg 滤镜
    pub fn default_method(&self) -> SegmentationMethod {
        if self.transition_model.is_some() {
            SegmentationMethod::AiModel
        } else {
            SegmentationMethod::FilterBased
        }
    }

    /// 按指定策略分割视频
    ///
    /// 策略本身失败时直接返回错误，不会替换为其他策略；
    /// 策略没有产生任何切换点时返回覆盖整段视频的单个场景。
    pub async fn segment(
        &self,
        video: &VideoInfo,
        method: SegmentationMethod,
        params: &SegmentationParams,
    ) -> AnalyzerResult<Vec<Scene>> {
        let start = Instant::now();
        let boundaries = match method {
            SegmentationMethod::AiModel => {
                let model = self.transition_model.as_ref().ok_or_else(|| {
                    AnalyzerError::ModelUnavailable("转场检测模型未加载".to_string())
                })?;
                let probabilities = model.predict(&video.path).await?;
                let raw = transition_boundaries(
                    &probabilities,
                    video.frame_rate,
                    TRANSITION_PROBABILITY_THRESHOLD,
                );
                merge_close_boundaries(raw, AI_MIN_SCENE_SECS, video.duration)
            }
            SegmentationMethod::FilterBased => {
                let raw = self
                    .cut_detector
                    .detect(&video.path, params.filter_threshold)
                    .await?;
                merge_close_boundaries(raw, FILTER_MIN_SCENE_SECS, video.duration)
            }
            SegmentationMethod::FixedInterval => {
                if !(params.interval_secs.is_finite() && params.interval_secs >= MIN_INTERVAL_SECS) {
                    return Err(AnalyzerError::invalid_request(format!(
                        "sampling_interval 不能小于 {} 秒: {}",
                        MIN_INTERVAL_SECS, params.interval_secs
                    )));
                }
                fixed_interval_boundaries(video.duration, params.interval_secs)
            }
        };

        if boundaries.is_empty() {
            warn!(
                "⚠️  [场景分割] {} 未检测到切换点，整段视频作为单个场景",
                method.as_str()
            );
        }

        let scenes = scenes_from_boundaries(&boundaries, video.duration);
        info!(
            "✅ [场景分割] {} 完成: {} 个场景，耗时 {:.2}秒",
            method.as_str(),
            scenes.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(scenes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};

    struct FixedCuts(Vec<f64>);

    #[async_trait]
    impl SceneCutDetector for FixedCuts {
        async fn detect(&self, _path: &Path, _threshold: f64) -> AnalyzerResult<Vec<f64>> {
            Ok(self.0.clone())
        }
    }

    struct FailingCuts;

    #[async_trait]
    impl SceneCutDetector for FailingCuts {
        async fn detect(&self, _path: &Path, _threshold: f64) -> AnalyzerResult<Vec<f64>> {
            Err(AnalyzerError::command_failed("ffmpeg", "exit 1", None, Some(1)))
        }
    }

    struct FixedModel(Vec<f64>);

    #[async_trait]
    impl TransitionModel for FixedModel {
        async fn predict(&self, _video: &Path) -> AnalyzerResult<Vec<f64>> {
            Ok(self.0.clone())
        }
    }

    fn video(duration: f64) -> VideoInfo {
        VideoInfo {
            path: PathBuf::from("/videos/test.mp4"),
            duration,
            frame_rate: FrameRate::new(10, 1),
        }
    }

    fn assert_covers(scenes: &[Scene], duration: f64) {
        assert!(!scenes.is_empty());
        assert_eq!(scenes[0].start, 0.0);
        assert_eq!(scenes.last().unwrap().end, duration);
        for (i, pair) in scenes.windows(2).enumerate() {
            assert_eq!(pair[0].end, pair[1].start);
            assert!(pair[0].start < pair[1].start);
            assert_eq!(pair[0].index, i);
        }
        for scene in scenes {
            assert!((scene.duration - (scene.end - scene.start)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_method_from_wire() {
        assert_eq!(SegmentationMethod::from_wire("transnetv2"), SegmentationMethod::AiModel);
        assert_eq!(SegmentationMethod::from_wire("ffmpeg"), SegmentationMethod::FilterBased);
        assert_eq!(SegmentationMethod::from_wire("sampling"), SegmentationMethod::FixedInterval);
        assert_eq!(SegmentationMethod::from_wire("FILTER_BASED"), SegmentationMethod::FilterBased);
        assert_eq!(SegmentationMethod::from_wire("whatever"), SegmentationMethod::AiModel);
    }

    #[test]
    fn test_merge_keeps_later_boundary() {
        assert_eq!(merge_close_boundaries(vec![1.0, 1.5], 2.0, 10.0), vec![1.5]);
        assert_eq!(
            merge_close_boundaries(vec![6.0, 1.0, 3.5, 9.9], 2.0, 10.0),
            vec![1.0, 3.5, 6.0, 9.9]
        );
    }

    #[test]
    fn test_dense_cuts_keep_one_boundary_per_window() {
        // 每 1.5 秒一个切换点：每个 2 秒窗口保留一个，而不是整段合并成一个
        let raw: Vec<f64> = (1..40).map(|k| k as f64 * 1.5).collect();
        let merged = merge_close_boundaries(raw, FILTER_MIN_SCENE_SECS, 60.0);
        let expected: Vec<f64> = (0..13).map(|i| 3.0 + 4.5 * i as f64).collect();
        assert_eq!(merged, expected);

        let scenes = scenes_from_boundaries(&merged, 60.0);
        assert_eq!(scenes.len(), 14);
        assert_covers(&scenes, 60.0);
        assert!(scenes.iter().all(|s| s.duration <= 4.5 + 1e-9));
    }

    #[test]
    fn test_merge_drops_out_of_range() {
        assert_eq!(
            merge_close_boundaries(vec![0.0, -1.0, 10.0, 12.0, f64::NAN, 5.0], 2.0, 10.0),
            vec![5.0]
        );
    }

    #[test]
    fn test_merged_boundaries_respect_min_gap() {
        let raw = vec![0.4, 0.9, 1.3, 2.0, 2.2, 3.9, 4.0, 4.1, 7.0, 7.5, 9.0];
        for min_gap in [AI_MIN_SCENE_SECS, FILTER_MIN_SCENE_SECS] {
            let merged = merge_close_boundaries(raw.clone(), min_gap, 10.0);
            for pair in merged.windows(2) {
                assert!(pair[1] - pair[0] >= min_gap, "{:?}", merged);
            }
        }
    }

    #[test]
    fn test_fixed_interval_partition() {
        let scenes = scenes_from_boundaries(&fixed_interval_boundaries(90.0, 30.0), 90.0);
        assert_eq!(scenes.len(), 3);
        assert_eq!(
            scenes.iter().map(|s| (s.start, s.end)).collect::<Vec<_>>(),
            vec![(0.0, 30.0), (30.0, 60.0), (60.0, 90.0)]
        );
        assert!(scenes.iter().all(|s| s.duration == 30.0));

        let scenes = scenes_from_boundaries(&fixed_interval_boundaries(95.0, 30.0), 95.0);
        assert_eq!(scenes.len(), 4);
        assert!((scenes[3].duration - 5.0).abs() < 1e-9);
        assert_covers(&scenes, 95.0);
    }

    #[test]
    fn test_fixed_interval_scene_count_is_ceil() {
        for (duration, interval) in [(10.0, 3.0), (61.5, 30.0), (29.9, 30.0), (120.0, 7.0), (1.0, 0.25)] {
            let scenes = scenes_from_boundaries(&fixed_interval_boundaries(duration, interval), duration);
            assert_eq!(scenes.len() as f64, (duration / interval).ceil(), "{} / {}", duration, interval);
            assert_covers(&scenes, duration);
        }
    }

    #[test]
    fn test_no_boundaries_is_single_scene() {
        let scenes = scenes_from_boundaries(&[], 42.0);
        assert_eq!(scenes, vec![Scene::new(0, 0.0, 42.0)]);
    }

    #[test]
    fn test_transition_boundaries_use_frame_rate() {
        let probs = [0.0, 0.1, 0.9, 0.2, 0.5, 0.51];
        let times = transition_boundaries(&probs, FrameRate::new(2, 1), 0.5);
        assert_eq!(times, vec![1.0, 2.5]);
    }

    #[tokio::test]
    async fn test_filter_scenario_merges_close_cuts() {
        let detector = SceneDetector::new(Arc::new(FixedCuts(vec![1.0, 1.5])), None);
        let scenes = detector
            .segment(&video(10.0), SegmentationMethod::FilterBased, &SegmentationParams::default())
            .await
            .unwrap();
        assert_eq!(scenes, vec![Scene::new(0, 0.0, 1.5), Scene::new(1, 1.5, 10.0)]);
    }

    #[tokio::test]
    async fn test_filter_without_cuts_falls_back_to_whole_video() {
        let detector = SceneDetector::new(Arc::new(FixedCuts(vec![])), None);
        let scenes = detector
            .segment(&video(33.0), SegmentationMethod::FilterBased, &SegmentationParams::default())
            .await
            .unwrap();
        assert_eq!(scenes, vec![Scene::new(0, 0.0, 33.0)]);
    }

    #[tokio::test]
    async fn test_filter_failure_propagates() {
        let detector = SceneDetector::new(Arc::new(FailingCuts), None);
        let result = detector
            .segment(&video(10.0), SegmentationMethod::FilterBased, &SegmentationParams::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_ai_model_segmentation() {
        // 10 fps: 第 25 帧 = 2.5s，第 28 帧 = 2.8s（距离不足 1 秒，合并为 2.8s），第 70 帧 = 7.0s
        let mut probs = vec![0.0; 100];
        probs[25] = 0.8;
        probs[28] = 0.7;
        probs[70] = 0.99;
        let detector = SceneDetector::new(
            Arc::new(FailingCuts),
            Some(Arc::new(FixedModel(probs))),
        );
        assert!(detector.availability().transition_model);
        assert_eq!(detector.default_method(), SegmentationMethod::AiModel);

        let scenes = detector
            .segment(&video(10.0), SegmentationMethod::AiModel, &SegmentationParams::default())
            .await
            .unwrap();
        let spans: Vec<(f64, f64)> = scenes.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(spans, vec![(0.0, 2.8), (2.8, 7.0), (7.0, 10.0)]);
        assert_covers(&scenes, 10.0);
    }

    #[tokio::test]
    async fn test_ai_model_unavailable_does_not_fall_back() {
        let detector = SceneDetector::new(Arc::new(FixedCuts(vec![5.0])), None);
        assert_eq!(detector.default_method(), SegmentationMethod::FilterBased);
        let err = detector
            .segment(&video(10.0), SegmentationMethod::AiModel, &SegmentationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyzerError::ModelUnavailable(_)));
    }

    #[tokio::test]
    async fn test_fixed_interval_rejects_sub_second_interval() {
        let detector = SceneDetector::new(Arc::new(FixedCuts(vec![])), None);
        for interval_secs in [0.0, -30.0, 0.000001, 0.999, f64::NAN] {
            let params = SegmentationParams {
                interval_secs,
                ..Default::default()
            };
            let err = detector
                .segment(&video(3600.0), SegmentationMethod::FixedInterval, &params)
                .await
                .unwrap_err();
            assert!(matches!(err, AnalyzerError::InvalidRequest(_)), "{}", interval_secs);
        }

        let params = SegmentationParams {
            interval_secs: MIN_INTERVAL_SECS,
            ..Default::default()
        };
        let scenes = detector
            .segment(&video(10.0), SegmentationMethod::FixedInterval, &params)
            .await
            .unwrap();
        assert_eq!(scenes.len(), 10);
    }
}
