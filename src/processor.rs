use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aggregator::{aggregate, SceneResult};
use crate::config::AnalyzerConfig;
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::hardware::HardwareCapability;
use crate::sampler::sample_timestamps;
use crate::scene_cut::FfmpegSceneCutDetector;
use crate::scene_detector::{Scene, SceneDetector, SegmentationMethod, SegmentationParams};
use crate::scoring::{FrameScorer, ScoreSample, ScoringClient};
use crate::transition_model::{HttpTransitionModel, ModelAvailability, TransitionModel};
use crate::video_processor::{MediaSource, VideoInfo, VideoProcessor};

/// 请求未指定时使用的分析参数
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub processing_dir: PathBuf,
    pub scene_threshold: f64,
    pub sample_count: usize,
    pub sampling_interval: f64,
}

impl From<&AnalyzerConfig> for AnalysisSettings {
    fn from(config: &AnalyzerConfig) -> Self {
        Self {
            processing_dir: config.processing_dir.clone(),
            scene_threshold: config.scene_threshold,
            sample_count: config.sample_count,
            sampling_interval: config.sampling_interval,
        }
    }
}

/// 单次分析请求的可选参数
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    pub method: Option<SegmentationMethod>,
    pub scene_threshold: Option<f64>,
    pub sample_count: Option<usize>,
    pub sampling_interval: Option<f64>,
}

/// 分析结果
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub video_path: String,
    pub duration: f64,
    pub method: SegmentationMethod,
    /// 按场景编号排序，与分割结果一一对应
    pub scenes: Vec<SceneResult>,
}

/// 单帧处理的结局
#[derive(Debug)]
enum FrameOutcome {
    Scored(ScoreSample),
    /// 两个评分服务都没有返回分数
    Unscored,
    ExtractionFailed(AnalyzerError),
}

/// 临时帧文件，离开作用域时删除
struct FrameFile {
    path: PathBuf,
}

impl FrameFile {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FrameFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("⚠️  [清理] 删除临时帧失败 {}: {}", self.path.display(), e);
            }
        }
    }
}

/// 单次请求的临时目录，请求结束时删除
struct RequestWorkspace {
    dir: PathBuf,
}

impl RequestWorkspace {
    async fn create(root: &Path) -> AnalyzerResult<Self> {
        let dir = root.join(uuid::Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }
}

impl Drop for RequestWorkspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("⚠️  [清理] 删除临时目录失败 {}: {}", self.dir.display(), e);
            }
        }
    }
}

/// 场景分析流水线：分割 → 逐场景（采样 → 抽帧 → 评分 → 汇总）→ 组装结果
pub struct SceneAnalyzer {
    media: Arc<dyn MediaSource>,
    detector: SceneDetector,
    scorer: Arc<dyn FrameScorer>,
    hardware: Arc<HardwareCapability>,
    settings: AnalysisSettings,
}

impl SceneAnalyzer {
    pub fn new(
        media: Arc<dyn MediaSource>,
        detector: SceneDetector,
        scorer: Arc<dyn FrameScorer>,
        hardware: Arc<HardwareCapability>,
        settings: AnalysisSettings,
    ) -> Self {
        Self {
            media,
            detector,
            scorer,
            hardware,
            settings,
        }
    }

    /// 启动时调用一次：探测硬件、确认转场模型是否可用、创建各个客户端
    pub async fn from_config(config: &AnalyzerConfig) -> AnalyzerResult<Self> {
        let hardware = Arc::new(
            HardwareCapability::probe(
                &config.ffmpeg_path,
                Duration::from_secs(config.probe_timeout_secs),
            )
            .await,
        );

        let transition_model: Option<Arc<dyn TransitionModel>> = match &config.transition_model_url {
            Some(url) => {
                let model =
                    HttpTransitionModel::new(url, Duration::from_secs(config.detection_timeout_secs))?;
                if model.is_ready(Duration::from_secs(config.probe_timeout_secs)).await {
                    Some(Arc::new(model))
                } else {
                    warn!("⚠️  [启动] 转场模型不可用，AI 分割策略将返回错误");
                    None
                }
            }
            None => {
                info!("[启动] 未配置 TRANSITION_MODEL_URL，AI 分割策略不可用");
                None
            }
        };

        let cut_detector = Arc::new(FfmpegSceneCutDetector::new(
            &config.ffmpeg_path,
            hardware.clone(),
            config.use_gpu,
            Duration::from_secs(config.detection_timeout_secs),
        ));
        let media = Arc::new(VideoProcessor::new(config, hardware.clone()));
        let scorer = Arc::new(ScoringClient::new(config)?);

        Ok(Self::new(
            media,
            SceneDetector::new(cut_detector, transition_model),
            scorer,
            hardware,
            AnalysisSettings::from(config),
        ))
    }

    pub fn hardware(&self) -> &HardwareCapability {
        &self.hardware
    }

    pub fn availability(&self) -> ModelAvailability {
        self.detector.availability()
    }

    /// 分析一个视频
    ///
    /// 只有视频不存在、无法探测或分割失败时返回错误；
    /// 单帧或单个场景的失败只会降级该场景，不影响其他场景。
    pub async fn analyze(&self, video_path: &Path, options: &AnalyzeOptions) -> AnalyzerResult<AnalysisReport> {
        let total_start = Instant::now();
        info!("🎬 [场景分析] 开始分析视频: {}", video_path.display());

        if !video_path.is_file() {
            return Err(AnalyzerError::VideoNotFound(video_path.to_path_buf()));
        }

        // 1. 探测视频信息
        let video = self.media.probe(video_path).await.map_err(|e| {
            error!("❌ [场景分析] 视频探测失败: {}", e);
            e
        })?;
        info!(
            "✅ [场景分析] 视频时长 {:.2}秒，帧率 {:.2} fps",
            video.duration,
            video.frame_rate.as_f64()
        );

        // 2. 场景分割
        let method = options.method.unwrap_or_else(|| self.detector.default_method());
        let params = SegmentationParams {
            filter_threshold: options.scene_threshold.unwrap_or(self.settings.scene_threshold),
            interval_secs: options.sampling_interval.unwrap_or(self.settings.sampling_interval),
        };
        let scenes = self.detector.segment(&video, method, &params).await.map_err(|e| {
            error!("❌ [场景分析] 场景分割失败 ({}): {}", method.as_str(), e);
            e
        })?;

        // 3. 逐场景评分
        let sample_count = options.sample_count.unwrap_or(self.settings.sample_count);
        let workspace = RequestWorkspace::create(&self.settings.processing_dir).await?;
        let scoring_start = Instant::now();
        let mut results = Vec::with_capacity(scenes.len());
        for scene in &scenes {
            let job = SceneJob {
                media: self.media.clone(),
                scorer: self.scorer.clone(),
                video: video.clone(),
                work_dir: workspace.dir.clone(),
                sample_count,
            };
            let scene = *scene;
            // 每个场景在独立任务中执行，单个场景 panic 只降级该场景
            let mut task = AbortOnDrop(tokio::spawn(async move { job.run(&scene).await }));
            let result = match (&mut task.0).await {
                Ok(result) => result,
                Err(e) => {
                    error!("❌ [场景分析] 场景 {} 处理失败，按未评分处理: {}", scene.index, e);
                    SceneResult::unscored(&scene)
                }
            };
            results.push(result);
        }
        drop(workspace);

        let unscored = results.iter().filter(|r| r.analysis.confidence == 0.0).count();
        info!(
            "✅ [场景分析] 评分完成: {} 个场景（{} 个未能评分），耗时 {:.2}秒",
            results.len(),
            unscored,
            scoring_start.elapsed().as_secs_f64()
        );
        info!(
            "🎉 [场景分析] 分析完成！总耗时: {:.2}秒",
            total_start.elapsed().as_secs_f64()
        );

        Ok(AnalysisReport {
            video_path: video_path.to_string_lossy().into_owned(),
            duration: video.duration,
            method,
            scenes: results,
        })
    }
}

/// 请求被取消时终止仍在运行的场景任务
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// 单个场景的处理任务：采样 → 抽帧 → 评分 → 汇总
struct SceneJob {
    media: Arc<dyn MediaSource>,
    scorer: Arc<dyn FrameScorer>,
    video: VideoInfo,
    work_dir: PathBuf,
    sample_count: usize,
}

impl SceneJob {
    async fn run(&self, scene: &Scene) -> SceneResult {
        let timestamps = sample_timestamps(scene, self.sample_count);
        let mut samples = Vec::with_capacity(timestamps.len());
        for timestamp in timestamps {
            match self.process_frame(scene, timestamp).await {
                FrameOutcome::Scored(sample) => samples.push(sample),
                FrameOutcome::Unscored => {
                    warn!("⚠️  [场景 {}] t={:.3}s 所有评分服务均失败", scene.index, timestamp);
                }
                FrameOutcome::ExtractionFailed(e) => {
                    warn!("⚠️  [场景 {}] t={:.3}s 抽帧失败: {}", scene.index, timestamp, e);
                }
            }
        }

        let result = aggregate(scene, &samples);
        debug!(
            "📊 [场景 {}] [{:.2}s, {:.2}s) 有效样本 {} 个 -> {:?}",
            scene.index, scene.start, scene.end, samples.len(), result.analysis
        );
        result
    }

    /// 抽帧并评分；帧文件在两个评分调用都结束后立即删除
    async fn process_frame(&self, scene: &Scene, timestamp: f64) -> FrameOutcome {
        let frame = FrameFile {
            path: self
                .work_dir
                .join(format!("scene_{:04}_{:.3}.jpg", scene.index, timestamp)),
        };

        if let Err(e) = self.media.extract_frame(&self.video, timestamp, frame.path()).await {
            return FrameOutcome::ExtractionFailed(e);
        }

        let sample = self.scorer.score(frame.path()).await;
        drop(frame);

        if sample.is_empty() {
            FrameOutcome::Unscored
        } else {
            FrameOutcome::Scored(sample)
        }
    }
}
