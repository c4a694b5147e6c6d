use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::command::{run_command, FfmpegCommand};
use crate::config::AnalyzerConfig;
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::hardware::HardwareCapability;

/// seek 到视频末尾时 ffmpeg 取不到帧，抽帧时间点与结尾至少保留这么多秒
const END_OF_STREAM_MARGIN: f64 = 0.05;

/// 有理数帧率（如 30000/1001）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// 解析 "30000/1001" 或 "25" 形式的帧率，分子或分母为 0 时返回 None
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (num, den) = match value.split_once('/') {
            Some((n, d)) => (n.trim().parse().ok()?, d.trim().parse().ok()?),
            None => (value.parse().ok()?, 1),
        };
        if num == 0 || den == 0 {
            return None;
        }
        Some(Self { num, den })
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self { num: 30, den: 1 }
    }
}

/// 待分析的视频
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoInfo {
    pub path: PathBuf,
    /// 时长（秒）
    pub duration: f64,
    pub frame_rate: FrameRate,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// 解析 ffprobe 的 JSON 输出
///
/// 时长缺失视为探测失败；帧率缺失或为 0/0 时回退到 30 fps。
pub fn parse_probe_output(path: &Path, json: &str) -> AnalyzerResult<VideoInfo> {
    let probe: ProbeOutput = serde_json::from_str(json)?;

    let duration = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| AnalyzerError::ProbeFailed(format!("无法获取视频时长: {}", path.display())))?;

    let frame_rate = probe
        .streams
        .first()
        .and_then(|s| {
            s.avg_frame_rate
                .as_deref()
                .and_then(FrameRate::parse)
                .or_else(|| s.r_frame_rate.as_deref().and_then(FrameRate::parse))
        })
        .unwrap_or_default();

    Ok(VideoInfo {
        path: path.to_path_buf(),
        duration,
        frame_rate,
    })
}

/// 视频探测与单帧提取
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// 获取视频时长与帧率
    async fn probe(&self, path: &Path) -> AnalyzerResult<VideoInfo>;

    /// 在 `timestamp` 处提取一帧 JPEG 写入 `output`
    async fn extract_frame(
        &self,
        video: &VideoInfo,
        timestamp: f64,
        output: &Path,
    ) -> AnalyzerResult<()>;
}

/// 基于 ffmpeg / ffprobe 子进程的视频处理器
pub struct VideoProcessor {
    ffmpeg: String,
    ffprobe: String,
    hardware: Arc<HardwareCapability>,
    use_gpu: bool,
    probe_timeout: Duration,
    extract_timeout: Duration,
}

impl VideoProcessor {
    pub fn new(config: &AnalyzerConfig, hardware: Arc<HardwareCapability>) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
            hardware,
            use_gpu: config.use_gpu,
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            extract_timeout: Duration::from_secs(config.extract_timeout_secs),
        }
    }

    async fn try_extract(
        &self,
        video: &VideoInfo,
        timestamp: f64,
        output: &Path,
        hwaccel: Option<&str>,
    ) -> AnalyzerResult<()> {
        let args = FfmpegCommand::new(&video.path, output.to_string_lossy())
            .hwaccel(hwaccel)
            .seek(timestamp)
            .single_frame()
            .jpeg_quality(2)
            .build_args();

        let result = run_command(&self.ffmpeg, &args, self.extract_timeout).await?;
        if !result.success() {
            return Err(AnalyzerError::command_failed(
                &self.ffmpeg,
                format!("抽帧退出码 {:?}", result.exit_code),
                Some(result.stderr_tail(5)),
                result.exit_code,
            ));
        }
        if !output.exists() {
            return Err(AnalyzerError::extraction_failed(timestamp, "ffmpeg 未输出任何帧"));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaSource for VideoProcessor {
    async fn probe(&self, path: &Path) -> AnalyzerResult<VideoInfo> {
        let args: Vec<String> = [
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=avg_frame_rate,r_frame_rate:format=duration",
            "-of",
            "json",
        ]
        .iter()
        .map(|s| s.to_string())
        .chain(std::iter::once(path.to_string_lossy().into_owned()))
        .collect();

        let output = run_command(&self.ffprobe, &args, self.probe_timeout).await?;
        if !output.success() {
            return Err(AnalyzerError::ProbeFailed(format!(
                "ffprobe 退出码 {:?}: {}",
                output.exit_code,
                output.stderr_tail(3)
            )));
        }
        parse_probe_output(path, &output.stdout)
    }

    async fn extract_frame(
        &self,
        video: &VideoInfo,
        timestamp: f64,
        output: &Path,
    ) -> AnalyzerResult<()> {
        let seek = timestamp.min((video.duration - END_OF_STREAM_MARGIN).max(0.0));
        let start = Instant::now();

        if let Some(accel) = self.hardware.hwaccel_for(self.use_gpu) {
            match self.try_extract(video, seek, output, Some(accel)).await {
                Ok(()) => {
                    debug!("🖼️  [抽帧] t={:.3}s ({}) 耗时 {:.0}ms", seek, accel, start.elapsed().as_millis());
                    return Ok(());
                }
                Err(e) => {
                    warn!("⚠️  [抽帧] 硬件解码失败，回退到软件解码 (t={:.3}s): {}", seek, e);
                }
            }
        }

        self.try_extract(video, seek, output, None)
            .await
            .map_err(|e| match e {
                e @ AnalyzerError::ExtractionFailed { .. } => e,
                other => AnalyzerError::extraction_failed(timestamp, other.to_string()),
            })?;
        debug!("🖼️  [抽帧] t={:.3}s (cpu) 耗时 {:.0}ms", seek, start.elapsed().as_millis());
        Ok(())
    }
}
