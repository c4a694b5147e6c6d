//! ffmpeg 场景切换滤镜（select + showinfo）适配
//!
//! 对诊断输出的解析是尽力而为的文本匹配，全部收敛在这里，方便用固定的输出样本测试。

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{info, warn};

use crate::command::{run_command, FfmpegCommand};
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::hardware::HardwareCapability;

/// 场景切换检测：返回切换点时间戳（秒）
#[async_trait]
pub trait SceneCutDetector: Send + Sync {
    async fn detect(&self, path: &Path, threshold: f64) -> AnalyzerResult<Vec<f64>>;
}

fn pts_time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"pts_time:\s*(\d+(?:\.\d+)?)").expect("pts_time 正则有效"))
}

/// 从 showinfo 输出中提取 pts_time
pub fn parse_pts_times(diagnostics: &str) -> Vec<f64> {
    diagnostics
        .lines()
        .filter(|line| line.contains("Parsed_showinfo"))
        .filter_map(|line| pts_time_regex().captures(line))
        .filter_map(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
        .collect()
}

/// `select='gt(scene,T)',showinfo` 滤镜表达式
pub fn scene_filter(threshold: f64) -> String {
    format!("select='gt(scene,{})',showinfo", threshold)
}

/// 调用 ffmpeg 场景切换滤镜的检测器
pub struct FfmpegSceneCutDetector {
    ffmpeg: PathBuf,
    hardware: Arc<HardwareCapability>,
    use_gpu: bool,
    timeout: Duration,
}

impl FfmpegSceneCutDetector {
    pub fn new(
        ffmpeg: impl Into<PathBuf>,
        hardware: Arc<HardwareCapability>,
        use_gpu: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            hardware,
            use_gpu,
            timeout,
        }
    }

    async fn run_filter(
        &self,
        path: &Path,
        threshold: f64,
        hwaccel: Option<&str>,
    ) -> AnalyzerResult<crate::command::CommandOutput> {
        // showinfo 在 info 级别输出
        let args = FfmpegCommand::null_output(path)
            .hwaccel(hwaccel)
            .video_filter(scene_filter(threshold))
            .log_level("info")
            .build_args();
        run_command(&self.ffmpeg.to_string_lossy(), &args, self.timeout).await
    }
}

#[async_trait]
impl SceneCutDetector for FfmpegSceneCutDetector {
    async fn detect(&self, path: &Path, threshold: f64) -> AnalyzerResult<Vec<f64>> {
        let program = self.ffmpeg.to_string_lossy().into_owned();
        let mut output = None;

        if let Some(accel) = self.hardware.hwaccel_for(self.use_gpu) {
            let result = self.run_filter(path, threshold, Some(accel)).await?;
            if result.success() {
                output = Some(result);
            } else {
                warn!(
                    "⚠️  [场景检测] 硬件解码退出码 {:?}，关闭硬件加速重试",
                    result.exit_code
                );
            }
        }

        let output = match output {
            Some(output) => output,
            None => self.run_filter(path, threshold, None).await?,
        };

        if !output.success() {
            return Err(AnalyzerError::command_failed(
                program,
                format!("场景切换滤镜退出码 {:?}", output.exit_code),
                Some(output.stderr_tail(5)),
                output.exit_code,
            ));
        }

        let timestamps = parse_pts_times(&output.stderr);
        info!("🔍 [场景检测] 滤镜报告 {} 个切换点 (阈值 {:.2})", timestamps.len(), threshold);
        Ok(timestamps)
    }
}
