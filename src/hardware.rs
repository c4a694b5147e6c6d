use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::command::run_command;

/// 转码器的硬件加速能力快照
///
/// 进程启动时探测一次，之后只读，可在并发请求间共享。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HardwareCapability {
    /// ffmpeg 报告的硬件加速方式（如 cuda、vaapi）
    pub accelerators: Vec<String>,
    pub cuda_available: bool,
}

impl HardwareCapability {
    /// 无任何硬件加速
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_accelerators(accelerators: Vec<String>) -> Self {
        let cuda_available = accelerators.iter().any(|a| a == "cuda");
        Self {
            accelerators,
            cuda_available,
        }
    }

    /// 调用方请求使用 GPU 且环境支持时，返回 -hwaccel 的取值
    pub fn hwaccel_for(&self, use_gpu: bool) -> Option<&'static str> {
        if use_gpu && self.cuda_available {
            Some("cuda")
        } else {
            None
        }
    }

    /// 执行 `ffmpeg -hwaccels` 探测硬件加速
    ///
    /// 程序不存在、超时或非零退出都视为软失败，返回空能力集。
    pub async fn probe(ffmpeg: &str, timeout: Duration) -> Self {
        let args = vec!["-hide_banner".to_string(), "-hwaccels".to_string()];
        match run_command(ffmpeg, &args, timeout).await {
            Ok(output) if output.success() => {
                let capability = Self::from_accelerators(parse_hwaccels(&output.stdout));
                info!(
                    "🖥️  [硬件探测] 可用硬件加速: {:?} (CUDA: {})",
                    capability.accelerators, capability.cuda_available
                );
                capability
            }
            Ok(output) => {
                warn!(
                    "⚠️  [硬件探测] ffmpeg -hwaccels 退出码 {:?}，使用软件解码",
                    output.exit_code
                );
                Self::none()
            }
            Err(e) => {
                warn!("⚠️  [硬件探测] 探测失败，使用软件解码: {}", e);
                Self::none()
            }
        }
    }
}

/// 解析 `ffmpeg -hwaccels` 输出，忽略标题和版本信息行
pub fn parse_hwaccels(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.ends_with(':'))
        .filter(|line| !line.contains(' '))
        .map(str::to_string)
        .collect()
}
