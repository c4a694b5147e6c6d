use std::path::PathBuf;
use thiserror::Error;

/// 场景分析流程的结果类型
pub type AnalyzerResult<T> = Result<T, AnalyzerError>;

/// 场景分析过程中可能出现的错误
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// 请求参数缺失或非法
    #[error("请求参数无效: {0}")]
    InvalidRequest(String),

    #[error("视频文件不存在: {}", .0.display())]
    VideoNotFound(PathBuf),

    /// 外部工具（ffmpeg / ffprobe）不可执行
    #[error("未找到可执行程序: {0}")]
    ToolNotFound(String),

    #[error("{program} 执行失败: {message}")]
    CommandFailed {
        program: String,
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("{program} 执行超时（{secs} 秒）")]
    CommandTimeout { program: String, secs: u64 },

    /// 无法获取视频时长或帧率
    #[error("视频探测失败: {0}")]
    ProbeFailed(String),

    #[error("抽帧失败 (t={timestamp:.3}s): {message}")]
    ExtractionFailed { timestamp: f64, message: String },

    /// AI 转场模型未加载或调用失败
    #[error("转场检测模型不可用: {0}")]
    ModelUnavailable(String),

    #[error("场景分割失败: {0}")]
    Segmentation(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),
}

impl AnalyzerError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn command_failed(
        program: impl Into<String>,
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::CommandFailed {
            program: program.into(),
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn extraction_failed(timestamp: f64, message: impl Into<String>) -> Self {
        Self::ExtractionFailed {
            timestamp,
            message: message.into(),
        }
    }

    pub fn segmentation(message: impl Into<String>) -> Self {
        Self::Segmentation(message.into())
    }

    /// 是否属于调用方输入错误（不应重试，直接返回给客户端）
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_) | Self::VideoNotFound(_))
    }
}
