//! 评分服务客户端
//!
//! 每一帧分别上传给两个外部评分服务：
//! - 裸露/不雅检测服务 `POST /analyze` → `{nudity, immodesty}`
//! - 暴力内容分类服务 `POST /classify` → `{violence}`，可能是数值或带 `general_violence` 的分类表
//!
//! 单个服务调用失败不会升级为错误，只是该服务对应的分数缺失。

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::AnalyzerConfig;
use crate::error::AnalyzerResult;

/// 外部评分服务
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    /// 裸露/不雅检测
    NudityDetector,
    /// 暴力内容分类
    ContentClassifier,
}

impl Collaborator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NudityDetector => "nsfw-detector",
            Self::ContentClassifier => "content-classifier",
        }
    }
}

/// 一帧的评分结果，调用失败的服务对应字段为 None
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreSample {
    pub nudity: Option<f64>,
    pub immodesty: Option<f64>,
    pub violence: Option<f64>,
    /// 成功返回分数的服务
    pub sources: Vec<Collaborator>,
}

impl ScoreSample {
    /// 没有任何服务成功评分
    pub fn is_empty(&self) -> bool {
        self.nudity.is_none() && self.immodesty.is_none() && self.violence.is_none()
    }
}

/// 单次服务调用失败的原因
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("服务返回状态 {0}")]
    Status(StatusCode),

    #[error("请求超时")]
    Timeout,

    #[error("连接失败: {0}")]
    Connect(String),

    #[error("传输错误: {0}")]
    Transport(String),

    #[error("响应格式错误: {0}")]
    Malformed(String),

    #[error("读取帧文件失败: {0}")]
    Io(#[from] std::io::Error),
}

impl ScoringError {
    /// 仅 502/503/504 与连接错误会重试
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status(status) => matches!(
                *status,
                StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
            ),
            Self::Connect(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ScoringError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// 指数退避重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 首次请求之后最多重试次数
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次重试前的等待：base * 2^attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Debug, Deserialize)]
struct NudityResponse {
    nudity: f64,
    immodesty: f64,
}

/// 暴力分数字段：单个数值，或包含 `general_violence` 的分类表
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ViolenceField {
    Score(f64),
    Categories(ViolenceCategories),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ViolenceCategories {
    pub general_violence: f64,
}

impl ViolenceField {
    pub fn score(&self) -> f64 {
        match self {
            Self::Score(v) => *v,
            Self::Categories(c) => c.general_violence,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClassifierResponse {
    violence: ViolenceField,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

fn unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// 解析裸露检测服务的响应体
pub fn decode_nudity(body: &str) -> Result<(f64, f64), ScoringError> {
    let resp: NudityResponse =
        serde_json::from_str(body).map_err(|e| ScoringError::Malformed(e.to_string()))?;
    Ok((unit(resp.nudity), unit(resp.immodesty)))
}

/// 解析内容分类服务的响应体
pub fn decode_violence(body: &str) -> Result<f64, ScoringError> {
    let resp: ClassifierResponse =
        serde_json::from_str(body).map_err(|e| ScoringError::Malformed(e.to_string()))?;
    Ok(unit(resp.violence.score()))
}

/// 对一帧图片评分
#[async_trait]
pub trait FrameScorer: Send + Sync {
    async fn score(&self, frame: &Path) -> ScoreSample;
}

/// 调用两个评分服务的 HTTP 客户端
pub struct ScoringClient {
    client: reqwest::Client,
    nudity_url: String,
    classifier_url: String,
    retry: RetryPolicy,
    /// 所有请求共享的并发调用上限
    permits: Arc<Semaphore>,
}

impl ScoringClient {
    pub fn new(config: &AnalyzerConfig) -> AnalyzerResult<Self> {
        Self::with_endpoints(
            &config.nudity_detector_url,
            &config.content_classifier_url,
            Duration::from_secs(config.scoring_timeout_secs),
            RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.backoff_base_ms),
            },
            config.max_concurrent_calls,
        )
    }

    pub fn with_endpoints(
        nudity_url: &str,
        classifier_url: &str,
        timeout: Duration,
        retry: RetryPolicy,
        max_concurrent_calls: usize,
    ) -> AnalyzerResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            nudity_url: nudity_url.trim_end_matches('/').to_string(),
            classifier_url: classifier_url.trim_end_matches('/').to_string(),
            retry,
            permits: Arc::new(Semaphore::new(max_concurrent_calls.max(1))),
        })
    }

    fn base_url(&self, collaborator: Collaborator) -> &str {
        match collaborator {
            Collaborator::NudityDetector => &self.nudity_url,
            Collaborator::ContentClassifier => &self.classifier_url,
        }
    }

    async fn upload_once(&self, url: &str, image: &[u8]) -> Result<String, ScoringError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ScoringError::Transport(e.to_string()))?;

        let part = Part::bytes(image.to_vec())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new().part("image", part);

        let response = self.client.post(url).multipart(form).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(ScoringError::Status(status));
        }
        Ok(response.text().await?)
    }

    /// 上传图片，按重试策略处理 502/503/504 与连接错误
    async fn upload(
        &self,
        collaborator: Collaborator,
        endpoint: &str,
        image: &[u8],
    ) -> Result<String, ScoringError> {
        let url = format!("{}{}", self.base_url(collaborator), endpoint);
        let mut attempt = 0;
        loop {
            match self.upload_once(&url, image).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        collaborator = collaborator.as_str(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "评分服务调用失败，准备重试: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn score_nudity(&self, image: &[u8]) -> Result<(f64, f64), ScoringError> {
        let body = self
            .upload(Collaborator::NudityDetector, "/analyze", image)
            .await?;
        decode_nudity(&body)
    }

    pub async fn score_violence(&self, image: &[u8]) -> Result<f64, ScoringError> {
        let body = self
            .upload(Collaborator::ContentClassifier, "/classify", image)
            .await?;
        decode_violence(&body)
    }

    /// 查询评分服务的 `GET /health`，返回其 `status` 字段（供就绪检查工具使用）
    pub async fn health(&self, collaborator: Collaborator) -> Result<String, ScoringError> {
        let url = format!("{}/health", self.base_url(collaborator));
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ScoringError::Status(response.status()));
        }
        let body = response.text().await?;
        let health: HealthResponse =
            serde_json::from_str(&body).map_err(|e| ScoringError::Malformed(e.to_string()))?;
        Ok(health.status)
    }
}

#[async_trait]
impl FrameScorer for ScoringClient {
    async fn score(&self, frame: &Path) -> ScoreSample {
        let start = Instant::now();
        let image = match tokio::fs::read(frame).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("⚠️  [评分] {}", ScoringError::Io(e));
                return ScoreSample::default();
            }
        };

        let (nudity, violence) =
            tokio::join!(self.score_nudity(&image), self.score_violence(&image));

        let mut sample = ScoreSample::default();
        match nudity {
            Ok((n, i)) => {
                sample.nudity = Some(n);
                sample.immodesty = Some(i);
                sample.sources.push(Collaborator::NudityDetector);
            }
            Err(e) => warn!(
                "⚠️  [评分] {} 调用失败 ({}): {}",
                Collaborator::NudityDetector.as_str(),
                frame.display(),
                e
            ),
        }
        match violence {
            Ok(v) => {
                sample.violence = Some(v);
                sample.sources.push(Collaborator::ContentClassifier);
            }
            Err(e) => warn!(
                "⚠️  [评分] {} 调用失败 ({}): {}",
                Collaborator::ContentClassifier.as_str(),
                frame.display(),
                e
            ),
        }

        debug!(
            "📊 [评分] {} -> {:?}，耗时 {:.0}ms",
            frame.display(),
            sample,
            start.elapsed().as_millis()
        );
        sample
    }
}
