//! AI 转场检测模型（TransNetV2 类模型）客户端
//!
//! 模型以 HTTP 服务形式部署：`POST {url}/predict`，请求体 `{"video_path": ...}`，
//! 返回 `{"predictions": [每帧转场概率]}`。

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AnalyzerError, AnalyzerResult};

/// 逐帧返回转场概率的模型
#[async_trait]
pub trait TransitionModel: Send + Sync {
    async fn predict(&self, video: &Path) -> AnalyzerResult<Vec<f64>>;
}

/// 启动时确定的模型可用性，之后只读
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModelAvailability {
    pub transition_model: bool,
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    video_path: &'a str,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predictions: Vec<f64>,
}

/// 通过 HTTP 调用的转场检测模型
pub struct HttpTransitionModel {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransitionModel {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AnalyzerResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// 启动时检查模型服务是否就绪（GET /health 在 `timeout` 内返回 2xx）
    ///
    /// 客户端本身的超时按推理耗时设置，这里单独使用较短的探测超时。
    pub async fn is_ready(&self, timeout: Duration) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).timeout(timeout).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("🤖 [转场模型] 模型服务就绪: {}", self.base_url);
                true
            }
            Ok(resp) => {
                warn!("⚠️  [转场模型] 健康检查返回 {}: {}", resp.status(), url);
                false
            }
            Err(e) => {
                warn!("⚠️  [转场模型] 无法连接模型服务 {}: {}", url, e);
                false
            }
        }
    }
}

#[async_trait]
impl TransitionModel for HttpTransitionModel {
    async fn predict(&self, video: &Path) -> AnalyzerResult<Vec<f64>> {
        let url = format!("{}/predict", self.base_url);
        let video_path = video.to_string_lossy();
        let response = self
            .client
            .post(&url)
            .json(&PredictRequest {
                video_path: &video_path,
            })
            .send()
            .await
            .map_err(|e| AnalyzerError::ModelUnavailable(format!("请求模型服务失败: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalyzerError::ModelUnavailable(format!(
                "模型服务返回 {}",
                status
            )));
        }

        let body: PredictResponse = response
            .json()
            .await
            .map_err(|e| AnalyzerError::ModelUnavailable(format!("模型响应格式错误: {}", e)))?;
        Ok(body.predictions)
    }
}
