use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    response::{IntoResponse, Json as ResponseJson, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::aggregator::SceneResult;
use crate::error::AnalyzerError;
use crate::hardware::HardwareCapability;
use crate::processor::{AnalyzeOptions, SceneAnalyzer};
use crate::scene_detector::SegmentationMethod;
use crate::transition_model::ModelAvailability;

/// 所有请求共享的分析器
pub type AppState = Arc<SceneAnalyzer>;

/// 构建 HTTP 路由
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/analyze", post(handle_analyze))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `POST /analyze` 请求体
#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeRequest {
    /// 本地视频路径（必填）
    pub video_path: Option<String>,
    /// `ffmpeg_scene_threshold` 的别名
    pub threshold: Option<f64>,
    /// 每个场景的采样帧数
    pub sample_count: Option<usize>,
    /// transnetv2 / ffmpeg / sampling
    pub scene_detection_method: Option<String>,
    pub ffmpeg_scene_threshold: Option<f64>,
    /// 固定间隔分割的间隔（秒）
    pub sampling_interval: Option<f64>,
}

impl AnalyzeRequest {
    pub fn options(&self) -> AnalyzeOptions {
        AnalyzeOptions {
            method: self
                .scene_detection_method
                .as_deref()
                .map(SegmentationMethod::from_wire),
            scene_threshold: self.ffmpeg_scene_threshold.or(self.threshold),
            sample_count: self.sample_count,
            sampling_interval: self.sampling_interval,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub video_path: String,
    pub scene_count: usize,
    pub scenes: Vec<SceneResult>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub hardware: HardwareCapability,
    pub models: ModelAvailability,
}

/// 错误响应：`{"error": message}`
#[derive(Debug)]
pub struct ApiError(AnalyzerError);

impl From<AnalyzerError> for ApiError {
    fn from(e: AnalyzerError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            AnalyzerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AnalyzerError::VideoNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("处理请求失败: {}", self.0);
        } else {
            warn!("请求被拒绝 ({}): {}", status.as_u16(), self.0);
        }
        (status, ResponseJson(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// 分析本地视频文件
pub async fn handle_analyze(
    State(analyzer): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<ResponseJson<AnalyzeResponse>, ApiError> {
    let Json(request) =
        payload.map_err(|e| AnalyzerError::invalid_request(format!("请求体解析失败: {}", e.body_text())))?;
    info!("收到分析请求: {:?}", request);

    let video_path = request
        .video_path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AnalyzerError::invalid_request("缺少 video_path"))?;
    let video_path = PathBuf::from(video_path);

    // 先检查文件，避免为不存在的文件做任何探测
    if !video_path.is_file() {
        return Err(AnalyzerError::VideoNotFound(video_path).into());
    }

    let report = analyzer.analyze(&video_path, &request.options()).await?;

    let response = AnalyzeResponse {
        success: true,
        video_path: report.video_path,
        scene_count: report.scenes.len(),
        scenes: report.scenes,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    info!(
        "分析完成: {}，{} 个场景",
        response.video_path, response.scene_count
    );

    Ok(ResponseJson(response))
}

/// 健康检查：硬件探测结果与 AI 分割模型是否可用
pub async fn health_check(State(analyzer): State<AppState>) -> ResponseJson<HealthResponse> {
    ResponseJson(HealthResponse {
        status: "healthy",
        hardware: analyzer.hardware().clone(),
        models: analyzer.availability(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalyzerResult;
    use crate::processor::AnalysisSettings;
    use crate::scene_cut::SceneCutDetector;
    use crate::scene_detector::SceneDetector;
    use crate::scoring::{Collaborator, FrameScorer, ScoreSample};
    use crate::video_processor::{FrameRate, MediaSource, VideoInfo};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::path::Path;
    use tower::ServiceExt;

    struct StubMedia;

    #[async_trait]
    impl MediaSource for StubMedia {
        async fn probe(&self, path: &Path) -> AnalyzerResult<VideoInfo> {
            Ok(VideoInfo {
                path: path.to_path_buf(),
                duration: 90.0,
                frame_rate: FrameRate::default(),
            })
        }

        async fn extract_frame(&self, _video: &VideoInfo, _timestamp: f64, output: &Path) -> AnalyzerResult<()> {
            std::fs::write(output, b"jpeg")?;
            Ok(())
        }
    }

    struct StubScorer;

    #[async_trait]
    impl FrameScorer for StubScorer {
        async fn score(&self, _frame: &Path) -> ScoreSample {
            ScoreSample {
                nudity: Some(0.5),
                immodesty: Some(0.25),
                violence: Some(0.0),
                sources: vec![Collaborator::NudityDetector, Collaborator::ContentClassifier],
            }
        }
    }

    struct NoCuts;

    #[async_trait]
    impl SceneCutDetector for NoCuts {
        async fn detect(&self, _path: &Path, _threshold: f64) -> AnalyzerResult<Vec<f64>> {
            Ok(Vec::new())
        }
    }

    fn app(processing_dir: &Path) -> Router {
        let analyzer = SceneAnalyzer::new(
            Arc::new(StubMedia),
            SceneDetector::new(Arc::new(NoCuts), None),
            Arc::new(StubScorer),
            Arc::new(HardwareCapability::from_accelerators(vec!["cuda".to_string()])),
            AnalysisSettings {
                processing_dir: processing_dir.to_path_buf(),
                scene_threshold: 0.3,
                sample_count: 3,
                sampling_interval: 30.0,
            },
        );
        router(Arc::new(analyzer))
    }

    fn post_analyze(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/analyze")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_request_options() {
        let request: AnalyzeRequest = serde_json::from_str(
            r#"{"video_path":"/v.mp4","threshold":0.2,"ffmpeg_scene_threshold":0.4,
                "scene_detection_method":"sampling","sampling_interval":15,"sample_count":5}"#,
        )
        .unwrap();
        let options = request.options();
        assert_eq!(options.method, Some(SegmentationMethod::FixedInterval));
        assert_eq!(options.scene_threshold, Some(0.4));
        assert_eq!(options.sampling_interval, Some(15.0));
        assert_eq!(options.sample_count, Some(5));

        let alias: AnalyzeRequest = serde_json::from_str(r#"{"threshold":0.2}"#).unwrap();
        assert_eq!(alias.options().scene_threshold, Some(0.2));
        assert_eq!(alias.options().method, None);
    }

    #[tokio::test]
    async fn test_missing_video_path_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(app(dir.path()), post_analyze("{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("video_path"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(app(dir.path()), post_analyze("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_nonexistent_video_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(
            app(dir.path()),
            post_analyze(r#"{"video_path":"/definitely/not/here.mp4"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_ai_method_without_model_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let video = tempfile::NamedTempFile::new().unwrap();
        let body = serde_json::json!({
            "video_path": video.path(),
            "scene_detection_method": "transnetv2",
        });
        let (status, body) = send(app(dir.path()), post_analyze(body.to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_sub_second_sampling_interval_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let video = tempfile::NamedTempFile::new().unwrap();
        let body = serde_json::json!({
            "video_path": video.path(),
            "scene_detection_method": "sampling",
            "sampling_interval": 0.000001,
        });
        let (status, body) = send(app(dir.path()), post_analyze(body.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("sampling_interval"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_analyze_fixed_interval() {
        let dir = tempfile::tempdir().unwrap();
        let video = tempfile::NamedTempFile::new().unwrap();
        let body = serde_json::json!({
            "video_path": video.path(),
            "scene_detection_method": "sampling",
            "sampling_interval": 30,
        });
        let (status, body) = send(app(dir.path()), post_analyze(body.to_string())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["scene_count"], 3);
        assert!(body["timestamp"].is_string());
        let scenes = body["scenes"].as_array().unwrap();
        assert_eq!(scenes.len(), 3);
        assert_eq!(scenes[1]["start"], 30.0);
        assert_eq!(scenes[1]["end"], 60.0);
        assert_eq!(scenes[1]["duration"], 30.0);
        assert_eq!(scenes[1]["analysis"]["confidence"], 0.5);
        assert!(scenes[0].get("index").is_none());
        // 临时目录在请求结束后清空
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_health_reports_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(app(dir.path()), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["hardware"]["cuda_available"], true);
        assert_eq!(body["models"]["transition_model"], false);
    }
}
