use anyhow::{Context, Result};
use configparser::ini::Ini;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 场景分析服务配置
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
    /// HTTP 监听地址
    pub bind: String,
    /// 裸露/不雅检测服务地址
    pub nudity_detector_url: String,
    /// 暴力内容分类服务地址
    pub content_classifier_url: String,
    /// AI 转场检测模型服务地址（未配置时 AI 分割策略不可用）
    pub transition_model_url: Option<String>,
    /// 是否允许使用 GPU 硬件解码
    pub use_gpu: bool,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// 临时帧文件目录
    pub processing_dir: PathBuf,
    /// ffmpeg 场景切换阈值默认值
    pub scene_threshold: f64,
    /// 每个场景的采样帧数默认值
    pub sample_count: usize,
    /// 固定间隔分割的间隔（秒）默认值
    pub sampling_interval: f64,
    pub probe_timeout_secs: u64,
    pub extract_timeout_secs: u64,
    pub detection_timeout_secs: u64,
    /// 单次评分调用超时
    pub scoring_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// 评分服务的并发调用上限
    pub max_concurrent_calls: usize,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            nudity_detector_url: "http://nsfw-detector:3000".to_string(),
            content_classifier_url: "http://content-classifier:3000".to_string(),
            transition_model_url: None,
            use_gpu: false,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            processing_dir: env::temp_dir().join("scene-analyzer"),
            scene_threshold: 0.3,
            sample_count: 3,
            sampling_interval: 30.0,
            probe_timeout_secs: 10,
            extract_timeout_secs: 30,
            detection_timeout_secs: 600,
            scoring_timeout_secs: 60,
            max_retries: 5,
            backoff_base_ms: 500,
            max_concurrent_calls: 8,
            log_level: "info".to_string(),
        }
    }
}

/// 命令行参数提供的覆盖值
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind: Option<String>,
    pub scene_threshold: Option<f64>,
    pub sample_count: Option<usize>,
    pub sampling_interval: Option<f64>,
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// 各配置来源：环境变量与 INI 文件
struct Sources<'a> {
    file: Option<Ini>,
    env: &'a dyn Fn(&str) -> Option<String>,
}

impl Sources<'_> {
    /// 环境变量优先，其次配置文件
    fn raw(&self, env_key: Option<&str>, section: &str, key: &str) -> Option<String> {
        env_key
            .and_then(|k| (self.env)(k))
            .or_else(|| self.file.as_ref().and_then(|ini| ini.get(section, key)))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T: FromStr>(&self, env_key: Option<&str>, section: &str, key: &str) -> Option<T> {
        self.raw(env_key, section, key).and_then(|v| v.parse().ok())
    }
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    pub fn load_config(config_file: Option<&Path>, overrides: ConfigOverrides) -> Result<AnalyzerConfig> {
        Self::load_with_env(config_file, overrides, &|key| env::var(key).ok())
    }

    /// 同 `load_config`，环境变量通过 `env` 读取
    pub fn load_with_env(
        config_file: Option<&Path>,
        overrides: ConfigOverrides,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<AnalyzerConfig> {
        // 显式指定的配置文件必须能读取；默认位置的文件可有可无
        let file = match config_file {
            Some(path) => Some(Self::load_from_file(path)?),
            None => Self::load_from_default_locations(),
        };
        let src = Sources { file, env };
        let defaults = AnalyzerConfig::default();

        let bind = overrides
            .bind
            .or_else(|| env("PORT").map(|port| format!("0.0.0.0:{}", port.trim())))
            .or_else(|| src.raw(None, "server", "bind"))
            .unwrap_or(defaults.bind);

        Ok(AnalyzerConfig {
            bind,
            nudity_detector_url: src
                .raw(Some("NSFW_DETECTOR_URL"), "services", "nsfw_detector_url")
                .unwrap_or(defaults.nudity_detector_url),
            content_classifier_url: src
                .raw(Some("CONTENT_CLASSIFIER_URL"), "services", "content_classifier_url")
                .unwrap_or(defaults.content_classifier_url),
            transition_model_url: src
                .raw(Some("TRANSITION_MODEL_URL"), "services", "transition_model_url")
                .or(defaults.transition_model_url),
            use_gpu: src
                .raw(Some("USE_GPU"), "analysis", "use_gpu")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.use_gpu),
            ffmpeg_path: src
                .raw(Some("FFMPEG_PATH"), "analysis", "ffmpeg_path")
                .unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: src
                .raw(Some("FFPROBE_PATH"), "analysis", "ffprobe_path")
                .unwrap_or(defaults.ffprobe_path),
            processing_dir: src
                .raw(Some("PROCESSING_DIR"), "analysis", "processing_dir")
                .map(PathBuf::from)
                .unwrap_or(defaults.processing_dir),
            scene_threshold: overrides
                .scene_threshold
                .or_else(|| src.parsed(Some("SCENE_THRESHOLD"), "analysis", "scene_threshold"))
                .unwrap_or(defaults.scene_threshold),
            sample_count: overrides
                .sample_count
                .or_else(|| src.parsed(Some("SAMPLE_COUNT"), "analysis", "sample_count"))
                .unwrap_or(defaults.sample_count),
            sampling_interval: overrides
                .sampling_interval
                .or_else(|| src.parsed(Some("SAMPLING_INTERVAL"), "analysis", "sampling_interval"))
                .unwrap_or(defaults.sampling_interval),
            probe_timeout_secs: src
                .parsed(None, "analysis", "probe_timeout_secs")
                .unwrap_or(defaults.probe_timeout_secs),
            extract_timeout_secs: src
                .parsed(None, "analysis", "extract_timeout_secs")
                .unwrap_or(defaults.extract_timeout_secs),
            detection_timeout_secs: src
                .parsed(None, "analysis", "detection_timeout_secs")
                .unwrap_or(defaults.detection_timeout_secs),
            scoring_timeout_secs: src
                .parsed(Some("SCORING_TIMEOUT"), "scoring", "timeout_secs")
                .unwrap_or(defaults.scoring_timeout_secs),
            max_retries: src
                .parsed(None, "scoring", "max_retries")
                .unwrap_or(defaults.max_retries),
            backoff_base_ms: src
                .parsed(None, "scoring", "backoff_base_ms")
                .unwrap_or(defaults.backoff_base_ms),
            max_concurrent_calls: src
                .parsed(None, "scoring", "max_concurrent_calls")
                .unwrap_or(defaults.max_concurrent_calls),
            log_level: src
                .raw(Some("LOG_LEVEL"), "logging", "level")
                .unwrap_or(defaults.log_level),
        })
    }

    /// 读取 INI 配置文件
    fn load_from_file(config_path: &Path) -> Result<Ini> {
        if !config_path.exists() {
            anyhow::bail!("配置文件不存在: {}", config_path.display());
        }
        let mut ini = Ini::new();
        ini.load(config_path)
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("读取配置文件失败: {}", config_path.display()))?;
        Ok(ini)
    }

    /// 从默认位置加载配置文件
    fn load_from_default_locations() -> Option<Ini> {
        let mut candidates = vec![
            PathBuf::from("scene-analyzer.ini"),
            PathBuf::from(".scene-analyzer.ini"),
        ];
        if let Some(home) = env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(".scene-analyzer.ini"));
        }
        candidates.push(PathBuf::from("/etc/scene-analyzer.ini"));

        candidates
            .into_iter()
            .find(|path| path.exists())
            .and_then(|path| Self::load_from_file(&path).ok())
    }
}
