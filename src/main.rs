use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use scene_analyzer::{
    config::{AnalyzerConfig, ConfigLoader, ConfigOverrides},
    handler,
    processor::{AnalyzeOptions, SceneAnalyzer},
    scene_detector::SegmentationMethod,
    scoring::{Collaborator, ScoringClient},
    transition_model::HttpTransitionModel,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// 视频场景分析工具 - 分割场景并对每个场景做内容安全评分
#[derive(Parser, Debug)]
#[command(name = "scene-analyzer")]
#[command(about = "视频场景分析：场景分割、抽帧、内容评分与汇总", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Web 服务模式：提供 POST /analyze 与 GET /health
    Serve {
        /// 监听地址（默认从环境变量 PORT 读取，否则使用 0.0.0.0:3000）
        #[arg(short, long)]
        bind: Option<String>,

        /// 配置文件路径（.ini 格式）
        /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// CLI 模式：分析本地视频文件，结果以 JSON 输出到标准输出
    Analyze {
        /// 输入视频文件路径
        #[arg(short, long)]
        input: PathBuf,

        /// 场景分割方式：transnetv2 / ffmpeg / sampling
        #[arg(short, long)]
        method: Option<String>,

        /// ffmpeg 场景切换阈值 (0.0-1.0)
        #[arg(long)]
        threshold: Option<f64>,

        /// 每个场景的采样帧数
        #[arg(long)]
        sample_count: Option<usize>,

        /// 固定间隔分割的间隔（秒）
        #[arg(long)]
        interval: Option<f64>,

        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// 检查评分服务与转场模型服务是否可用
    CheckServices {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// 初始化日志：RUST_LOG 优先，否则使用配置中的日志级别
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Serve { bind, config } => {
            let config = ConfigLoader::load_config(
                config.as_deref(),
                ConfigOverrides {
                    bind,
                    ..Default::default()
                },
            )
            .context("加载配置失败")?;
            init_logging(&config.log_level);
            start_web_server(config).await?;
        }
        Commands::Analyze {
            input,
            method,
            threshold,
            sample_count,
            interval,
            config,
        } => {
            let config = ConfigLoader::load_config(
                config.as_deref(),
                ConfigOverrides {
                    scene_threshold: threshold,
                    sample_count,
                    sampling_interval: interval,
                    ..Default::default()
                },
            )
            .context("加载配置失败")?;
            init_logging(&config.log_level);

            let analyzer = SceneAnalyzer::from_config(&config)
                .await
                .context("初始化分析器失败")?;
            let options = AnalyzeOptions {
                method: method.as_deref().map(SegmentationMethod::from_wire),
                ..Default::default()
            };
            let report = analyzer
                .analyze(&input, &options)
                .await
                .context("分析视频失败")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::CheckServices { config } => {
            let config = ConfigLoader::load_config(config.as_deref(), ConfigOverrides::default())
                .context("加载配置失败")?;
            init_logging(&config.log_level);
            check_services(&config).await?;
        }
    }

    Ok(())
}

async fn start_web_server(config: AnalyzerConfig) -> Result<()> {
    let analyzer = SceneAnalyzer::from_config(&config)
        .await
        .context("初始化分析器失败")?;
    let app = handler::router(Arc::new(analyzer));

    let bind = config.bind.as_str();
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context(format!("绑定地址失败: {}", bind))?;

    tracing::info!("Web 服务器启动在: http://{}", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("可用端点:");
    tracing::info!("  • 健康检查: GET  http://{}/health", bind);
    tracing::info!("  • 场景分析: POST http://{}/analyze", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    axum::serve(listener, app)
        .await
        .context("启动服务器失败")?;

    Ok(())
}

/// 依次请求各服务的 GET /health 并打印状态
async fn check_services(config: &AnalyzerConfig) -> Result<()> {
    let client = ScoringClient::new(config).context("创建评分客户端失败")?;
    let mut unreachable = 0;

    for collaborator in [Collaborator::NudityDetector, Collaborator::ContentClassifier] {
        match client.health(collaborator).await {
            Ok(status) => println!("✅ {}: {}", collaborator.as_str(), status),
            Err(e) => {
                println!("❌ {}: {}", collaborator.as_str(), e);
                unreachable += 1;
            }
        }
    }

    if let Some(url) = &config.transition_model_url {
        let model = HttpTransitionModel::new(url, Duration::from_secs(config.probe_timeout_secs))
            .context("创建转场模型客户端失败")?;
        if model.is_ready(Duration::from_secs(config.probe_timeout_secs)).await {
            println!("✅ transition-model: ready");
        } else {
            println!("❌ transition-model: unreachable");
            unreachable += 1;
        }
    } else {
        println!("➖ transition-model: 未配置");
    }

    if unreachable > 0 {
        bail!("{} 个服务不可用", unreachable);
    }
    Ok(())
}
