//! 外部转码器（ffmpeg / ffprobe）子进程调用
//!
//! 所有调用都是 argv 列表形式，捕获 stdout / stderr 和退出码，并带有超时。
//! 子进程以 `kill_on_drop` 方式启动，请求被取消时进行中的进程会被终止。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

use crate::error::{AnalyzerError, AnalyzerResult};

/// 子进程执行结果
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stderr 末尾若干行，用于错误信息
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// 执行外部程序并等待结束
///
/// 进程无法启动（程序不存在）时返回 `ToolNotFound`，超时返回 `CommandTimeout`。
/// 非零退出码不视为错误，由调用方根据 `CommandOutput::success` 决定是否回退。
pub async fn run_command(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> AnalyzerResult<CommandOutput> {
    debug!("执行命令: {} {}", program, args.join(" "));
    let start = Instant::now();

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AnalyzerError::ToolNotFound(program.to_string())
            } else {
                AnalyzerError::Io(e)
            }
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(AnalyzerError::CommandTimeout {
                program: program.to_string(),
                secs: timeout.as_secs(),
            })
        }
    };

    debug!(
        "命令结束: {} (exit={:?}, 耗时 {:.2}秒)",
        program,
        output.status.code(),
        start.elapsed().as_secs_f64()
    );

    Ok(CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// ffmpeg 参数构建器
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: String,
    /// -i 之前的参数
    input_args: Vec<String>,
    /// -i 之后的参数
    output_args: Vec<String>,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl Into<String>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.into(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            log_level: "error".to_string(),
        }
    }

    /// 输出到空设备（只关心诊断输出）
    pub fn null_output(input: impl AsRef<Path>) -> Self {
        Self::new(input, "-").output_arg("-f").output_arg("null")
    }

    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// 硬件解码（必须出现在输入文件之前）
    pub fn hwaccel(self, accel: Option<&str>) -> Self {
        match accel {
            Some(name) => self.input_arg("-hwaccel").input_arg(name),
            None => self,
        }
    }

    /// 输入端 seek，速度快
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    pub fn single_frame(self) -> Self {
        self.output_arg("-frames:v").output_arg("1")
    }

    /// JPEG 质量（2 为高质量）
    pub fn jpeg_quality(self, q: u8) -> Self {
        self.output_arg("-q:v").output_arg(q.to_string())
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-v".to_string(),
            self.log_level.clone(),
        ];
        args.extend(self.input_args.iter().cloned());
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().into_owned());
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.clone());
        args
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_command_args_order() {
        let args = FfmpegCommand::new("/videos/a.mp4", "/tmp/f.jpg")
            .hwaccel(Some("cuda"))
            .seek(12.5)
            .single_frame()
            .jpeg_quality(2)
            .build_args();

        let pos = |s: &str| args.iter().position(|a| a == s).unwrap();
        assert!(pos("-hwaccel") < pos("-i"));
        assert!(pos("-ss") < pos("-i"));
        assert_eq!(args[pos("-ss") + 1], "12.500");
        assert!(pos("-frames:v") > pos("-i"));
        assert_eq!(args.last().unwrap(), "/tmp/f.jpg");
    }

    #[test]
    fn test_without_hwaccel() {
        let args = FfmpegCommand::null_output("/videos/a.mp4")
            .hwaccel(None)
            .build_args();
        assert!(!args.contains(&"-hwaccel".to_string()));
        assert_eq!(args.last().unwrap(), "-");
        assert!(args.contains(&"null".to_string()));
    }

    #[test]
    fn test_stderr_tail() {
        let out = CommandOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "a\nb\nc\nd".to_string(),
        };
        assert!(!out.success());
        assert_eq!(out.stderr_tail(2), "c\nd");
        assert_eq!(out.stderr_tail(10), "a\nb\nc\nd");
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_not_found() {
        let err = run_command(
            "definitely-not-a-real-transcoder-binary",
            &[],
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AnalyzerError::ToolNotFound(_)));
    }
}
