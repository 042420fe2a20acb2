//! # Logging モジュール
//!
//! 探索シミュレーションのログ出力を初期化します。
//!
//! tracing-subscriber のレイヤー構成で、コンソール（compact 形式）と
//! ファイル（JSON 形式、日次ローテーション）への出力を切り替えます。
//! ファイル出力は tracing-appender の非同期ライターを使うため、
//! 探索ループの処理速度に影響しません。
//!
//! ## 出力先
//!
//! - `Console`: コンソールのみ
//! - `File`: ファイルのみ（logs/geosearch.YYYY-MM-DD）
//! - `Both`: コンソールとファイルの両方
//!
//! `RUST_LOG` が設定されている場合はそちらのフィルタが優先されます。

use std::str::FromStr;

use thiserror::Error;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// ログ出力先の設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogOutput {
    /// コンソールのみ
    Console,
    /// ファイルのみ
    File,
    /// コンソールとファイルの両方
    Both,
}

impl LogOutput {
    fn writes_file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }

    fn writes_console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }
}

impl FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(format!("無効な出力先: {}. 利用可能: console, file, both", s)),
        }
    }
}

/// ログ設定
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub output: LogOutput,
    /// ログファイルのディレクトリ（File または Both の場合）
    pub log_dir: String,
    /// ログファイル名のプレフィックス
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            output: LogOutput::Console,
            log_dir: "logs".to_string(),
            file_prefix: "geosearch".to_string(),
        }
    }
}

/// ログ初期化エラー
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("ログディレクトリを作成できません {dir}: {source}")]
    Directory { dir: String, source: std::io::Error },

    #[error("ログシステムの初期化に失敗しました: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// ファイル出力の書き込みスレッドを保持するガード
///
/// ドロップすると未書き込みのログをフラッシュして書き込みスレッドを止めます。
/// `main` の終わりまで保持してください。
#[must_use = "ガードを破棄するとファイルへのログ出力が止まります"]
pub struct LogGuard {
    _worker: Option<WorkerGuard>,
}

/// ログシステムを初期化
///
/// # 例
///
/// ```no_run
/// use geosearch::logging::{init_logging, LogConfig, LogOutput};
/// use tracing::Level;
///
/// let config = LogConfig {
///     level: Level::DEBUG,
///     output: LogOutput::Both,
///     log_dir: "logs".to_string(),
///     file_prefix: "geosearch".to_string(),
/// };
///
/// let _guard = init_logging(config).expect("ログ初期化に失敗");
/// ```
pub fn init_logging(config: LogConfig) -> Result<LogGuard, LoggingError> {
    // 環境変数またはconfigからログレベルを設定
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_string()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = config.output.writes_console().then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
    });

    let (file_layer, worker) = if config.output.writes_file() {
        ensure_log_directory(&config.log_dir).map_err(|source| LoggingError::Directory {
            dir: config.log_dir.clone(),
            source,
        })?;
        let file_appender = rolling::daily(&config.log_dir, &config.file_prefix);
        let (writer, guard) = non_blocking(file_appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(false)
            .with_line_number(false)
            .json();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(LogGuard { _worker: worker })
}

/// ログレベルを文字列から解析
///
/// 無効な文字列の場合は警告を出して INFO を返します。
pub fn parse_log_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!("警告: 無効なログレベル '{}'. INFOを使用します", level_str);
            Level::INFO
        }
    }
}

/// `-v` の指定回数から最低限のログレベルを決める
///
/// `base` より詳細なレベルのみ採用します（`-vv` 指定で WARN が DEBUG になる等）。
pub fn level_for_verbosity(base: Level, verbose_level: u8) -> Level {
    let requested = match verbose_level {
        0 => return base,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    // tracing の Level は詳細なほど大きい
    if requested > base { requested } else { base }
}

/// ログディレクトリを作成
pub fn ensure_log_directory(log_dir: &str) -> Result<(), std::io::Error> {
    std::fs::create_dir_all(log_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_output_from_str() {
        assert_eq!(LogOutput::from_str("console"), Ok(LogOutput::Console));
        assert_eq!(LogOutput::from_str("FILE"), Ok(LogOutput::File));
        assert_eq!(LogOutput::from_str("all"), Ok(LogOutput::Both));
        assert!(LogOutput::from_str("syslog").is_err());
    }

    #[test]
    fn test_output_targets() {
        assert!(LogOutput::Both.writes_console() && LogOutput::Both.writes_file());
        assert!(!LogOutput::Console.writes_file());
        assert!(!LogOutput::File.writes_console());
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug"), Level::DEBUG);
        assert_eq!(parse_log_level("INFO"), Level::INFO);
        assert_eq!(parse_log_level("invalid"), Level::INFO);
    }

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for_verbosity(Level::WARN, 0), Level::WARN);
        assert_eq!(level_for_verbosity(Level::WARN, 2), Level::DEBUG);
        assert_eq!(level_for_verbosity(Level::TRACE, 1), Level::TRACE);
        assert_eq!(level_for_verbosity(Level::INFO, 5), Level::TRACE);
    }

    #[test]
    fn test_default_prefix() {
        let config = LogConfig::default();
        assert_eq!(config.file_prefix, "geosearch");
        assert_eq!(config.output, LogOutput::Console);
    }
}
