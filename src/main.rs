use clap::{Arg, ArgAction, Command};
use tracing::{error, info};

use geosearch::logging::{init_logging, level_for_verbosity, parse_log_level, LogConfig, LogOutput};
use geosearch::scenario::ScenarioConfig;
use geosearch::simulation::{SimulationEngine, SimulationSummary};

fn main() {
    // コマンドライン引数の解析
    let matches = Command::new("geosearch")
        .version("0.1.0")
        .about("ターゲット探索シミュレーション (Geodetic Search)")
        .long_about(
            "複数のエージェントで境界矩形内のターゲットを探索するシミュレーター\n\
             網羅掃引と三辺測量による位置特定でターゲットを発見します。",
        )
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
                .long_help(
                    "実行するシナリオファイル(.yaml)のパスを指定します。\n\
                     指定しない場合は使用方法を表示します。",
                ),
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了")
                .conflicts_with("test"),
        )
        .arg(
            Arg::new("test")
                .short('t')
                .long("test")
                .action(ArgAction::SetTrue)
                .help("組み込みデモシナリオを実行")
                .conflicts_with_all(["info", "scenario"]),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細, -vvv: トレース)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .default_value("warn")
                .help("ログレベル (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("TARGET")
                .default_value("console")
                .help("ログ出力先 (console, file, both)"),
        )
        .arg(
            Arg::new("log-dir")
                .long("log-dir")
                .value_name("DIR")
                .default_value("logs")
                .help("ログファイルの出力ディレクトリ"),
        )
        .get_matches();

    let verbose_level = matches.get_count("verbose");

    let output = match matches
        .get_one::<String>("log-output")
        .map(|s| s.parse::<LogOutput>())
        .unwrap_or(Ok(LogOutput::Console))
    {
        Ok(output) => output,
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(2);
        }
    };
    let base_level = matches
        .get_one::<String>("log-level")
        .map(|s| parse_log_level(s))
        .unwrap_or(tracing::Level::WARN);
    let log_config = LogConfig {
        level: level_for_verbosity(base_level, verbose_level),
        output,
        log_dir: matches.get_one::<String>("log-dir").cloned().unwrap_or_else(|| "logs".to_string()),
        ..LogConfig::default()
    };
    let _log_guard = match init_logging(log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
    };

    println!("ターゲット探索シミュレーション - geosearch v0.1.0");
    println!();

    if verbose_level > 0 {
        println!("詳細出力レベル: {}", verbose_level);
    }

    // デモモードの実行
    if matches.get_flag("test") {
        println!("=== 組み込みデモシナリオ ===");
        exit_on_error(run_demo(verbose_level), verbose_level);
        return;
    }

    // シナリオファイルの処理
    if let Some(scenario_path) = matches.get_one::<String>("scenario") {
        let result = run_scenario(scenario_path, matches.get_flag("info"), verbose_level);
        exit_on_error(result, verbose_level);
    } else {
        show_default_help();
    }
}

fn exit_on_error(result: Result<(), Box<dyn std::error::Error>>, verbose_level: u8) {
    match result {
        Ok(()) => {
            if verbose_level > 0 {
                println!("シナリオ実行が正常に完了しました。");
            }
        }
        Err(e) => {
            error!("シナリオ実行に失敗: {}", e);
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
    }
}

/// シナリオファイルを読み込んで実行
fn run_scenario(scenario_path: &str, info_only: bool, verbose_level: u8) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = ScenarioConfig::from_file(scenario_path)?;
    info!("シナリオファイル読み込み完了: {}", scenario_path);

    // 情報表示のみの場合
    if info_only {
        scenario.print_summary();
        return Ok(());
    }

    execute_scenario(scenario, verbose_level)
}

/// 組み込みデモシナリオを実行
fn run_demo(verbose_level: u8) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = ScenarioConfig::builtin_demo()?;
    execute_scenario(scenario, verbose_level)
}

/// シナリオの実行
fn execute_scenario(scenario: ScenarioConfig, verbose_level: u8) -> Result<(), Box<dyn std::error::Error>> {
    scenario.print_summary();
    println!();

    let mut simulation = SimulationEngine::new(scenario, verbose_level);
    simulation.initialize()?;
    let summary = simulation.run()?;

    print_results(&summary);
    Ok(())
}

/// ラウンドごとの結果を表示
fn print_results(summary: &SimulationSummary) {
    println!("=== 探索結果 ===");
    for round in &summary.rounds {
        println!(
            "ラウンド {}: {}/{} 発見 (センス {}回)",
            round.round + 1,
            round.found,
            round.targets,
            round.detections.total
        );
        for report in &round.reports {
            println!(
                "  エージェント {}: 発見 {}件, ウェイポイント {}点, 位置特定 {}回 (断念 {}回), 終了 {:?}",
                report.agent_id,
                report.discoveries.len(),
                report.waypoints_visited,
                report.localization_attempts,
                report.localization_failures,
                report.termination
            );
        }
        for failure in &round.failures {
            println!("  エージェント {}: 中断 - {}", failure.agent_id, failure.reason);
        }
    }
    println!();
    println!("合計: {}/{} 発見", summary.total_found(), summary.total_targets());
}

/// デフォルトヘルプとシナリオ一覧を表示
fn show_default_help() {
    println!("使用方法:");
    println!("  geosearch [オプション]");
    println!();
    println!("オプション:");
    println!("  -s, --scenario <FILE>   シナリオファイルを指定して実行");
    println!("  -i, --info              シナリオ情報のみ表示");
    println!("  -t, --test              組み込みデモシナリオを実行");
    println!("  -v, --verbose           詳細出力 (複数指定で詳細レベル上昇)");
    println!("      --log-level <LEVEL> ログレベル (既定: warn)");
    println!("      --log-output <T>    ログ出力先 console / file / both");
    println!("      --log-dir <DIR>     ログファイルの出力先 (既定: logs)");
    println!("  -h, --help              このヘルプを表示");
    println!();
    println!("利用可能なシナリオファイル:");
    println!("  scenarios/demo.yaml        - 中心ターゲット1つのデモ");
    println!("  scenarios/ol_pejeta.yaml   - 2機で10個を探索 (3ラウンド)");
    println!("  scenarios/lawnmower.yaml   - 網羅掃引のみ");
    println!();
    println!("例:");
    println!("  geosearch -s scenarios/ol_pejeta.yaml");
    println!("  geosearch -s scenarios/ol_pejeta.yaml -i");
    println!("  geosearch -s scenarios/demo.yaml -vv --log-output both");
    println!("  geosearch --test");
}
