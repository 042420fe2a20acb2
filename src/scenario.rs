//! # Scenario モジュール
//!
//! YAML 形式のシナリオファイルを読み込み、探索設定へ変換します。
//!
//! 省略可能な項目の既定値はこの層でのみ補われ、探索コアには
//! 完成した `SearchConfig` が渡されます。

use std::collections::HashSet;
use std::f64::consts::SQRT_2;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SearchError;
use crate::models::{GeoBounds, GeoPoint, VehicleParams};
use crate::planner::{SearchConfig, SearchStrategy};

/// 組み込みデモシナリオ（赤道上 0.01 度四方、中心にターゲット1つ）
const DEMO_SCENARIO: &str = include_str!("../scenarios/demo.yaml");

/// シナリオメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// シミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    pub seed: u64,
    /// 実行ラウンド数（ラウンド間でターゲットを再配置）
    #[serde(default = "default_rounds")]
    pub rounds: u32,
}

/// ターゲット配置
///
/// `positions` を指定した場合はその位置に配置し、`count` は省略できます。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetsConfig {
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub positions: Option<Vec<GeoPoint>>,
}

impl TargetsConfig {
    pub fn target_count(&self) -> usize {
        match (&self.positions, self.count) {
            (Some(positions), _) => positions.len(),
            (None, Some(count)) => count,
            (None, None) => 0,
        }
    }
}

/// センサー設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SensingConfig {
    pub sensor_range_m: f64,
    pub found_threshold_m: f64,
}

/// 探索手順の設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchSection {
    pub strategy: SearchStrategy,
    /// 省略時は戦略に応じてセンサー範囲または発見判定距離の 1/√2
    #[serde(default)]
    pub step_size_m: Option<f64>,
    #[serde(default = "default_probe_distance")]
    pub probe_distance_m: f64,
    #[serde(default)]
    pub altitude_m: Option<f64>,
    #[serde(default)]
    pub randomize_start: bool,
    #[serde(default = "default_localization_steps")]
    pub max_localization_steps: u32,
    #[serde(default = "default_found_drain")]
    pub max_found_drain: u32,
    #[serde(default = "default_move_retries")]
    pub max_move_retries: u32,
    #[serde(default)]
    pub residual_tolerance_m: Option<f64>,
}

/// 位置テレメトリの取得方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryMode {
    /// 移動中に位置を問い合わせる
    Polled,
    /// 機体から押し出される位置メッセージを受信する
    Streamed,
}

/// エージェント設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    pub id: u32,
    #[serde(default = "default_telemetry")]
    pub telemetry: TelemetryMode,
    pub start: GeoPoint,
    pub speed_mps: f64,
    #[serde(default = "default_tick_s")]
    pub tick_s: f64,
    #[serde(default = "default_reach_threshold")]
    pub reach_threshold_m: f64,
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u32,
    #[serde(default = "default_telemetry_timeout_ms")]
    pub telemetry_timeout_ms: u64,
}

impl AgentConfig {
    pub fn vehicle_params(&self) -> VehicleParams {
        VehicleParams {
            speed_mps: self.speed_mps,
            tick_s: self.tick_s,
            reach_threshold_m: self.reach_threshold_m,
            max_ticks: self.max_ticks,
        }
    }

    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry_timeout_ms)
    }
}

/// 有限かつ正の値か（NaN は偽）
fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn default_rounds() -> u32 {
    1
}

fn default_probe_distance() -> f64 {
    50.0
}

fn default_localization_steps() -> u32 {
    8
}

fn default_found_drain() -> u32 {
    16
}

fn default_move_retries() -> u32 {
    2
}

fn default_telemetry() -> TelemetryMode {
    TelemetryMode::Polled
}

fn default_tick_s() -> f64 {
    1.0
}

fn default_reach_threshold() -> f64 {
    10.0
}

fn default_max_ticks() -> u32 {
    1000
}

fn default_telemetry_timeout_ms() -> u64 {
    1000
}

/// 完全なシナリオ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    pub area: GeoBounds,
    pub targets: TargetsConfig,
    pub sensing: SensingConfig,
    pub search: SearchSection,
    pub agents: Vec<AgentConfig>,
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path).map_err(|e| ScenarioError::Io(path.to_path_buf(), e))?;
        Self::parse(&contents, &path.display().to_string())
    }

    /// YAML文字列からシナリオ設定を読み込み
    pub fn from_yaml(contents: &str) -> Result<Self, ScenarioError> {
        Self::parse(contents, "<inline>")
    }

    /// 組み込みのデモシナリオ
    pub fn builtin_demo() -> Result<Self, ScenarioError> {
        Self::parse(DEMO_SCENARIO, "<builtin demo>")
    }

    fn parse(contents: &str, origin: &str) -> Result<Self, ScenarioError> {
        let config: ScenarioConfig =
            serde_yaml::from_str(contents).map_err(|e| ScenarioError::Parse(origin.to_string(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// 設定の検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.sim.rounds == 0 {
            return Err(ScenarioError::Validation("rounds must be >= 1".to_string()));
        }

        if self.targets.count.is_none() && self.targets.positions.is_none() {
            return Err(ScenarioError::Validation(
                "targets needs either count or positions".to_string(),
            ));
        }
        if let (Some(count), Some(positions)) = (self.targets.count, &self.targets.positions) {
            if count != positions.len() {
                return Err(ScenarioError::Validation(format!(
                    "targets.count {} does not match {} positions",
                    count,
                    positions.len()
                )));
            }
        }
        for position in self.targets.positions.iter().flatten() {
            if !self.area.contains(position) {
                return Err(ScenarioError::Validation(format!("target {} is outside the area", position)));
            }
        }

        if self.agents.is_empty() {
            return Err(ScenarioError::Validation("at least one agent is required".to_string()));
        }
        let mut ids = HashSet::new();
        for agent in &self.agents {
            if !ids.insert(agent.id) {
                return Err(ScenarioError::Validation(format!("duplicate agent id {}", agent.id)));
            }
            if !is_positive(agent.speed_mps) || !is_positive(agent.tick_s) {
                return Err(ScenarioError::Validation(format!(
                    "agent {}: speed_mps and tick_s must be positive",
                    agent.id
                )));
            }
            if !is_positive(agent.reach_threshold_m) || agent.max_ticks == 0 {
                return Err(ScenarioError::Validation(format!(
                    "agent {}: reach_threshold_m and max_ticks must be positive",
                    agent.id
                )));
            }
        }

        // 探索コアの制約（境界矩形・距離の関係など）
        self.search_config()?;
        Ok(())
    }

    /// 戦略に応じた掃引間隔の既定値
    ///
    /// 格子の対角が隣接点の探知円で覆われるよう、間隔を 1/√2 倍にします。
    pub fn default_step_size(&self) -> f64 {
        match self.search.strategy {
            SearchStrategy::Trilateration => self.sensing.sensor_range_m / SQRT_2,
            SearchStrategy::Lawnmower => self.sensing.found_threshold_m / SQRT_2,
        }
    }

    /// 探索コアへ渡す設定を構築
    pub fn search_config(&self) -> Result<SearchConfig, ScenarioError> {
        let config = SearchConfig {
            bounds: self.area,
            target_count: self.targets.target_count(),
            sensor_range: self.sensing.sensor_range_m,
            found_threshold: self.sensing.found_threshold_m,
            step_size: self.search.step_size_m.unwrap_or_else(|| self.default_step_size()),
            probe_distance: self.search.probe_distance_m,
            altitude: self.search.altitude_m,
            strategy: self.search.strategy,
            randomize_start: self.search.randomize_start,
            max_localization_steps: self.search.max_localization_steps,
            max_found_drain: self.search.max_found_drain,
            max_move_retries: self.search.max_move_retries,
            residual_tolerance: self.search.residual_tolerance_m,
        };
        config.validate()?;
        Ok(config)
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("シード値: {}", self.sim.seed);
        println!("ラウンド数: {}", self.sim.rounds);
        println!();

        println!("=== 探索領域 ===");
        println!(
            "北 {:.5} / 南 {:.5} / 東 {:.5} / 西 {:.5}",
            self.area.north, self.area.south, self.area.east, self.area.west
        );
        println!(
            "大きさ: 南北 {:.0}m × 東西 {:.0}m",
            self.area.span_north_south_m(),
            self.area.span_east_west_m()
        );
        match &self.targets.positions {
            Some(positions) => println!("ターゲット: {}個 (位置指定)", positions.len()),
            None => println!("ターゲット: {}個 (ランダム配置)", self.targets.target_count()),
        }
        println!();

        println!("=== 探索設定 ===");
        println!("戦略: {:?}", self.search.strategy);
        println!("センサー範囲: {:.0}m", self.sensing.sensor_range_m);
        println!("発見判定距離: {:.0}m", self.sensing.found_threshold_m);
        println!(
            "掃引間隔: {:.1}m{}",
            self.search.step_size_m.unwrap_or_else(|| self.default_step_size()),
            if self.search.step_size_m.is_none() { " (既定値)" } else { "" }
        );
        println!("プローブ距離: {:.0}m", self.search.probe_distance_m);
        if let Some(tolerance) = self.search.residual_tolerance_m {
            println!("残差許容値: {:.1}m", tolerance);
        }
        println!();

        println!("=== エージェント ===");
        for agent in &self.agents {
            println!(
                "  {}: {:?} 開始位置 {} 速度 {:.1}m/s",
                agent.id, agent.telemetry, agent.start, agent.speed_mps
            );
        }
    }
}

/// シナリオ読み込みエラー
#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("ファイル読み込みエラー {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("YAML解析エラー {0}: {1}")]
    Parse(String, #[source] serde_yaml::Error),

    #[error("設定検証エラー: {0}")]
    Validation(String),

    #[error(transparent)]
    Search(#[from] SearchError),
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
meta:
  version: "1.0"
  name: minimal
sim:
  seed: 7
area: { north: 0.02, south: 0.0, east: 36.92, west: 36.9 }
targets:
  count: 3
sensing:
  sensor_range_m: 200
  found_threshold_m: 50
search:
  strategy: lawnmower
agents:
  - id: 1
    start: { lat: 0.0, lon: 36.9, alt: 10.0 }
    speed_mps: 12
"#;

    #[test]
    fn test_minimal_scenario_defaults() {
        let scenario = ScenarioConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(scenario.sim.rounds, 1);
        assert_eq!(scenario.agents[0].telemetry, TelemetryMode::Polled);
        assert_eq!(scenario.agents[0].reach_threshold_m, 10.0);

        let config = scenario.search_config().unwrap();
        assert_eq!(config.strategy, SearchStrategy::Lawnmower);
        assert!((config.step_size - 50.0 / SQRT_2).abs() < 1e-9);
        assert_eq!(config.target_count, 3);
        assert_eq!(config.probe_distance, 50.0);
        assert_eq!(config.residual_tolerance, None);
    }

    #[test]
    fn test_builtin_demo() {
        let scenario = ScenarioConfig::builtin_demo().unwrap();
        let config = scenario.search_config().unwrap();
        assert_eq!(config.strategy, SearchStrategy::Trilateration);
        assert_eq!(config.sensor_range, 400.0);
        assert_eq!(config.found_threshold, 50.0);
        assert_eq!(config.step_size, 280.0);
        assert_eq!(config.target_count, 1);

        let positions = scenario.targets.positions.as_ref().unwrap();
        assert!(positions[0].horizontal_distance_to(&scenario.area.center()) < 1e-6);
        assert!(scenario.agents[0].start.horizontal_distance_to(&scenario.area.south_west()) < 1e-6);
    }

    #[test]
    fn test_trilateration_default_step() {
        let yaml = MINIMAL.replace("strategy: lawnmower", "strategy: trilateration");
        let scenario = ScenarioConfig::from_yaml(&yaml).unwrap();
        assert!((scenario.default_step_size() - 200.0 / SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_invalid_core_values() {
        let yaml = MINIMAL.replace("found_threshold_m: 50", "found_threshold_m: 250");
        assert!(matches!(
            ScenarioConfig::from_yaml(&yaml),
            Err(ScenarioError::Search(SearchError::Validation(_)))
        ));

        let yaml = MINIMAL.replace("lat: 0.0, lon: 36.9", "lat: 95.0, lon: 36.9");
        assert!(matches!(ScenarioConfig::from_yaml(&yaml), Err(ScenarioError::Parse(..))));
    }

    #[test]
    fn test_rejects_non_finite_agent_motion() {
        for bad in ["speed_mps: .nan", "speed_mps: .inf", "speed_mps: -3"] {
            let yaml = MINIMAL.replace("speed_mps: 12", bad);
            assert!(
                matches!(ScenarioConfig::from_yaml(&yaml), Err(ScenarioError::Validation(_))),
                "{bad} should be rejected"
            );
        }
        let yaml = MINIMAL.replace("speed_mps: 12", "speed_mps: 12\n    tick_s: .nan");
        assert!(matches!(ScenarioConfig::from_yaml(&yaml), Err(ScenarioError::Validation(_))));
        let yaml = MINIMAL.replace("speed_mps: 12", "speed_mps: 12\n    reach_threshold_m: .nan");
        assert!(matches!(ScenarioConfig::from_yaml(&yaml), Err(ScenarioError::Validation(_))));
    }

    #[test]
    fn test_rejects_duplicate_agents() {
        let yaml = format!(
            "{MINIMAL}  - id: 1\n    start: {{ lat: 0.01, lon: 36.91 }}\n    speed_mps: 12\n"
        );
        assert!(matches!(ScenarioConfig::from_yaml(&yaml), Err(ScenarioError::Validation(_))));
    }

    #[test]
    fn test_rejects_targets_outside_area() {
        let yaml = MINIMAL.replace(
            "  count: 3",
            "  positions:\n    - { lat: 0.5, lon: 36.91 }",
        );
        assert!(matches!(ScenarioConfig::from_yaml(&yaml), Err(ScenarioError::Validation(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = ScenarioConfig::from_file("scenarios/does_not_exist.yaml").unwrap_err();
        assert!(matches!(err, ScenarioError::FileNotFound(_)));
    }

    #[test]
    fn test_sample_scenarios_load() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios");
        for name in ["demo.yaml", "ol_pejeta.yaml", "lawnmower.yaml"] {
            let scenario = ScenarioConfig::from_file(root.join(name));
            assert!(scenario.is_ok(), "{name}: {:?}", scenario.err());
        }
    }
}
