//! # Planner モジュール
//!
//! エージェント1機分の探索手順を実装します。
//!
//! 1. 境界矩形を覆う往復格子（`sweep`）を生成し、各ウェイポイントへ移動してセンス
//! 2. センス結果に応じて分岐
//!    - 範囲外: 次のウェイポイントへ
//!    - 発見: 記録し、発見でなくなるまで同じ位置で再センス
//!    - 範囲内: 掃引を中断して位置特定（`localize`）へ移行
//! 3. 位置特定に失敗した場合は次の未訪問ウェイポイントから掃引を再開
//!
//! 移動とセンスは厳密に直列で、各ステップはコラボレーターの応答を待ちます。

mod localize;
pub mod sweep;

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SearchError};
use crate::models::{GeoBounds, GeoCircle, GeoPoint, IEventSink, INavigator, ISenseLink, SearchEvent, SensorReading};

pub use localize::LocalizationOutcome;
pub use sweep::CoverageSweep;

/// 探索戦略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// 発見判定距離間隔の掃引のみ（範囲内の結果は無視）
    Lawnmower,
    /// センサー範囲間隔の掃引＋三辺測量による位置特定
    Trilateration,
}

/// 探索設定
///
/// 実行ごとに一度だけ構築し、プランナーへ明示的に渡します。
/// コア内部に暗黙の既定値はありません。
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    /// 探索領域
    pub bounds: GeoBounds,
    /// ターゲット数
    pub target_count: usize,
    /// センサー範囲（メートル）
    pub sensor_range: f64,
    /// 発見判定距離（メートル）
    pub found_threshold: f64,
    /// 掃引格子の間隔（メートル）
    pub step_size: f64,
    /// 位置特定時のプローブ距離（メートル、東西・南北それぞれ）
    pub probe_distance: f64,
    /// 掃引ウェイポイントの高度
    pub altitude: Option<f64>,
    pub strategy: SearchStrategy,
    /// 掃引の開始点をランダムに回転するか
    pub randomize_start: bool,
    /// 位置特定1回あたりの最大ステップ数
    pub max_localization_steps: u32,
    /// 同一位置での連続発見の最大再センス回数
    pub max_found_drain: u32,
    /// 移動失敗時の再試行回数
    pub max_move_retries: u32,
    /// 三辺測量結果の残差許容値（Noneなら検証しない）
    pub residual_tolerance: Option<f64>,
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        self.bounds.validate()?;

        let positive = [
            ("sensor_range", self.sensor_range),
            ("found_threshold", self.found_threshold),
            ("step_size", self.step_size),
            ("probe_distance", self.probe_distance),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(SearchError::Validation(format!("{name} must be positive (got {value})")));
            }
        }
        if self.found_threshold > self.sensor_range {
            return Err(SearchError::Validation(format!(
                "found_threshold {} exceeds sensor_range {}",
                self.found_threshold, self.sensor_range
            )));
        }
        if self.probe_distance >= self.sensor_range {
            return Err(SearchError::Validation(format!(
                "probe_distance {} must be smaller than sensor_range {}",
                self.probe_distance, self.sensor_range
            )));
        }
        if self.max_localization_steps == 0 {
            return Err(SearchError::Validation("max_localization_steps must be >= 1".to_string()));
        }
        if let Some(tolerance) = self.residual_tolerance {
            if !tolerance.is_finite() || tolerance < 0.0 {
                return Err(SearchError::Validation(format!("residual_tolerance {tolerance} is invalid")));
            }
        }
        Ok(())
    }
}

/// 探索の終了理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Termination {
    /// 全ウェイポイントを巡回した
    SweepExhausted,
    /// 未発見のターゲットがなくなった
    FieldCleared,
}

/// 1エージェント分の探索結果
#[derive(Debug, Clone, PartialEq)]
pub struct SearchReport {
    pub agent_id: u32,
    /// 到達したウェイポイント数（掃引・プローブ・推定点を含む）
    pub waypoints_visited: usize,
    /// センス要求回数
    pub senses: usize,
    /// 発見時のエージェント位置
    pub discoveries: Vec<GeoPoint>,
    pub localization_attempts: usize,
    pub localization_failures: usize,
    pub termination: Termination,
}

impl SearchReport {
    fn new(agent_id: u32) -> Self {
        Self {
            agent_id,
            waypoints_visited: 0,
            senses: 0,
            discoveries: Vec::new(),
            localization_attempts: 0,
            localization_failures: 0,
            termination: Termination::SweepExhausted,
        }
    }
}

/// エージェントごとの探索状態
///
/// 探索開始時に作られ、終了時に破棄されます。位置特定中の証拠円は
/// `localize` の中だけで保持します。
#[derive(Debug)]
struct SearchState {
    /// 現在の掃引ウェイポイント
    waypoint: Option<GeoPoint>,
    /// 掃引カーソル
    cursor: usize,
    report: SearchReport,
}

/// 探索プランナー
pub struct SearchPlanner {
    config: SearchConfig,
    agent: Arc<dyn INavigator>,
    sensor: Arc<dyn ISenseLink>,
    events: Arc<dyn IEventSink>,
    rng: StdRng,
}

impl SearchPlanner {
    pub fn new(
        config: SearchConfig,
        agent: Arc<dyn INavigator>,
        sensor: Arc<dyn ISenseLink>,
        events: Arc<dyn IEventSink>,
        seed: u64,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            agent,
            sensor,
            events,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn agent_id(&self) -> u32 {
        self.agent.agent_id()
    }

    /// この設定で巡回する掃引経路
    pub fn coverage_path(&mut self) -> Result<CoverageSweep> {
        let mut sweep = CoverageSweep::generate(&self.config.bounds, self.config.step_size, self.config.altitude)?;
        if self.config.randomize_start && !sweep.is_empty() {
            let start = self.rng.gen_range(0..sweep.len());
            sweep.rotate(start);
        }
        Ok(sweep)
    }

    /// 探索を実行
    ///
    /// 掃引ウェイポイントへの移動が再試行上限まで失敗した場合は
    /// `SearchError::RunAborted` で中断します（ウェイポイントを黙って飛ばしません）。
    pub fn run(&mut self) -> Result<SearchReport> {
        let sweep = self.coverage_path()?;
        let agent_id = self.agent_id();
        info!(
            "エージェント {} 探索開始: {:?}, ウェイポイント {}点",
            agent_id,
            self.config.strategy,
            sweep.len()
        );

        let mut state = SearchState {
            waypoint: None,
            cursor: 0,
            report: SearchReport::new(agent_id),
        };

        for (cursor, waypoint) in sweep.points().iter().enumerate() {
            state.cursor = cursor;
            state.waypoint = Some(*waypoint);

            if let Err(err) = self.move_to(waypoint, &mut state) {
                return Err(match err {
                    SearchError::Move(source) => SearchError::RunAborted {
                        agent_id,
                        waypoint: waypoint.to_string(),
                        attempts: self.move_attempts(),
                        source,
                    },
                    other => other,
                });
            }

            match self.sense(&mut state).and_then(|reading| self.dispatch(reading, &mut state)) {
                Ok(()) => {}
                Err(SearchError::EmptyField) => {
                    info!("エージェント {}: 未発見のターゲットがなくなりました", agent_id);
                    state.report.termination = Termination::FieldCleared;
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            "エージェント {} 探索終了: 発見 {}件, ウェイポイント {}点, 位置特定 {}/{}失敗 (カーソル {})",
            agent_id,
            state.report.discoveries.len(),
            state.report.waypoints_visited,
            state.report.localization_failures,
            state.report.localization_attempts,
            state.cursor
        );
        Ok(state.report)
    }

    /// センス結果に応じた状態遷移
    fn dispatch(&mut self, reading: SensorReading, state: &mut SearchState) -> Result<()> {
        match reading {
            SensorReading::OutOfRange => Ok(()),
            SensorReading::Found { distance } => self.record_and_drain(distance, state),
            SensorReading::InRange { distance } => {
                if self.config.strategy == SearchStrategy::Lawnmower {
                    return Ok(());
                }

                let origin = GeoCircle::new(self.agent.current_position(), distance)?;
                match self.localize(origin, state) {
                    Ok(LocalizationOutcome::Located) => Ok(()),
                    Ok(LocalizationOutcome::SignalLost) => {
                        self.abandon_localization("estimate left sensor range".to_string(), state);
                        Ok(())
                    }
                    Err(SearchError::Localization(reason)) => {
                        self.abandon_localization(reason, state);
                        Ok(())
                    }
                    Err(SearchError::Move(err)) => {
                        self.abandon_localization(err.to_string(), state);
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    fn abandon_localization(&mut self, reason: String, state: &mut SearchState) {
        let resume_from = state
            .waypoint
            .map(|wp| wp.to_string())
            .unwrap_or_else(|| "-".to_string());
        warn!(
            "エージェント {}: 位置特定を断念 ({}) 掃引点 {} の次 (カーソル {}) から再開",
            state.report.agent_id,
            reason,
            resume_from,
            state.cursor + 1
        );
        state.report.localization_failures += 1;
        self.events.notify(SearchEvent::LocalizationAbandoned {
            agent_id: state.report.agent_id,
            reason,
        });
    }

    /// 発見を記録し、同じ位置で発見が続く限り再センスする
    fn record_and_drain(&mut self, distance: f64, state: &mut SearchState) -> Result<()> {
        self.record_found(distance, state);
        for _ in 0..self.config.max_found_drain {
            match self.sense(state)? {
                SensorReading::Found { distance } => self.record_found(distance, state),
                _ => return Ok(()),
            }
        }
        debug!("エージェント {}: 連続発見の再センス上限に達しました", state.report.agent_id);
        Ok(())
    }

    fn record_found(&mut self, distance: f64, state: &mut SearchState) {
        let position = self.agent.current_position();
        info!("エージェント {}: ターゲット発見 {} (距離 {:.1}m)", state.report.agent_id, position, distance);
        state.report.discoveries.push(position);
        self.events.notify(SearchEvent::TargetFound {
            agent_id: state.report.agent_id,
            position,
            distance,
        });
    }

    fn sense(&mut self, state: &mut SearchState) -> Result<SensorReading> {
        state.report.senses += 1;
        self.sensor.sense(state.report.agent_id)
    }

    fn move_attempts(&self) -> u32 {
        self.config.max_move_retries + 1
    }

    /// 移動（再試行付き）。上限まで失敗すると最後の `MoveError` を返す。
    fn move_to(&mut self, point: &GeoPoint, state: &mut SearchState) -> Result<()> {
        let attempts = self.move_attempts();
        let mut attempt = 1;
        loop {
            match self.agent.go_to(point) {
                Ok(()) => break,
                Err(err) if attempt < attempts => {
                    warn!(
                        "エージェント {}: {} への移動に失敗 ({}/{}): {}",
                        state.report.agent_id, point, attempt, attempts, err
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }

        state.report.waypoints_visited += 1;
        self.events.notify(SearchEvent::PositionUpdated {
            agent_id: state.report.agent_id,
            position: self.agent.current_position(),
        });
        Ok(())
    }
}
