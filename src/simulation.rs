//! # Simulation モジュール
//!
//! シナリオからターゲットフィールド・エージェント・センスサービスを構築し、
//! エージェントごとの探索プランナーを並行実行します。
//!
//! ## 実行の流れ
//!
//! 1. **初期化**: フィールド生成、エージェント作成、センスサービスへの登録
//! 2. **ラウンド実行**: tokio のマルチスレッドランタイム上で、各プランナーを
//!    `spawn_blocking` で起動（移動・センスはブロッキング呼び出し）
//! 3. **集計**: 全プランナーの終了を待ってから結果を集計
//! 4. **リセット**: 次のラウンドの前にターゲットを再配置
//!
//! エージェント同士はターゲットフィールドを介してのみ相互作用します。
//!
//! ## 使用例
//!
//! ```no_run
//! use geosearch::scenario::ScenarioConfig;
//! use geosearch::simulation::SimulationEngine;
//!
//! let scenario = ScenarioConfig::from_file("scenarios/ol_pejeta.yaml")?;
//! let mut engine = SimulationEngine::new(scenario, 1);
//! engine.initialize()?;
//! let summary = engine.run()?;
//! println!("発見数: {}", summary.total_found());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::error::SearchError;
use crate::models::{
    DetectionStats, EventRecorder, INavigator, PolledAgent, SenseService, SimulatedLink, StreamedAgent, TargetField,
    TracingEventSink,
};
use crate::planner::{SearchConfig, SearchPlanner, SearchReport, Termination};
use crate::scenario::{ScenarioConfig, ScenarioError, TelemetryMode};

/// シミュレーション実行エラー
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("ランタイムを起動できません: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("エージェント {0} のプランナーが異常終了しました")]
    PlannerPanicked(u32),
}

/// 中断したエージェント
#[derive(Debug, Clone)]
pub struct AgentFailure {
    pub agent_id: u32,
    pub reason: String,
}

/// 1ラウンド分の結果
#[derive(Debug, Clone)]
pub struct RoundSummary {
    pub round: u32,
    pub reports: Vec<SearchReport>,
    pub failures: Vec<AgentFailure>,
    /// ラウンド終了時点の発見済みターゲット数
    pub found: usize,
    pub targets: usize,
    pub detections: DetectionStats,
}

impl RoundSummary {
    pub fn cleared(&self) -> bool {
        self.found == self.targets
    }
}

/// シミュレーション全体の結果
#[derive(Debug, Clone, Default)]
pub struct SimulationSummary {
    pub rounds: Vec<RoundSummary>,
}

impl SimulationSummary {
    pub fn total_found(&self) -> usize {
        self.rounds.iter().map(|r| r.found).sum()
    }

    pub fn total_targets(&self) -> usize {
        self.rounds.iter().map(|r| r.targets).sum()
    }
}

/// 初期化済みの探索世界
struct SearchWorld {
    config: SearchConfig,
    field: Arc<TargetField>,
    agents: Vec<Arc<dyn INavigator>>,
    sensor: Arc<SenseService>,
}

pub struct SimulationEngine {
    scenario: ScenarioConfig,
    verbose_level: u8,
    events: Arc<EventRecorder>,
    world: Option<SearchWorld>,
}

impl SimulationEngine {
    pub fn new(scenario: ScenarioConfig, verbose_level: u8) -> Self {
        Self {
            scenario,
            verbose_level,
            events: Arc::new(EventRecorder::forwarding_to(Box::new(TracingEventSink))),
            world: None,
        }
    }

    pub fn initialize(&mut self) -> Result<(), SimulationError> {
        if self.verbose_level > 0 {
            info!("シミュレーションエンジンを初期化中...");
        }

        let config = self.scenario.search_config()?;
        let field = Arc::new(self.initialize_field()?);
        let agents = self.initialize_agents();

        let mut sensor = SenseService::new(field.clone(), config.sensor_range, config.found_threshold);
        for agent in &agents {
            sensor.register(agent.clone());
        }

        if self.verbose_level > 0 {
            info!("初期化完了:");
            info!("  ターゲット: {}個", field.len());
            info!("  エージェント: {}機", agents.len());
        }

        self.world = Some(SearchWorld {
            config,
            field,
            agents,
            sensor: Arc::new(sensor),
        });
        Ok(())
    }

    fn initialize_field(&self) -> Result<TargetField, SearchError> {
        let seed = self.scenario.sim.seed;
        match &self.scenario.targets.positions {
            Some(positions) => TargetField::with_positions(self.scenario.area, positions.clone(), seed),
            None => TargetField::generate(self.scenario.area, self.scenario.targets.target_count(), seed),
        }
    }

    fn initialize_agents(&self) -> Vec<Arc<dyn INavigator>> {
        self.scenario
            .agents
            .iter()
            .map(|agent_config| {
                let params = agent_config.vehicle_params();
                let agent: Arc<dyn INavigator> = match agent_config.telemetry {
                    TelemetryMode::Polled => Arc::new(PolledAgent::new(agent_config.id, agent_config.start, params)),
                    TelemetryMode::Streamed => {
                        let (link, telemetry) = SimulatedLink::channel(agent_config.start, params);
                        Arc::new(StreamedAgent::new(
                            agent_config.id,
                            agent_config.start,
                            Box::new(link),
                            telemetry,
                            agent_config.reach_threshold_m,
                            agent_config.telemetry_timeout(),
                        ))
                    }
                };

                if self.verbose_level > 1 {
                    debug!(
                        "エージェント初期化: {} ({:?}, 開始位置 {})",
                        agent_config.id, agent_config.telemetry, agent_config.start
                    );
                }
                agent
            })
            .collect()
    }

    /// 全ラウンドを実行
    ///
    /// 未初期化の場合は先に `initialize` を行います。
    pub fn run(&mut self) -> Result<SimulationSummary, SimulationError> {
        if self.world.is_none() {
            self.initialize()?;
        }
        let Some(world) = self.world.as_ref() else {
            return Ok(SimulationSummary::default());
        };

        info!("=== シミュレーション実行開始 ===");
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(world.agents.len().max(1))
            .thread_name("geosearch-round")
            .build()?;

        let mut summary = SimulationSummary::default();
        for round in 0..self.scenario.sim.rounds {
            if round > 0 {
                // 前ラウンドの全プランナーが終了してから再配置する
                world.field.reset()?;
            }
            world.sensor.clear_history();

            let result = runtime.block_on(self.run_round(world, round))?;
            info!(
                "ラウンド {} 完了: {}/{} 発見, 中断 {}機",
                round + 1,
                result.found,
                result.targets,
                result.failures.len()
            );
            summary.rounds.push(result);
        }

        info!("=== シミュレーション完了 ===");
        info!("総発見数: {}/{}", summary.total_found(), summary.total_targets());
        Ok(summary)
    }

    async fn run_round(&self, world: &SearchWorld, round: u32) -> Result<RoundSummary, SimulationError> {
        let mut handles = Vec::with_capacity(world.agents.len());
        for agent in &world.agents {
            let agent_id = agent.agent_id();
            let seed = self
                .scenario
                .sim
                .seed
                .wrapping_add(u64::from(round) << 32)
                .wrapping_add(u64::from(agent_id));
            let mut planner = SearchPlanner::new(
                world.config.clone(),
                agent.clone(),
                world.sensor.clone(),
                self.events.clone(),
                seed,
            )?;
            handles.push((agent_id, tokio::task::spawn_blocking(move || planner.run())));
        }

        let mut reports = Vec::new();
        let mut failures = Vec::new();
        for (agent_id, handle) in handles {
            match handle.await {
                Ok(Ok(report)) => {
                    if self.verbose_level > 0 {
                        let reason = match report.termination {
                            Termination::FieldCleared => "全ターゲット発見",
                            Termination::SweepExhausted => "掃引完了",
                        };
                        info!(
                            "エージェント {}: {} (発見 {}件, ウェイポイント {}点)",
                            agent_id,
                            reason,
                            report.discoveries.len(),
                            report.waypoints_visited
                        );
                    }
                    reports.push(report);
                }
                Ok(Err(err)) => {
                    warn!("エージェント {} の探索が中断されました: {}", agent_id, err);
                    failures.push(AgentFailure {
                        agent_id,
                        reason: err.to_string(),
                    });
                }
                Err(join_error) => {
                    error!("エージェント {} のタスクが失敗: {}", agent_id, join_error);
                    return Err(SimulationError::PlannerPanicked(agent_id));
                }
            }
        }

        Ok(RoundSummary {
            round,
            reports,
            failures,
            found: world.field.found_count(),
            targets: world.field.len(),
            detections: world.sensor.detection_stats(),
        })
    }

    /// 記録された発見イベント数（全ラウンド）
    pub fn discoveries_by(&self, agent_id: u32) -> usize {
        self.events.discoveries_by(agent_id)
    }
}
