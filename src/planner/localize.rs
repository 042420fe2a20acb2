//! 範囲内センスからの位置特定
//!
//! 現在位置と距離を証拠円として、周囲4方向（斜め）のプローブ点で再センスし、
//! 得られた円と三辺測量でターゲット位置を推定します。再帰ではなく
//! 上限付きのループで絞り込みを繰り返します。

use tracing::debug;

use super::{SearchPlanner, SearchState};
use crate::error::{Result, SearchError};
use crate::models::{GeoCircle, GeoPoint, SearchEvent, SensorReading};

/// 位置特定の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalizationOutcome {
    /// ターゲットを発見した
    Located,
    /// 推定点がセンサー範囲外だった
    SignalLost,
}

impl SearchPlanner {
    /// 証拠円の中心から斜め4方向へ `probe_distance` ずつずらしたプローブ点
    fn probe_points(&self, center: &GeoPoint) -> Result<[GeoPoint; 4]> {
        let d = self.config.probe_distance;
        Ok([
            center.offset(-d, d, None)?,
            center.offset(d, d, None)?,
            center.offset(d, -d, None)?,
            center.offset(-d, -d, None)?,
        ])
    }

    /// 三辺測量（設定されていれば残差検証付き）
    ///
    /// 既定では推定点が各円周上にあるかを確認しません。
    fn trilaterate(&self, home: &GeoCircle, first: &GeoCircle, second: &GeoCircle) -> Result<GeoPoint> {
        let estimate = home.intersect_three(first, second)?;

        if let Some(tolerance) = self.config.residual_tolerance {
            let worst = [home, first, second]
                .iter()
                .map(|circle| circle.residual(&estimate))
                .fold(0.0_f64, f64::max);
            if worst > tolerance {
                return Err(SearchError::Geometry(format!(
                    "trilateration residual {worst:.1}m exceeds tolerance {tolerance:.1}m"
                )));
            }
        }
        Ok(estimate)
    }

    /// 範囲内センスから位置特定を行う
    ///
    /// プローブ後に範囲内の円が1つも得られなければ `SearchError::Localization`。
    /// 三辺測量が退化した場合は最初の円への絞り込みに切り替えます。
    pub(super) fn localize(&mut self, origin: GeoCircle, state: &mut SearchState) -> Result<LocalizationOutcome> {
        let agent_id = state.report.agent_id;
        state.report.localization_attempts += 1;
        self.events.notify(SearchEvent::LocalizationStarted {
            agent_id,
            position: origin.center,
            distance: origin.radius,
        });

        let mut home = origin;
        for step in 0..self.config.max_localization_steps {
            debug!(
                "エージェント {}: 位置特定ステップ {} 中心 {} 半径 {:.1}m",
                agent_id, step, home.center, home.radius
            );

            let mut circles: Vec<GeoCircle> = Vec::with_capacity(4);
            for probe in self.probe_points(&home.center)? {
                self.move_to(&probe, state)?;
                match self.sense(state)? {
                    SensorReading::Found { distance } => {
                        self.record_and_drain(distance, state)?;
                        return Ok(LocalizationOutcome::Located);
                    }
                    SensorReading::InRange { distance } => {
                        circles.push(GeoCircle::new(self.agent.current_position(), distance)?);
                    }
                    SensorReading::OutOfRange => {}
                }
            }

            // 単一円への絞り込みではその円の中心へ移動してから再プローブする
            let (next, relocate) = match circles.as_slice() {
                [] => {
                    return Err(SearchError::Localization(format!(
                        "no probe around {} stayed in sensor range",
                        home.center
                    )));
                }
                [single] => {
                    debug!("エージェント {}: 範囲内プローブ1点のみ、絞り込みを継続", agent_id);
                    (*single, true)
                }
                [first, second, ..] => match self.trilaterate(&home, first, second) {
                    Ok(estimate) => {
                        debug!("エージェント {}: 三辺測量の推定点 {}", agent_id, estimate);
                        self.move_to(&estimate, state)?;
                        match self.sense(state)? {
                            SensorReading::Found { distance } => {
                                self.record_and_drain(distance, state)?;
                                return Ok(LocalizationOutcome::Located);
                            }
                            SensorReading::InRange { distance } => {
                                (GeoCircle::new(self.agent.current_position(), distance)?, false)
                            }
                            SensorReading::OutOfRange => return Ok(LocalizationOutcome::SignalLost),
                        }
                    }
                    Err(SearchError::Geometry(reason)) => {
                        debug!("エージェント {}: 三辺測量不可 ({})、単一円で絞り込み", agent_id, reason);
                        (*first, true)
                    }
                    Err(err) => return Err(err),
                },
            };

            if relocate {
                self.move_to(&next.center, state)?;
            }
            home = next;
        }

        Err(SearchError::Localization(format!(
            "no fix after {} localization steps",
            self.config.max_localization_steps
        )))
    }
}
