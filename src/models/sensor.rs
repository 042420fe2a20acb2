use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::error::{Result, SearchError};
use crate::models::common::GeoPoint;
use crate::models::target::{SensorReading, TargetField};
use crate::models::traits::{INavigator, ISenseLink};

/// 保持する検知履歴の上限
const DEFAULT_HISTORY_LIMIT: usize = 1024;

/// センスサービス
///
/// エージェントIDから現在位置を引き、設定されたセンサー範囲と
/// 発見判定距離で `TargetField::sense` を呼び出します。周辺システムでは
/// ネットワーク越しの「sense」エンドポイントの裏側に位置します。
pub struct SenseService {
    field: Arc<TargetField>,
    agents: HashMap<u32, Arc<dyn INavigator>>,
    /// センサー範囲（メートル）
    sensor_range: f64,
    /// 発見判定距離（メートル）
    found_threshold: f64,
    history: Mutex<VecDeque<DetectionEvent>>,
    history_limit: usize,
}

/// 検知イベント
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    /// 要求元エージェント
    pub agent_id: u32,
    /// センス時のエージェント位置
    pub position: GeoPoint,
    /// 判定結果
    pub reading: SensorReading,
}

/// 検知統計情報
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionStats {
    pub total: usize,
    pub out_of_range: usize,
    pub in_range: usize,
    pub found: usize,
}

impl SenseService {
    pub fn new(field: Arc<TargetField>, sensor_range: f64, found_threshold: f64) -> Self {
        Self {
            field,
            agents: HashMap::new(),
            sensor_range,
            found_threshold,
            history: Mutex::new(VecDeque::new()),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// エージェントを登録（ハンドシェイク相当）
    pub fn register(&mut self, agent: Arc<dyn INavigator>) {
        debug!("センスサービスにエージェント {} を登録", agent.agent_id());
        self.agents.insert(agent.agent_id(), agent);
    }

    pub fn agent_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.agents.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn field(&self) -> &Arc<TargetField> {
        &self.field
    }

    /// 直近の検知イベント（新しい順ではなく発生順）
    pub fn recent_detections(&self, count: usize) -> Vec<DetectionEvent> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let start = history.len().saturating_sub(count);
        history.iter().skip(start).cloned().collect()
    }

    pub fn detection_stats(&self) -> DetectionStats {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.iter().fold(DetectionStats::default(), |mut stats, event| {
            stats.total += 1;
            match event.reading {
                SensorReading::OutOfRange => stats.out_of_range += 1,
                SensorReading::InRange { .. } => stats.in_range += 1,
                SensorReading::Found { .. } => stats.found += 1,
            }
            stats
        })
    }

    pub fn clear_history(&self) {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn record(&self, event: DetectionEvent) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if history.len() >= self.history_limit {
            history.pop_front();
        }
        history.push_back(event);
    }
}

impl ISenseLink for SenseService {
    fn sense(&self, agent_id: u32) -> Result<SensorReading> {
        let agent = self
            .agents
            .get(&agent_id)
            .ok_or_else(|| SearchError::Sense(format!("unknown agent id {agent_id}")))?;

        let position = agent.current_position();
        let reading = self.field.sense(&position, self.sensor_range, self.found_threshold)?;
        self.record(DetectionEvent { agent_id, position, reading });
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MoveError;
    use crate::models::common::GeoBounds;

    struct Parked(u32, GeoPoint);

    impl INavigator for Parked {
        fn agent_id(&self) -> u32 {
            self.0
        }
        fn current_position(&self) -> GeoPoint {
            self.1
        }
        fn go_to(&self, _point: &GeoPoint) -> std::result::Result<(), MoveError> {
            Ok(())
        }
    }

    fn service() -> SenseService {
        let bounds = GeoBounds::new(0.01, 0.0, 0.01, 0.0).unwrap();
        let target = GeoPoint::surface(0.005, 0.005).unwrap();
        let field = Arc::new(TargetField::with_positions(bounds, vec![target], 1).unwrap());
        let mut service = SenseService::new(field, 400.0, 50.0);
        service.register(Arc::new(Parked(1, target.offset(200.0, 0.0, None).unwrap())));
        service.register(Arc::new(Parked(2, target.offset(0.0, 10.0, None).unwrap())));
        service
    }

    #[test]
    fn test_sense_uses_agent_position() {
        let service = service();
        assert!(matches!(service.sense(1).unwrap(), SensorReading::InRange { .. }));
        assert!(matches!(service.sense(2).unwrap(), SensorReading::Found { .. }));
        assert!(matches!(service.sense(1), Err(SearchError::EmptyField)));
    }

    #[test]
    fn test_unknown_agent_is_rejected() {
        let service = service();
        assert!(matches!(service.sense(9), Err(SearchError::Sense(_))));
        assert_eq!(service.agent_ids(), vec![1, 2]);
    }

    #[test]
    fn test_detection_stats() {
        let service = service();
        service.sense(1).unwrap();
        service.sense(1).unwrap();
        service.sense(2).unwrap();

        let stats = service.detection_stats();
        assert_eq!(stats, DetectionStats { total: 3, out_of_range: 0, in_range: 2, found: 1 });
        assert_eq!(service.recent_detections(1)[0].agent_id, 2);
        service.clear_history();
        assert_eq!(service.detection_stats().total, 0);
    }
}
