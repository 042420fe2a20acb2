use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use tracing::{info, warn};

use crate::models::common::GeoPoint;
use crate::models::traits::IEventSink;

/// プランナーが通知するイベント
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    /// ターゲットを発見した
    TargetFound { agent_id: u32, position: GeoPoint, distance: f64 },
    /// エージェントの位置が更新された
    PositionUpdated { agent_id: u32, position: GeoPoint },
    /// 範囲内センスにより位置特定を開始した
    LocalizationStarted { agent_id: u32, position: GeoPoint, distance: f64 },
    /// 位置特定を断念した
    LocalizationAbandoned { agent_id: u32, reason: String },
}

/// イベントをtracingの構造化ログとして出力するシンク
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl IEventSink for TracingEventSink {
    fn notify(&self, event: SearchEvent) {
        match event {
            SearchEvent::TargetFound { agent_id, position, distance } => {
                info!(agent_id, lat = position.lat(), lon = position.lon(), distance, "ターゲット発見");
            }
            SearchEvent::PositionUpdated { agent_id, position } => {
                tracing::debug!(agent_id, lat = position.lat(), lon = position.lon(), "位置更新");
            }
            SearchEvent::LocalizationStarted { agent_id, position, distance } => {
                info!(agent_id, lat = position.lat(), lon = position.lon(), distance, "位置特定開始");
            }
            SearchEvent::LocalizationAbandoned { agent_id, reason } => {
                warn!(agent_id, %reason, "位置特定を断念");
            }
        }
    }
}

/// 保持するイベント履歴の上限
const DEFAULT_EVENT_LIMIT: usize = 4096;

/// イベントを記録しつつ下流のシンクへ転送するレコーダー
///
/// シミュレーションの集計やテストでの検証に使用します。履歴は上限付きで、
/// 古いイベントから捨てられます。発見数は履歴とは別に数えます。
pub struct EventRecorder {
    events: Mutex<VecDeque<SearchEvent>>,
    discoveries: Mutex<HashMap<u32, usize>>,
    forward: Option<Box<dyn IEventSink>>,
    limit: usize,
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::with_limit(DEFAULT_EVENT_LIMIT)
    }
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 履歴の上限を指定して作成
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            discoveries: Mutex::new(HashMap::new()),
            forward: None,
            limit: limit.max(1),
        }
    }

    /// 記録後に `sink` へも転送する
    pub fn forwarding_to(sink: Box<dyn IEventSink>) -> Self {
        Self {
            forward: Some(sink),
            ..Self::default()
        }
    }

    /// 保持している直近のイベント（発生順）
    pub fn events(&self) -> Vec<SearchEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect()
    }

    /// エージェントごとの発見数
    pub fn discoveries_by(&self, agent_id: u32) -> usize {
        self.discoveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&agent_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.discoveries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl IEventSink for EventRecorder {
    fn notify(&self, event: SearchEvent) {
        if let Some(sink) = &self.forward {
            sink.notify(event.clone());
        }
        if let SearchEvent::TargetFound { agent_id, .. } = event {
            *self
                .discoveries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(agent_id)
                .or_insert(0) += 1;
        }
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= self.limit {
            events.pop_front();
        }
        events.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_counts_per_agent() {
        let recorder = EventRecorder::forwarding_to(Box::new(TracingEventSink));
        let p = GeoPoint::surface(0.0, 0.0).unwrap();
        recorder.notify(SearchEvent::TargetFound { agent_id: 1, position: p, distance: 3.0 });
        recorder.notify(SearchEvent::PositionUpdated { agent_id: 1, position: p });
        recorder.notify(SearchEvent::TargetFound { agent_id: 2, position: p, distance: 8.0 });
        recorder.notify(SearchEvent::TargetFound { agent_id: 1, position: p, distance: 1.0 });

        assert_eq!(recorder.events().len(), 4);
        assert_eq!(recorder.discoveries_by(1), 2);
        assert_eq!(recorder.discoveries_by(2), 1);
        recorder.clear();
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_history_is_bounded_but_discoveries_are_kept() {
        let recorder = EventRecorder::with_limit(3);
        let p = GeoPoint::surface(0.0, 0.0).unwrap();
        recorder.notify(SearchEvent::TargetFound { agent_id: 4, position: p, distance: 2.0 });
        for _ in 0..10 {
            recorder.notify(SearchEvent::PositionUpdated { agent_id: 4, position: p });
        }

        let events = recorder.events();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| matches!(e, SearchEvent::PositionUpdated { .. })));
        assert_eq!(recorder.discoveries_by(4), 1);
        recorder.clear();
        assert_eq!(recorder.discoveries_by(4), 0);
    }
}
