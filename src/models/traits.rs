use crate::error::{MoveError, Result};
use crate::models::common::GeoPoint;
use crate::models::events::SearchEvent;
use crate::models::target::SensorReading;

/// 移動可能なエージェントのインターフェース
///
/// ポーリング型・ストリーム型どちらの機体もこの能力だけを公開し、
/// プランナーは継承ではなくこのトレイト参照で機体を扱います。
pub trait INavigator: Send + Sync {
    /// エージェントID
    fn agent_id(&self) -> u32;

    /// 最新の既知位置
    fn current_position(&self) -> GeoPoint;

    /// 指定点へ移動し、到達判定範囲に入るまでブロックする
    fn go_to(&self, point: &GeoPoint) -> std::result::Result<(), MoveError>;
}

/// センス要求のインターフェース
///
/// 周辺システムではネットワーク越しの要求になりますが、コアは
/// エージェントIDを渡して同期的に結果を受け取る形だけを要求します。
pub trait ISenseLink: Send + Sync {
    fn sense(&self, agent_id: u32) -> Result<SensorReading>;
}

/// 発見・位置更新イベントの通知先（表示・得点管理側）
pub trait IEventSink: Send + Sync {
    fn notify(&self, event: SearchEvent);
}

/// ストリーム型機体へのコマンド送信リンク
pub trait ICommandLink: Send + Sync {
    /// ウェイポイントを機体へ送信する（到達は待たない）
    fn send_waypoint(&self, system_id: u32, waypoint: &GeoPoint) -> std::result::Result<(), MoveError>;
}
