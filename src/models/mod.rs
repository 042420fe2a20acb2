// 測地座標・境界矩形と数学ユーティリティ
pub mod common;
pub mod circle;

// コラボレーターとの境界（trait）定義
pub mod traits;
pub mod events;

// ターゲット・センサー・機体モデル
pub mod target;
pub mod sensor;
pub mod agent;

// 便利な re-export
pub use common::{GeoBounds, GeoPoint, EARTH_MEAN_RADIUS_M};
pub use circle::GeoCircle;
pub use traits::*;
pub use events::{EventRecorder, SearchEvent, TracingEventSink};
pub use target::{SensorReading, Target, TargetField};
pub use sensor::{DetectionEvent, DetectionStats, SenseService};
pub use agent::{PolledAgent, PositionMessage, SimulatedLink, SimulatedVehicle, StreamedAgent, VehicleParams};
