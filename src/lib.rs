//! # geosearch
//!
//! 境界矩形内に隠されたターゲットを、センス可能なエージェント群で
//! 探索するシミュレーションライブラリです。
//!
//! - `models`: 測地座標、証拠円、ターゲットフィールド、センス・機体モデル
//! - `planner`: 網羅掃引と三辺測量による位置特定
//! - `scenario`: YAML シナリオの読み込み
//! - `simulation`: 複数エージェントの並行実行
//! - `logging`: tracing によるログ出力

pub mod error;
pub mod logging;
pub mod models;
pub mod planner;
pub mod scenario;
pub mod simulation;

pub use error::{MoveError, Result, SearchError};
pub use planner::{SearchConfig, SearchPlanner, SearchReport, SearchStrategy, Termination};
