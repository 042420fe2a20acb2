//! # Error モジュール
//!
//! 探索エンジン全体で共有するエラー型を定義します。

use thiserror::Error;

/// 探索処理の結果型
pub type Result<T> = std::result::Result<T, SearchError>;

/// 移動コラボレーター（機体リンク）から返されるエラー
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MoveError {
    /// 到達判定範囲に入る前にティック予算を使い切った
    #[error("ウェイポイント {waypoint} への移動がタイムアウトしました ({elapsed_ticks} ティック)")]
    Timeout { waypoint: String, elapsed_ticks: u32 },

    /// 機体とのリンクが切断された
    #[error("機体リンクが切断されました: {0}")]
    LinkLost(String),
}

/// 探索コアのエラー
#[derive(Error, Debug)]
pub enum SearchError {
    /// 座標・半径・設定値の検証エラー（生成時に致命的）
    #[error("検証エラー: {0}")]
    Validation(String),

    /// 三辺測量の入力が退化している
    #[error("幾何エラー: {0}")]
    Geometry(String),

    /// プローブ後に有効な証拠が得られなかった
    #[error("位置特定エラー: {0}")]
    Localization(String),

    /// 未発見のターゲットが残っていない
    #[error("未発見のターゲットが残っていません")]
    EmptyField,

    #[error(transparent)]
    Move(#[from] MoveError),

    /// センス要求そのものが失敗した（未登録エージェントなど）
    #[error("センスエラー: {0}")]
    Sense(String),

    /// リトライ上限を超えたため探索を中断した
    #[error("エージェント {agent_id} の探索を中断: {waypoint} へ {attempts} 回移動に失敗 ({source})")]
    RunAborted {
        agent_id: u32,
        waypoint: String,
        attempts: u32,
        source: MoveError,
    },
}

impl SearchError {
    /// 三辺測量が解けない配置に対する標準エラー
    pub fn degenerate_geometry() -> Self {
        SearchError::Geometry("non-intersecting or degenerate configuration".to_string())
    }
}
