use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::error::{Result, SearchError};
use crate::models::common::{GeoBounds, GeoPoint};

/// 探索対象のターゲット
///
/// `TargetField` が排他的に所有します。`found` はラウンド中に
/// false→true へ一度だけ遷移し、`reset` でのみ元に戻ります。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Target {
    /// ターゲットの一意識別子
    pub id: String,
    /// ターゲットの位置
    pub position: GeoPoint,
    /// 発見済みフラグ
    pub found: bool,
}

impl Target {
    pub fn new(id: String, position: GeoPoint) -> Self {
        Self { id, position, found: false }
    }
}

/// センス結果
///
/// 毎回新しく生成され、保存されません。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SensorReading {
    /// センサー範囲外
    OutOfRange,
    /// センサー範囲内（最寄りターゲットまでの距離）
    InRange { distance: f64 },
    /// 発見判定距離未満（このセンスでターゲットを発見済みにした）
    Found { distance: f64 },
}

impl SensorReading {
    pub fn distance(&self) -> Option<f64> {
        match self {
            SensorReading::OutOfRange => None,
            SensorReading::InRange { distance } | SensorReading::Found { distance } => Some(*distance),
        }
    }
}

/// ターゲット群のレジストリ
///
/// 複数エージェントから同時に `sense` されるため、ターゲット配列は
/// 単一のミューテックスで保護します。最寄り探索と発見フラグの
/// 書き換えは同じロック区間で行われ、同じターゲットを二重に
/// 発見することはありません。
#[derive(Debug)]
pub struct TargetField {
    /// 位置生成に使う境界矩形
    bounds: GeoBounds,
    /// ランダム生成するターゲット数
    count: usize,
    targets: Mutex<Vec<Target>>,
    rng: Mutex<StdRng>,
}

impl TargetField {
    /// 境界内にランダムなターゲットを生成
    pub fn generate(bounds: GeoBounds, count: usize, seed: u64) -> Result<Self> {
        bounds.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let targets = Self::random_targets(&bounds, count, &mut rng)?;
        info!("ターゲットフィールド生成: {}個 (シード: {})", count, seed);

        Ok(Self {
            bounds,
            count,
            targets: Mutex::new(targets),
            rng: Mutex::new(rng),
        })
    }

    /// 位置を指定してフィールドを作成
    ///
    /// `reset` すると同数のターゲットが境界内にランダム再配置されます。
    pub fn with_positions(bounds: GeoBounds, positions: Vec<GeoPoint>, seed: u64) -> Result<Self> {
        bounds.validate()?;
        let targets: Vec<Target> = positions
            .into_iter()
            .enumerate()
            .map(|(index, position)| Target::new(format!("T{:03}", index + 1), position))
            .collect();

        Ok(Self {
            bounds,
            count: targets.len(),
            targets: Mutex::new(targets),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    fn random_targets(bounds: &GeoBounds, count: usize, rng: &mut StdRng) -> Result<Vec<Target>> {
        (0..count)
            .map(|index| {
                let lat = rng.gen_range(bounds.south..=bounds.north);
                let lon = rng.gen_range(bounds.west..=bounds.east);
                Ok(Target::new(format!("T{:03}", index + 1), GeoPoint::surface(lat, lon)?))
            })
            .collect()
    }

    fn lock_targets(&self) -> MutexGuard<'_, Vec<Target>> {
        self.targets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 全ターゲットを再配置し、発見フラグをクリアする
    ///
    /// 呼び出し側は、実行中のセンス・移動がないことを保証してください。
    pub fn reset(&self) -> Result<()> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let fresh = Self::random_targets(&self.bounds, self.count, &mut rng)?;
        *self.lock_targets() = fresh;
        info!("ターゲットフィールドをリセットしました: {}個", self.count);
        Ok(())
    }

    /// 最寄りの未発見ターゲットまでの水平距離とそのインデックス
    pub fn nearest_undiscovered(&self, position: &GeoPoint) -> Result<(f64, usize)> {
        Self::nearest_in(&self.lock_targets(), position)
    }

    fn nearest_in(targets: &[Target], position: &GeoPoint) -> Result<(f64, usize)> {
        targets
            .iter()
            .enumerate()
            .filter(|(_, target)| !target.found)
            .map(|(index, target)| (position.horizontal_distance_to(&target.position), index))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .ok_or(SearchError::EmptyField)
    }

    /// センス判定
    ///
    /// * `distance > sensor_range` → `OutOfRange`
    /// * `distance < found_threshold` → ターゲットを発見済みにして `Found`
    /// * それ以外 → `InRange`
    pub fn sense(&self, position: &GeoPoint, sensor_range: f64, found_threshold: f64) -> Result<SensorReading> {
        let mut targets = self.lock_targets();
        let (distance, index) = Self::nearest_in(&targets, position)?;

        let reading = if distance > sensor_range {
            SensorReading::OutOfRange
        } else if distance < found_threshold {
            let target = &mut targets[index];
            target.found = true;
            debug!("ターゲット {} を発見 (距離: {:.1}m)", target.id, distance);
            SensorReading::Found { distance }
        } else {
            SensorReading::InRange { distance }
        };

        trace!("センス {} -> {:?}", position, reading);
        Ok(reading)
    }

    pub fn bounds(&self) -> GeoBounds {
        self.bounds
    }

    pub fn len(&self) -> usize {
        self.lock_targets().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 未発見ターゲット数
    pub fn remaining(&self) -> usize {
        self.lock_targets().iter().filter(|t| !t.found).count()
    }

    pub fn found_count(&self) -> usize {
        self.lock_targets().iter().filter(|t| t.found).count()
    }

    /// 現在のターゲット状態のスナップショット
    pub fn snapshot(&self) -> Vec<Target> {
        self.lock_targets().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn bounds() -> GeoBounds {
        GeoBounds::new(0.01, 0.0, 0.01, 0.0).unwrap()
    }

    fn field_with(positions: Vec<GeoPoint>) -> TargetField {
        TargetField::with_positions(bounds(), positions, 7).unwrap()
    }

    #[test]
    fn test_generate_within_bounds() {
        let field = TargetField::generate(bounds(), 25, 42).unwrap();
        assert_eq!(field.len(), 25);
        assert_eq!(field.remaining(), 25);
        assert!(field.snapshot().iter().all(|t| bounds().contains(&t.position)));
    }

    #[test]
    fn test_same_seed_same_field() {
        let a = TargetField::generate(bounds(), 5, 9).unwrap().snapshot();
        let b = TargetField::generate(bounds(), 5, 9).unwrap().snapshot();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sense_classification_boundaries() {
        let origin = GeoPoint::surface(0.005, 0.005).unwrap();
        for (offset, expected) in [
            (401.0, "out"),
            (200.0, "in"),
            (49.0, "found"),
        ] {
            let field = field_with(vec![origin.offset(offset, 0.0, None).unwrap()]);
            let reading = field.sense(&origin, 400.0, 50.0).unwrap();
            match expected {
                "out" => assert_eq!(reading, SensorReading::OutOfRange),
                "in" => {
                    let d = reading.distance().unwrap();
                    assert!(matches!(reading, SensorReading::InRange { .. }));
                    assert!((d - 200.0).abs() < 0.5);
                    assert_eq!(field.found_count(), 0);
                }
                _ => {
                    assert!(matches!(reading, SensorReading::Found { .. }));
                    assert_eq!(field.found_count(), 1);
                }
            }
        }
    }

    #[test]
    fn test_nearest_skips_found_targets() {
        let origin = GeoPoint::surface(0.005, 0.005).unwrap();
        let near = origin.offset(10.0, 0.0, None).unwrap();
        let far = origin.offset(0.0, 300.0, None).unwrap();
        let field = field_with(vec![far, near]);

        assert_eq!(field.nearest_undiscovered(&origin).unwrap().1, 1);
        assert!(matches!(field.sense(&origin, 400.0, 50.0).unwrap(), SensorReading::Found { .. }));

        let (distance, index) = field.nearest_undiscovered(&origin).unwrap();
        assert_eq!(index, 0);
        assert!((distance - 300.0).abs() < 0.5);
    }

    #[test]
    fn test_empty_field_error() {
        let origin = GeoPoint::surface(0.005, 0.005).unwrap();
        let field = field_with(vec![origin]);
        field.sense(&origin, 400.0, 50.0).unwrap();
        assert!(matches!(field.nearest_undiscovered(&origin), Err(SearchError::EmptyField)));
        assert!(matches!(field.sense(&origin, 400.0, 50.0), Err(SearchError::EmptyField)));

        let empty = field_with(Vec::new());
        assert!(empty.is_empty());
        assert!(matches!(empty.sense(&origin, 400.0, 50.0), Err(SearchError::EmptyField)));
    }

    #[test]
    fn test_reset_clears_flags() {
        let origin = GeoPoint::surface(0.005, 0.005).unwrap();
        let field = field_with(vec![origin, origin.offset(5.0, 5.0, None).unwrap()]);
        field.sense(&origin, 400.0, 50.0).unwrap();
        field.sense(&origin, 400.0, 50.0).unwrap();
        assert_eq!(field.remaining(), 0);

        field.reset().unwrap();
        assert_eq!(field.len(), 2);
        assert_eq!(field.remaining(), 2);
        assert!(field.snapshot().iter().all(|t| bounds().contains(&t.position)));
    }

    #[test]
    fn test_concurrent_sense_discovers_once() {
        let origin = GeoPoint::surface(0.005, 0.005).unwrap();
        let close = origin.offset(5.0, 5.0, None).unwrap();
        let distant = origin.offset(3000.0, 0.0, None).unwrap();
        let field = field_with(vec![close, distant]);
        let agents = 16;
        let barrier = Barrier::new(agents);

        let readings: Vec<SensorReading> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..agents)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        field.sense(&origin, 400.0, 50.0).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let found = readings.iter().filter(|r| matches!(r, SensorReading::Found { .. })).count();
        assert_eq!(found, 1);
        assert_eq!(readings.iter().filter(|r| **r == SensorReading::OutOfRange).count(), agents - 1);
        assert_eq!(field.nearest_undiscovered(&origin).unwrap().1, 1);
    }
}
