use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::MoveError;
use crate::models::common::GeoPoint;
use crate::models::traits::{ICommandLink, INavigator};

/// 機体の運動パラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleParams {
    /// 巡航速度（m/s）
    pub speed_mps: f64,
    /// 1ティックの時間（秒）
    pub tick_s: f64,
    /// 到達判定距離（メートル）
    pub reach_threshold_m: f64,
    /// 1回の移動で許容する最大ティック数
    pub max_ticks: u32,
}

/// 等速で直進する模擬機体
///
/// 1ティックごとに `speed_mps * tick_s` だけ目標へ近づき、
/// 残り距離が1ティック分以下になると目標点にそのまま到着します。
#[derive(Debug, Clone)]
pub struct SimulatedVehicle {
    pub position: GeoPoint,
    pub speed_mps: f64,
}

impl SimulatedVehicle {
    pub fn new(position: GeoPoint, speed_mps: f64) -> Self {
        Self { position, speed_mps }
    }

    /// 1ティック分だけ目標へ移動する。到着したら真を返す。
    pub fn advance(&mut self, target: &GeoPoint, dt: f64) -> bool {
        let step = self.speed_mps * dt;
        let remaining = self.position.horizontal_distance_to(target);
        if remaining <= step {
            self.position = target.with_alt(target.alt().or(self.position.alt()));
            return true;
        }

        let (east, north) = self.position.local_offset_to(target);
        let ratio = step / remaining;
        let climb = match (self.position.alt(), target.alt()) {
            (Some(from), Some(to)) => Some((to - from) * ratio),
            _ => None,
        };
        match self.position.offset(east * ratio, north * ratio, climb) {
            Ok(next) => {
                self.position = next;
                false
            }
            // 局所変換が破綻する位置（極付近）では目標点へ直接移す
            Err(_) => {
                self.position = *target;
                true
            }
        }
    }
}

/// ポーリング型エージェント
///
/// 模擬機体を直接保持し、移動中は1ティックごとに位置を問い合わせて
/// 到達判定を行います。
#[derive(Debug)]
pub struct PolledAgent {
    id: u32,
    vehicle: Mutex<SimulatedVehicle>,
    params: VehicleParams,
}

impl PolledAgent {
    pub fn new(id: u32, start: GeoPoint, params: VehicleParams) -> Self {
        Self {
            id,
            vehicle: Mutex::new(SimulatedVehicle::new(start, params.speed_mps)),
            params,
        }
    }
}

impl INavigator for PolledAgent {
    fn agent_id(&self) -> u32 {
        self.id
    }

    fn current_position(&self) -> GeoPoint {
        self.vehicle.lock().unwrap_or_else(PoisonError::into_inner).position
    }

    fn go_to(&self, point: &GeoPoint) -> Result<(), MoveError> {
        let mut vehicle = self.vehicle.lock().unwrap_or_else(PoisonError::into_inner);
        for tick in 0..=self.params.max_ticks {
            if vehicle.position.horizontal_distance_to(point) < self.params.reach_threshold_m {
                trace!("エージェント {} が {} に到達 ({} ティック)", self.id, point, tick);
                return Ok(());
            }
            if tick < self.params.max_ticks {
                vehicle.advance(point, self.params.tick_s);
            }
        }

        warn!("エージェント {} の移動がタイムアウト: {}", self.id, point);
        Err(MoveError::Timeout {
            waypoint: point.to_string(),
            elapsed_ticks: self.params.max_ticks,
        })
    }
}

/// 機体から送られる位置テレメトリ
///
/// 緯度経度は1e-7度単位、高度はミリメートル単位の整数で運ばれます。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionMessage {
    pub system_id: u32,
    pub lat_e7: i32,
    pub lon_e7: i32,
    pub alt_mm: i32,
}

impl PositionMessage {
    pub fn encode(system_id: u32, position: &GeoPoint) -> Self {
        Self {
            system_id,
            lat_e7: (position.lat() * 1e7).round() as i32,
            lon_e7: (position.lon() * 1e7).round() as i32,
            alt_mm: (position.alt().unwrap_or(0.0) * 1e3).round() as i32,
        }
    }

    pub fn decode(&self) -> Option<GeoPoint> {
        GeoPoint::new(
            self.lat_e7 as f64 * 1e-7,
            self.lon_e7 as f64 * 1e-7,
            Some(self.alt_mm as f64 * 1e-3),
        )
        .ok()
    }
}

/// ストリーム型エージェント
///
/// ウェイポイントをコマンドリンクへ送り、機体から押し出される
/// テレメトリを受信して到達を判定します。他機体のメッセージは無視します。
pub struct StreamedAgent {
    id: u32,
    link: Box<dyn ICommandLink>,
    telemetry: Mutex<Receiver<PositionMessage>>,
    latest: Mutex<GeoPoint>,
    reach_threshold_m: f64,
    /// テレメトリ1件を待つ最大時間
    telemetry_timeout: Duration,
}

impl StreamedAgent {
    pub fn new(
        id: u32,
        home: GeoPoint,
        link: Box<dyn ICommandLink>,
        telemetry: Receiver<PositionMessage>,
        reach_threshold_m: f64,
        telemetry_timeout: Duration,
    ) -> Self {
        Self {
            id,
            link,
            telemetry: Mutex::new(telemetry),
            latest: Mutex::new(home),
            reach_threshold_m,
            telemetry_timeout,
        }
    }

    fn accept(&self, message: PositionMessage) -> Option<GeoPoint> {
        if message.system_id != self.id {
            return None;
        }
        let position = message.decode()?;
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = position;
        Some(position)
    }
}

impl INavigator for StreamedAgent {
    fn agent_id(&self) -> u32 {
        self.id
    }

    fn current_position(&self) -> GeoPoint {
        let telemetry = self.telemetry.lock().unwrap_or_else(PoisonError::into_inner);
        while let Ok(message) = telemetry.try_recv() {
            self.accept(message);
        }
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn go_to(&self, point: &GeoPoint) -> Result<(), MoveError> {
        let telemetry = self.telemetry.lock().unwrap_or_else(PoisonError::into_inner);
        // 送信前に溜まっていた古いテレメトリを反映しておく
        loop {
            match telemetry.try_recv() {
                Ok(message) => {
                    self.accept(message);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(MoveError::LinkLost(format!("system {} telemetry closed", self.id)));
                }
            }
        }

        let latest = *self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        if latest.horizontal_distance_to(point) < self.reach_threshold_m {
            return Ok(());
        }

        self.link.send_waypoint(self.id, point)?;

        let mut received = 0u32;
        loop {
            match telemetry.recv_timeout(self.telemetry_timeout) {
                Ok(message) => {
                    let Some(position) = self.accept(message) else {
                        continue;
                    };
                    received += 1;
                    if position.horizontal_distance_to(point) < self.reach_threshold_m {
                        trace!("エージェント {} が {} に到達 ({} メッセージ)", self.id, point, received);
                        return Ok(());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(MoveError::Timeout {
                        waypoint: point.to_string(),
                        elapsed_ticks: received,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(MoveError::LinkLost(format!("system {} telemetry closed", self.id)));
                }
            }
        }
    }
}

/// 模擬機体を駆動し、テレメトリをチャネルへ発行するコマンドリンク
///
/// ウェイポイントを受け取ると到着（またはティック上限）まで機体を進め、
/// 各ティックの位置を `PositionMessage` として送信します。
pub struct SimulatedLink {
    vehicle: Mutex<SimulatedVehicle>,
    params: VehicleParams,
    publisher: Sender<PositionMessage>,
}

impl SimulatedLink {
    /// リンクとテレメトリ受信側のペアを作成
    pub fn channel(start: GeoPoint, params: VehicleParams) -> (Self, Receiver<PositionMessage>) {
        let (publisher, receiver) = mpsc::channel();
        let link = Self {
            vehicle: Mutex::new(SimulatedVehicle::new(start, params.speed_mps)),
            params,
            publisher,
        };
        (link, receiver)
    }
}

impl ICommandLink for SimulatedLink {
    fn send_waypoint(&self, system_id: u32, waypoint: &GeoPoint) -> Result<(), MoveError> {
        let mut vehicle = self.vehicle.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("機体 {} へウェイポイント送信: {}", system_id, waypoint);

        for _ in 0..self.params.max_ticks {
            let arrived = vehicle.advance(waypoint, self.params.tick_s);
            self.publisher
                .send(PositionMessage::encode(system_id, &vehicle.position))
                .map_err(|_| MoveError::LinkLost(format!("system {system_id} telemetry receiver dropped")))?;
            if arrived {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> VehicleParams {
        VehicleParams {
            speed_mps: 15.0,
            tick_s: 1.0,
            reach_threshold_m: 10.0,
            max_ticks: 500,
        }
    }

    fn origin() -> GeoPoint {
        GeoPoint::new(0.0, 0.0, Some(10.0)).unwrap()
    }

    #[test]
    fn test_vehicle_advances_at_speed() {
        let mut vehicle = SimulatedVehicle::new(origin(), 15.0);
        let target = origin().offset(100.0, 0.0, None).unwrap();
        assert!(!vehicle.advance(&target, 1.0));
        assert!((vehicle.position.horizontal_distance_to(&origin()) - 15.0).abs() < 0.01);
        for _ in 0..6 {
            vehicle.advance(&target, 1.0);
        }
        assert_eq!(vehicle.position, target);
    }

    #[test]
    fn test_polled_agent_reaches_waypoint() {
        let agent = PolledAgent::new(1, origin(), params());
        let target = origin().offset(400.0, -300.0, None).unwrap();
        agent.go_to(&target).unwrap();
        assert!(agent.current_position().horizontal_distance_to(&target) < 10.0);
    }

    #[test]
    fn test_polled_agent_times_out() {
        let agent = PolledAgent::new(1, origin(), VehicleParams { max_ticks: 3, ..params() });
        let target = origin().offset(1000.0, 0.0, None).unwrap();
        let err = agent.go_to(&target).unwrap_err();
        assert!(matches!(err, MoveError::Timeout { elapsed_ticks: 3, .. }));
    }

    #[test]
    fn test_position_message_scaling() {
        let p = GeoPoint::new(0.0279123, 36.9051234, Some(10.5)).unwrap();
        let message = PositionMessage::encode(3, &p);
        assert_eq!(message.lat_e7, 279_123);
        assert_eq!(message.alt_mm, 10_500);
        let decoded = message.decode().unwrap();
        assert!(decoded.distance_to(&p, false) < 0.05);
    }

    #[test]
    fn test_streamed_agent_follows_telemetry() {
        let (link, telemetry) = SimulatedLink::channel(origin(), params());
        let agent = StreamedAgent::new(2, origin(), Box::new(link), telemetry, 10.0, Duration::from_millis(50));
        let target = origin().offset(-250.0, 120.0, None).unwrap();

        agent.go_to(&target).unwrap();
        assert!(agent.current_position().horizontal_distance_to(&target) < 10.0);
    }

    #[test]
    fn test_streamed_agent_ignores_other_systems() {
        let (publisher, telemetry) = mpsc::channel();
        let (link, _unused) = SimulatedLink::channel(origin(), params());
        let agent = StreamedAgent::new(4, origin(), Box::new(link), telemetry, 10.0, Duration::from_millis(20));

        let elsewhere = origin().offset(900.0, 900.0, None).unwrap();
        publisher.send(PositionMessage::encode(7, &elsewhere)).unwrap();
        assert!(agent.current_position().horizontal_distance_to(&origin()) < 0.01);

        let mine = origin().offset(30.0, 0.0, None).unwrap();
        publisher.send(PositionMessage::encode(4, &mine)).unwrap();
        assert!(agent.current_position().horizontal_distance_to(&mine) < 0.05);
    }

    #[test]
    fn test_streamed_agent_reports_link_loss() {
        let (link, telemetry) = SimulatedLink::channel(origin(), params());
        let (_other_link, other_rx) = SimulatedLink::channel(origin(), params());
        drop(telemetry);
        let agent = StreamedAgent::new(5, origin(), Box::new(link), other_rx, 10.0, Duration::from_millis(20));
        let target = origin().offset(200.0, 0.0, None).unwrap();
        assert!(matches!(agent.go_to(&target), Err(MoveError::LinkLost(_))));
    }
}
