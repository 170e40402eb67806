/// UDP receive loop and per-packet dispatch
use log::{debug, error, info, warn};
use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::net::UdpSocket;

use crate::config::ListenerConfig;
use crate::models::{PacketType, StationObservation};
use crate::udp::decoder::{decode_packet, parse_station_packet, DecodeError};
use crate::udp::socket::bind_reusable;
use crate::utils::format_epoch;

const RECEIVE_RETRY_BASE: Duration = Duration::from_millis(50);
const RECEIVE_RETRY_MAX: Duration = Duration::from_secs(2);

/// What a single datagram turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Station(StationObservation),
    Air,
    Sky,
    Ignored(String),
}

#[derive(Debug)]
pub enum ListenerError {
    Bind(io::Error),
    Shape(DecodeError),
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "failed to bind UDP socket: {}", e),
            ListenerError::Shape(e) => write!(f, "malformed hub packet: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Bind(e) => Some(e),
            ListenerError::Shape(e) => Some(e),
        }
    }
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub received: u64,
    pub invalid_json: u64,
    pub malformed: u64,
    pub station: u64,
    pub air: u64,
    pub sky: u64,
    pub ignored: u64,
}

impl ListenerStats {
    fn record(&mut self, dispatch: &Dispatch) {
        match dispatch {
            Dispatch::Station(_) => self.station += 1,
            Dispatch::Air => self.air += 1,
            Dispatch::Sky => self.sky += 1,
            Dispatch::Ignored(_) => self.ignored += 1,
        }
    }
}

/// Decode one datagram and route it by its `type` field.
///
/// `obs_air` and `obs_sky` are only dumped to the log; `obs_st` is dumped and
/// then decoded into a [`StationObservation`]. Unknown types are skipped.
pub fn handle_datagram(payload: &[u8]) -> Result<Dispatch, DecodeError> {
    let packet = decode_packet(payload)?;

    match packet.kind {
        PacketType::Air => {
            info!("{}", packet.raw);
            Ok(Dispatch::Air)
        }
        PacketType::Station => {
            info!("{}", packet.raw);
            let observation = parse_station_packet(&packet.raw)?;
            Ok(Dispatch::Station(observation))
        }
        PacketType::Sky => {
            info!("{}", packet.raw);
            Ok(Dispatch::Sky)
        }
        PacketType::Other(kind) => Ok(Dispatch::Ignored(kind)),
    }
}

fn log_observation(obs: &StationObservation) {
    info!(
        "Station observation at {}: wind {:.2}/{:.2}/{:.2} mph (lull/avg/gust), temp={}°C, humidity={}%, pressure={} mb, rain={:.2} mm",
        format_epoch(obs.timestamp),
        obs.wind_lull,
        obs.wind_speed,
        obs.wind_gust,
        reading(obs.temperature),
        reading(obs.humidity),
        reading(obs.pressure),
        obs.rain
    );
    debug!(
        "  direction={}°, illuminance={} lux, uv={}, solar={} W/m², strikes={:?}, strike distance={} km, interval={:?} min, battery={:?}%",
        reading(obs.wind_direction),
        reading(obs.illumination),
        reading(obs.uv_index),
        reading(obs.solar_radiation),
        obs.strikes,
        reading(obs.lightning_distance),
        obs.reporting_interval,
        obs.battery_level()
    );
}

fn reading(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.1}", v))
}

/// Pause before the next receive after `consecutive_errors` failures in a row.
fn receive_retry_delay(consecutive_errors: u32) -> Duration {
    let shift = consecutive_errors.saturating_sub(1).min(6);
    (RECEIVE_RETRY_BASE * (1u32 << shift)).min(RECEIVE_RETRY_MAX)
}

/// Bind the configured address and receive until `shutdown` resolves.
pub async fn open_listener<F>(
    config: &ListenerConfig,
    shutdown: F,
) -> Result<ListenerStats, ListenerError>
where
    F: Future<Output = ()>,
{
    let socket = bind_reusable(config.socket_addr()).map_err(ListenerError::Bind)?;
    info!("Listening for hub broadcasts on {}", config.socket_addr());
    run_listener(socket, config, shutdown).await
}

/// Receive loop over an already bound socket.
///
/// Undecodable payloads are logged and skipped. Shape errors are skipped too,
/// unless `config.strict` is set, in which case they end the loop with an error.
/// The socket is dropped on every return path.
pub async fn run_listener<F>(
    socket: UdpSocket,
    config: &ListenerConfig,
    shutdown: F,
) -> Result<ListenerStats, ListenerError>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let mut stats = ListenerStats::default();
    let mut buf = vec![0u8; config.buffer_size];
    let mut receive_errors: u32 = 0;

    loop {
        let received = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, closing socket");
                return Ok(stats);
            }
            received = socket.recv_from(&mut buf) => received,
        };

        let (len, src) = match received {
            Ok(received) => {
                receive_errors = 0;
                received
            }
            Err(e) => {
                receive_errors = receive_errors.saturating_add(1);
                if receive_errors == 1 {
                    error!("Socket error: {}", e);
                } else {
                    debug!("Socket error ({} in a row): {}", receive_errors, e);
                }
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("Shutdown requested, closing socket");
                        return Ok(stats);
                    }
                    _ = tokio::time::sleep(receive_retry_delay(receive_errors)) => {}
                }
                continue;
            }
        };

        stats.received += 1;
        debug!("Received {} bytes from {}", len, src);

        match handle_datagram(&buf[..len]) {
            Ok(dispatch) => {
                match &dispatch {
                    Dispatch::Station(obs) => log_observation(obs),
                    Dispatch::Ignored(kind) => debug!("Ignoring packet type '{}'", kind),
                    Dispatch::Air | Dispatch::Sky => {}
                }
                stats.record(&dispatch);
            }
            Err(e) if e.is_syntax() => {
                stats.invalid_json += 1;
                warn!("JSON processing of data failed");
                debug!("{}", e);
            }
            Err(e) if config.strict => {
                error!("Malformed packet from {}: {}", src, e);
                return Err(ListenerError::Shape(e));
            }
            Err(e) => {
                stats.malformed += 1;
                error!("Dropping malformed packet from {}: {}", src, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;
    use tokio::time::{sleep, timeout, Duration};

    const STATION: &str = r#"{"serial_number":"ST-00000512","type":"obs_st","hub_sn":"HB-00013030","obs":[[1582149600,0,1.1,1.6,180,0,1013.2,22.1,54,0,0,0.0,0,0,0,0,2.41,3]],"firmware_revision":129}"#;
    const SHORT_STATION: &str = r#"{"type":"obs_st","obs":[[1582149600,0,1.1]]}"#;

    fn loopback_config(strict: bool) -> ListenerConfig {
        ListenerConfig {
            bind_addr: "127.0.0.1".parse().unwrap(),
            port: 0,
            strict,
            ..ListenerConfig::default()
        }
    }

    async fn send_all(target: std::net::SocketAddr, payloads: &[&[u8]]) {
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for payload in payloads {
            sender.send_to(payload, target).await.unwrap();
            sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn station_packet_is_extracted() {
        match handle_datagram(STATION.as_bytes()).unwrap() {
            Dispatch::Station(obs) => {
                assert_eq!(obs.timestamp, 1582149600);
                assert_eq!(obs.reporting_interval, Some(3));
                assert_eq!(obs.battery_level(), Some(61));
            }
            other => panic!("expected station dispatch, got {:?}", other),
        }
    }

    #[test]
    fn air_and_sky_are_not_extracted() {
        // Rows far too short for obs_st still pass because they are never read.
        let air = br#"{"type":"obs_air","obs":[[1493164835,835.0,10.0,45]]}"#;
        let sky = br#"{"type":"obs_sky","obs":[[1493321340,9000,10,0.0]]}"#;
        assert_eq!(handle_datagram(air).unwrap(), Dispatch::Air);
        assert_eq!(handle_datagram(sky).unwrap(), Dispatch::Sky);
    }

    #[test]
    fn unknown_types_are_ignored() {
        let payload = br#"{"type":"rapid_wind","ob":[1493322445,2.3,128]}"#;
        assert_eq!(
            handle_datagram(payload).unwrap(),
            Dispatch::Ignored("rapid_wind".to_string())
        );
    }

    #[test]
    fn non_string_type_is_ignored() {
        assert_eq!(
            handle_datagram(br#"{"type":7}"#).unwrap(),
            Dispatch::Ignored("7".to_string())
        );
        assert_eq!(
            handle_datagram(br#"{"type":null,"obs":[[1]]}"#).unwrap(),
            Dispatch::Ignored("null".to_string())
        );
    }

    #[test]
    fn station_with_junk_trailing_rows() {
        let payload = br#"{"type":"obs_st","obs":[[1582149600,0,1.1,1.6,180,0,1013.2,22.1,54,0,0,0.0,0,0,0,0,0,3],"x"]}"#;
        assert!(matches!(
            handle_datagram(payload).unwrap(),
            Dispatch::Station(_)
        ));
    }

    #[test]
    fn receive_retry_backs_off() {
        assert_eq!(receive_retry_delay(1), Duration::from_millis(50));
        assert_eq!(receive_retry_delay(2), Duration::from_millis(100));
        assert_eq!(receive_retry_delay(4), Duration::from_millis(400));
        assert_eq!(receive_retry_delay(7), Duration::from_secs(2));
        assert_eq!(receive_retry_delay(u32::MAX), Duration::from_secs(2));
        assert!(receive_retry_delay(0) > Duration::ZERO);
    }

    #[test]
    fn short_station_row_is_an_error() {
        let err = handle_datagram(SHORT_STATION.as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::RowTooShort { len: 3 }));
    }

    #[tokio::test]
    async fn keeps_running_after_bad_payloads() {
        let config = loopback_config(false);
        let socket = bind_reusable(config.socket_addr()).unwrap();
        let target = socket.local_addr().unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            run_listener(socket, &config, async {
                let _ = stop_rx.await;
            })
            .await
        });

        send_all(
            target,
            &[
                b"not json",
                &[0xc3, 0x28],
                SHORT_STATION.as_bytes(),
                br#"{"obs":[]}"#,
                STATION.as_bytes(),
                br#"{"type":"obs_air","obs":[[1]]}"#,
                br#"{"type":"obs_sky","obs":[[1]]}"#,
                br#"{"type":"hub_status"}"#,
                br#"{"type":7}"#,
            ],
        )
        .await;
        sleep(Duration::from_millis(200)).await;
        stop_tx.send(()).unwrap();

        let stats = timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(
            stats,
            ListenerStats {
                received: 9,
                invalid_json: 2,
                malformed: 2,
                station: 1,
                air: 1,
                sky: 1,
                ignored: 2,
            }
        );
    }

    #[tokio::test]
    async fn strict_mode_stops_on_shape_error() {
        let config = loopback_config(true);
        let socket = bind_reusable(config.socket_addr()).unwrap();
        let target = socket.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            run_listener(socket, &config, std::future::pending()).await
        });

        send_all(
            target,
            &[
                b"{broken",
                br#"{"type":null}"#,
                STATION.as_bytes(),
                SHORT_STATION.as_bytes(),
            ],
        )
        .await;

        let result = timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        match result {
            Err(ListenerError::Shape(DecodeError::RowTooShort { len: 3 })) => {}
            other => panic!("expected shape error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn shutdown_before_any_packet() {
        let config = loopback_config(false);
        let stats = timeout(Duration::from_secs(5), open_listener(&config, async {}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats, ListenerStats::default());
    }
}
