use time::OffsetDateTime;

use super::normalize_timestamp;

/// Wide record: last known state of every tracked subsystem.
///
/// Every field is nullable; a field stays `None` until its subsystem reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub timestamp: Option<OffsetDateTime>,
    pub battery12v_soc: Option<f64>,
    pub battery12v_volts: Option<f64>,
    pub battery12v_amps: Option<f64>,
    pub battery12v_temp_c: Option<f64>,
    pub battery12v_temps: Option<String>,
    pub battery12v_status: Option<String>,
    pub traction_soc: Option<f64>,
    pub traction_temp_c: Option<f64>,
    pub gps_lat: Option<f64>,
    pub gps_lon: Option<f64>,
    pub charger_state: Option<String>,
    pub charger_soc: Option<f64>,
    pub hydra_v1_volts: Option<f64>,
    pub hydra_v1_amps: Option<f64>,
    pub hydra_v2_volts: Option<f64>,
    pub hydra_v2_amps: Option<f64>,
    pub hydra_v3_volts: Option<f64>,
    pub hydra_v3_amps: Option<f64>,
    pub hydra_vin_volts: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydraChannel {
    V1,
    V2,
    V3,
    /// Input rail; reports volts only.
    Vin,
}

/// Partial update from one subsystem.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Battery12V {
        soc: f64,
        volts: f64,
        amps: f64,
        temps_c: Vec<f64>,
        status: String,
    },
    Traction {
        soc: f64,
        temp_c: Option<f64>,
    },
    Gps {
        lat: f64,
        lon: f64,
    },
    Charger {
        state: String,
        soc: Option<f64>,
    },
    Hydra {
        channel: HydraChannel,
        volts: f64,
        amps: Option<f64>,
    },
}

/// Owned "last known" snapshot. The only way to change it is [`SnapshotState::apply`].
#[derive(Debug, Default)]
pub struct SnapshotState {
    current: StatusSnapshot,
}

impl SnapshotState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &StatusSnapshot {
        &self.current
    }

    /// Merge `update` and return a copy of the result for enqueueing.
    ///
    /// The snapshot timestamp only moves forward: an update stamped earlier
    /// than the current snapshot keeps the current timestamp.
    pub fn apply(&mut self, timestamp: Option<OffsetDateTime>, update: StatusUpdate) -> StatusSnapshot {
        let ts = normalize_timestamp(timestamp);
        self.current.timestamp = Some(match self.current.timestamp {
            Some(prev) if prev > ts => prev,
            _ => ts,
        });

        let s = &mut self.current;
        match update {
            StatusUpdate::Battery12V {
                soc,
                volts,
                amps,
                temps_c,
                status,
            } => {
                s.battery12v_soc = Some(soc);
                s.battery12v_volts = Some(volts);
                s.battery12v_amps = Some(amps);
                s.battery12v_temp_c = temps_c.iter().copied().reduce(f64::min);
                s.battery12v_temps = if temps_c.is_empty() {
                    None
                } else {
                    Some(
                        temps_c
                            .iter()
                            .map(|t| format!("{t:.1}"))
                            .collect::<Vec<_>>()
                            .join(","),
                    )
                };
                s.battery12v_status = Some(status);
            }
            StatusUpdate::Traction { soc, temp_c } => {
                s.traction_soc = Some(soc);
                if temp_c.is_some() {
                    s.traction_temp_c = temp_c;
                }
            }
            StatusUpdate::Gps { lat, lon } => {
                s.gps_lat = Some(lat);
                s.gps_lon = Some(lon);
            }
            StatusUpdate::Charger { state, soc } => {
                s.charger_state = Some(state);
                if soc.is_some() {
                    s.charger_soc = soc;
                }
            }
            StatusUpdate::Hydra {
                channel,
                volts,
                amps,
            } => {
                let (v, a) = match channel {
                    HydraChannel::V1 => (&mut s.hydra_v1_volts, Some(&mut s.hydra_v1_amps)),
                    HydraChannel::V2 => (&mut s.hydra_v2_volts, Some(&mut s.hydra_v2_amps)),
                    HydraChannel::V3 => (&mut s.hydra_v3_volts, Some(&mut s.hydra_v3_amps)),
                    HydraChannel::Vin => (&mut s.hydra_vin_volts, None),
                };
                *v = Some(volts);
                if let (Some(slot), Some(amps)) = (a, amps) {
                    *slot = Some(amps);
                }
            }
        }
        self.current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn merges_fields_independently() {
        let mut state = SnapshotState::new();
        state.apply(
            Some(datetime!(2024-01-01 00:00 UTC)),
            StatusUpdate::Gps { lat: 42.1, lon: -71.2 },
        );
        let snap = state.apply(
            Some(datetime!(2024-01-01 00:00:01 UTC)),
            StatusUpdate::Traction { soc: 77.0, temp_c: None },
        );
        assert_eq!(snap.gps_lat, Some(42.1));
        assert_eq!(snap.traction_soc, Some(77.0));
        assert_eq!(snap.traction_temp_c, None);
        assert_eq!(snap.timestamp, Some(datetime!(2024-01-01 00:00:01 UTC)));
    }

    #[test]
    fn timestamp_never_regresses() {
        let mut state = SnapshotState::new();
        state.apply(
            Some(datetime!(2024-01-01 01:00 UTC)),
            StatusUpdate::Gps { lat: 1.0, lon: 2.0 },
        );
        let snap = state.apply(
            Some(datetime!(2024-01-01 00:30 UTC)),
            StatusUpdate::Gps { lat: 3.0, lon: 4.0 },
        );
        assert_eq!(snap.timestamp, Some(datetime!(2024-01-01 01:00 UTC)));
        assert_eq!(snap.gps_lat, Some(3.0));
    }

    #[test]
    fn returned_copy_is_detached() {
        let mut state = SnapshotState::new();
        let first = state.apply(None, StatusUpdate::Gps { lat: 1.0, lon: 1.0 });
        state.apply(None, StatusUpdate::Gps { lat: 2.0, lon: 2.0 });
        assert_eq!(first.gps_lat, Some(1.0));
        assert_eq!(state.current().gps_lat, Some(2.0));
    }

    #[test]
    fn battery_temps_and_hydra_channels() {
        let mut state = SnapshotState::new();
        state.apply(
            None,
            StatusUpdate::Battery12V {
                soc: 88.0,
                volts: 13.2,
                amps: -1.5,
                temps_c: vec![4.0, 2.5, 3.0],
                status: "discharging".into(),
            },
        );
        let snap = state.apply(
            None,
            StatusUpdate::Hydra {
                channel: HydraChannel::Vin,
                volts: 14.1,
                amps: Some(9.9),
            },
        );
        assert_eq!(snap.battery12v_temp_c, Some(2.5));
        assert_eq!(snap.battery12v_temps.as_deref(), Some("4.0,2.5,3.0"));
        assert_eq!(snap.hydra_vin_volts, Some(14.1));
        assert_eq!(snap.hydra_v1_amps, None);
    }
}
