//! Modem mode table — §4.2.
//!
//! Four fixed FreeDV-style modes: one control mode (DATAC13) and three
//! payload modes ordered by robustness/throughput (DATAC4, DATAC3, DATAC1).
//! Values are taken verbatim from `original_source/datalink_arq/arq_protocol.c`.

use crate::time::Duration;

/// A modem mode. `Control` is always DATAC13; the three payload modes form
/// the speed ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeId {
    Datac13,
    Datac4,
    Datac3,
    Datac1,
}

impl ModeId {
    pub const PAYLOAD_LADDER: [ModeId; 3] = [ModeId::Datac4, ModeId::Datac3, ModeId::Datac1];

    pub fn name(&self) -> &'static str {
        match self {
            ModeId::Datac13 => "DATAC13",
            ModeId::Datac4 => "DATAC4",
            ModeId::Datac3 => "DATAC3",
            ModeId::Datac1 => "DATAC1",
        }
    }

    /// Index of this mode within `PAYLOAD_LADDER`, or `None` for `Datac13`.
    pub fn ladder_index(&self) -> Option<usize> {
        ModeId::PAYLOAD_LADDER.iter().position(|m| m == self)
    }

    pub fn timing(&self) -> &'static ModeTiming {
        mode_timing(*self)
    }
}

/// Per-mode timing parameters. All durations are derived from on-air
/// measurements; see `original_source/datalink_arq/arq_protocol.c` for the
/// empirical derivation notes.
#[derive(Debug, Clone, Copy)]
pub struct ModeTiming {
    pub mode: ModeId,
    pub frame_duration: Duration,
    pub tx_period: Duration,
    pub ack_timeout: Duration,
    pub retry_interval: Duration,
    pub payload_bytes: usize,
}

const MODE_TABLE: [ModeTiming; 4] = [
    ModeTiming {
        mode: ModeId::Datac13,
        frame_duration: Duration::from_millis(2500),
        tx_period: Duration::from_millis(1000),
        ack_timeout: Duration::from_millis(6000),
        retry_interval: Duration::from_millis(7000),
        payload_bytes: 14,
    },
    ModeTiming {
        mode: ModeId::Datac4,
        frame_duration: Duration::from_millis(5700),
        tx_period: Duration::from_millis(1000),
        ack_timeout: Duration::from_millis(9000),
        retry_interval: Duration::from_millis(10000),
        payload_bytes: 54,
    },
    ModeTiming {
        mode: ModeId::Datac3,
        frame_duration: Duration::from_millis(4000),
        tx_period: Duration::from_millis(1000),
        ack_timeout: Duration::from_millis(8000),
        retry_interval: Duration::from_millis(9000),
        payload_bytes: 126,
    },
    ModeTiming {
        mode: ModeId::Datac1,
        frame_duration: Duration::from_millis(6500),
        tx_period: Duration::from_millis(1000),
        ack_timeout: Duration::from_millis(11000),
        retry_interval: Duration::from_millis(12000),
        payload_bytes: 510,
    },
];

pub fn mode_timing(mode: ModeId) -> &'static ModeTiming {
    MODE_TABLE
        .iter()
        .find(|t| t.mode == mode)
        .expect("mode table covers all ModeId variants")
}

/// Auxiliary timing/threshold constants — §4.2.
pub mod consts {
    use crate::time::Duration;

    pub const CHANNEL_GUARD: Duration = Duration::from_millis(400);
    pub const ACK_GUARD: Duration = Duration::from_millis(1000);

    pub const CALL_RETRIES: u32 = 4;
    pub const ACCEPT_RETRIES: u32 = 3;
    pub const DATA_RETRIES: u32 = 10;
    pub const DISCONNECT_RETRIES: u32 = 2;
    pub const CONNECT_GRACE_SLOTS: u32 = 2;

    pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(20_000);
    pub const KEEPALIVE_MISS_LIMIT: u32 = 5;

    pub const TURN_REQ_RETRIES: u32 = 2;
    pub const MODE_REQ_RETRIES: u32 = 2;
    pub const MODE_SWITCH_HYST_COUNT: u32 = 1;

    pub const STARTUP_WINDOW: Duration = Duration::from_millis(8_000);
    pub const STARTUP_ACKS_REQUIRED: u32 = 1;

    pub const PEER_PAYLOAD_HOLD: Duration = Duration::from_millis(15_000);

    pub const SNR_HYST_DB: f32 = 1.0;
    pub const SNR_UPGRADE_DATAC3_DB: f32 = 0.0;
    pub const SNR_UPGRADE_DATAC1_DB: f32 = 5.0;

    pub const BACKLOG_MIN_DATAC3: usize = 56;
    pub const BACKLOG_MIN_DATAC1: usize = 126;
    pub const BACKLOG_MIN_BIDIR_UPGRADE: usize = 48;

    /// Consecutive WAIT_ACK timeouts that force a downgrade.
    pub const DOWNGRADE_TIMEOUT_STREAK: u32 = 3;

    pub const DOWNGRADE_HYST_DB: f32 = 1.0;

    /// Mode switch cooldown honored by the RX dual-decoder — §4.7.
    pub const DECODER_MODE_COOLDOWN: Duration = Duration::from_millis(250);

    /// Interval at which `IAMALIVE` is pushed to the control TCP client — §4.8.
    pub const IAMALIVE_INTERVAL: Duration = Duration::from_millis(60_000);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_order_matches_speed_ladder() {
        assert_eq!(
            ModeId::PAYLOAD_LADDER,
            [ModeId::Datac4, ModeId::Datac3, ModeId::Datac1]
        );
    }

    #[test]
    fn every_mode_has_a_table_entry() {
        for m in [ModeId::Datac13, ModeId::Datac4, ModeId::Datac3, ModeId::Datac1] {
            let t = mode_timing(m);
            assert_eq!(t.mode, m);
        }
    }

    #[test]
    fn datac4_payload_capacity_is_54() {
        assert_eq!(mode_timing(ModeId::Datac4).payload_bytes, 54);
    }

    #[test]
    fn datac13_is_the_smallest_and_fastest_retry() {
        let c13 = mode_timing(ModeId::Datac13);
        assert_eq!(c13.payload_bytes, 14);
        assert_eq!(c13.retry_interval, Duration::from_millis(7000));
    }
}
