//! One-shot modem bring-up
//!
//! Forces the modem from an unknown state (command mode, data mode or
//! mid-transaction) into command mode, checks the carrier profile and
//! parks the radio in low-power mode. Best effort: nothing here fails hard.

use super::at::{AtEngine, ESCAPE_SEQUENCE};
use super::transport::{ModemTransport, SerialFlowControl};
use crate::config::ModemConfig;
use std::thread;
use std::time::Duration;

/// Liveness probe
pub const PROBE: &str = "AT";

/// Hang up an active call
pub const HANG_UP: &str = "ATH";

/// Carrier profile query
pub const PROFILE_QUERY: &str = "AT+SQNCTM?";

/// Radio off, low-power mode on
pub const LOW_POWER: &str = "AT!=\"setlpm airplane=1 enable=1\"";

/// Carrier profile set command
pub fn profile_set_command(profile: &str) -> String {
    format!("AT+SQNCTM=\"{profile}\"")
}

/// How bring-up ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUpOutcome {
    /// The modem acknowledged command mode
    Converged,
    /// Probes and escape retries all went unanswered; carried on anyway
    Unconfirmed,
}

/// Run the bring-up sequence
pub fn run<T>(engine: &mut AtEngine, transport: &mut T, config: &ModemConfig) -> BringUpOutcome
where
    T: ModemTransport + ?Sized,
{
    let timings = &config.timings;
    let min = config.rx_timeout_min;
    let def = config.rx_timeout_default;

    tracing::info!("modem bring-up started");
    thread::sleep(Duration::from_millis(timings.settle_delay_ms));

    let outcome = if engine.send_and_wait(transport, ESCAPE_SEQUENCE, timings.escape_timeout) {
        tracing::debug!("modem was in data mode, hanging up");
        engine.send_and_wait(transport, HANG_UP, min);
        let mut attempts: u64 = 0;
        while !engine.send_and_wait(transport, PROBE, min) {
            attempts += 1;
            if attempts % 100 == 0 {
                tracing::warn!(attempts, "modem still not answering after escape");
            }
        }
        BringUpOutcome::Converged
    } else {
        engine.send_and_wait(transport, PROBE, min);
        if engine.send_and_wait(transport, PROBE, min) {
            BringUpOutcome::Converged
        } else {
            thread::sleep(Duration::from_millis(timings.recovery_delay_ms));
            let escaped = engine.send_and_wait(transport, ESCAPE_SEQUENCE, timings.escape_timeout)
                || engine.send_and_wait(transport, ESCAPE_SEQUENCE, timings.escape_timeout);
            thread::sleep(Duration::from_millis(timings.post_recovery_delay_ms));
            if escaped {
                BringUpOutcome::Converged
            } else {
                tracing::warn!("modem did not answer probes or escape, continuing");
                BringUpOutcome::Unconfirmed
            }
        }
    };

    engine.send_and_wait(transport, PROFILE_QUERY, def);
    if !engine.response_contains(&config.carrier_profile) {
        tracing::info!(profile = %config.carrier_profile, "setting carrier profile");
        engine.send_and_wait(transport, &profile_set_command(&config.carrier_profile), def);
        engine.send_and_wait(transport, PROBE, def);
        engine.send_and_wait(transport, PROBE, def);
    }

    engine.send_and_wait(transport, LOW_POWER, min);
    if let Err(e) = transport.set_flow_control(SerialFlowControl::None) {
        tracing::warn!(error = %e, "could not disable flow control");
    }

    tracing::info!(?outcome, "modem bring-up finished");
    outcome
}
