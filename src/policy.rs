/// What to do with the antenna path and receiver relay for a presence value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchDecision {
    pub antenna: String,
    pub relay_on: bool,
    pub message: String,
}

pub const ANTENNA_RADIO: &str = "1a";
pub const ANTENNA_RECEIVER: &str = "1b";

/// Maps the current occupant of the shared radio to a switch decision.
///
/// Anything longer than one character counts as an occupant; the upstream
/// bridge reports an empty string (or a lone separator) when idle.
pub fn decide(occupant: &str) -> SwitchDecision {
    if occupant.chars().count() > 1 {
        SwitchDecision {
            antenna: ANTENNA_RADIO.to_string(),
            relay_on: true,
            message: format!(
                "FLEX ACTIVE (Kiwi disabled), current IP(s) connected: {}",
                occupant
            ),
        }
    } else {
        SwitchDecision {
            antenna: ANTENNA_RECEIVER.to_string(),
            relay_on: false,
            message: "PUBLIC KIWI IS ACTIVE, no user is connected to FLEX at this moment"
                .to_string(),
        }
    }
}
