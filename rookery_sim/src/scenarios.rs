//! Chaos scenarios for the contest orchestrator.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SIM-001: more offers than slots, every one played, never over capacity
    CapacityOverflow,

    /// SIM-002: bursts of offers accepted in strict arrival order
    FifoOrder,

    /// SIM-003: mixed variants and self-challenges filtered by policy
    PolicyFilter,

    /// SIM-004: engine crashes mid-game
    EngineFailure,

    /// SIM-005: engine stops answering
    EngineHang,

    /// SIM-006: opponent toggles progress reports over chat
    MuteToggle,

    /// SIM-007: error marker on a game stream
    ErrorMarker,

    /// SIM-008: accept requests rejected by the service
    AcceptFailure,

    /// SIM-009: account stream drops and reconnects with games in flight
    Reconnect,

    /// SIM-010: accepts spaced by the settle interval
    SettleThrottle,

    /// SIM-011: move submissions rejected by the service
    RejectedMoves,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::CapacityOverflow,
            ScenarioId::FifoOrder,
            ScenarioId::PolicyFilter,
            ScenarioId::EngineFailure,
            ScenarioId::EngineHang,
            ScenarioId::MuteToggle,
            ScenarioId::ErrorMarker,
            ScenarioId::AcceptFailure,
            ScenarioId::Reconnect,
            ScenarioId::SettleThrottle,
            ScenarioId::RejectedMoves,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::CapacityOverflow => "capacity_overflow",
            ScenarioId::FifoOrder => "fifo_order",
            ScenarioId::PolicyFilter => "policy_filter",
            ScenarioId::EngineFailure => "engine_failure",
            ScenarioId::EngineHang => "engine_hang",
            ScenarioId::MuteToggle => "mute_toggle",
            ScenarioId::ErrorMarker => "error_marker",
            ScenarioId::AcceptFailure => "accept_failure",
            ScenarioId::Reconnect => "reconnect",
            ScenarioId::SettleThrottle => "settle_throttle",
            ScenarioId::RejectedMoves => "rejected_moves",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::CapacityOverflow => "Offers exceed pool capacity; all are played, at most N at once",
            ScenarioId::FifoOrder => "Bursts of offers; accepts follow arrival order exactly",
            ScenarioId::PolicyFilter => "Unsupported variants and self-challenges are declined, never queued",
            ScenarioId::EngineFailure => "Engine errors mid-game; one resign per game, no further moves",
            ScenarioId::EngineHang => "Engine stops answering; the hard deadline resigns the game",
            ScenarioId::MuteToggle => "Opponent mutes and unmutes; only unmuted moves get progress lines",
            ScenarioId::ErrorMarker => "Error marker on the game stream resigns the active game",
            ScenarioId::AcceptFailure => "Rejected accepts drop the offer; the rest are played",
            ScenarioId::Reconnect => "Account stream breaks; running games survive the reconnect",
            ScenarioId::SettleThrottle => "Consecutive accepts are at least the settle interval apart",
            ScenarioId::RejectedMoves => "Move submissions fail; every game resigns after its first move",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "capacity_overflow" | "capacityoverflow" | "sim-001" => Ok(ScenarioId::CapacityOverflow),
            "fifo_order" | "fifoorder" | "sim-002" => Ok(ScenarioId::FifoOrder),
            "policy_filter" | "policyfilter" | "sim-003" => Ok(ScenarioId::PolicyFilter),
            "engine_failure" | "enginefailure" | "sim-004" => Ok(ScenarioId::EngineFailure),
            "engine_hang" | "enginehang" | "sim-005" => Ok(ScenarioId::EngineHang),
            "mute_toggle" | "mutetoggle" | "sim-006" => Ok(ScenarioId::MuteToggle),
            "error_marker" | "errormarker" | "sim-007" => Ok(ScenarioId::ErrorMarker),
            "accept_failure" | "acceptfailure" | "sim-008" => Ok(ScenarioId::AcceptFailure),
            "reconnect" | "sim-009" => Ok(ScenarioId::Reconnect),
            "settle_throttle" | "settlethrottle" | "sim-010" => Ok(ScenarioId::SettleThrottle),
            "rejected_moves" | "rejectedmoves" | "sim-011" => Ok(ScenarioId::RejectedMoves),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
