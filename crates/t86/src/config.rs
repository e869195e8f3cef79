//! Configuration for the T86 simulator.
//!
//! Mirrors the original C++ `Config` singleton (`t86/t86/config.cpp`) as an
//! explicit value threaded through the CPU at construction time instead of a
//! process-wide singleton (see spec §9, "Singletons"). `Config::default()`
//! gives the values the CLI uses when no flags override them; JSON
//! deserialization is available for embedding the simulator in a future host.

use serde::Deserialize;

/// Default configuration constants.
mod defaults {
    /// Default number of general-purpose logical registers.
    pub const REGISTER_COUNT: usize = 8;
    /// Default number of floating-point logical registers.
    pub const FLOAT_REGISTER_COUNT: usize = 4;
    /// Default number of ALUs available to the reservation station.
    pub const ALU_COUNT: usize = 2;
    /// Default reservation-station capacity (the original uses `aluCnt * 2`).
    pub const RESERVATION_STATION_ENTRIES: usize = ALU_COUNT * 2;
    /// Default RAM size in 64-bit words.
    pub const RAM_SIZE: usize = 1024;
    /// Default number of concurrent RAM read/write gates.
    pub const RAM_GATES_COUNT: usize = 2;
    /// Default fixed RAM access latency, in ticks.
    pub const RAM_GATE_LATENCY: u64 = 2;
    /// Default TCP debug port (spec §6, "Environment").
    pub const DEBUG_PORT: u16 = 9110;
}

/// Root configuration structure for a simulation run.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Number of logical general-purpose registers.
    #[serde(default = "Config::default_register_count")]
    pub register_count: usize,
    /// Number of logical floating-point registers.
    #[serde(default = "Config::default_float_register_count")]
    pub float_register_count: usize,
    /// Number of ALUs the reservation station may allocate concurrently.
    #[serde(default = "Config::default_alu_count")]
    pub alu_count: usize,
    /// Reservation-station capacity.
    #[serde(default = "Config::default_reservation_station_entries")]
    pub reservation_station_entries: usize,
    /// RAM size, in 64-bit words.
    #[serde(default = "Config::default_ram_size")]
    pub ram_size: usize,
    /// Number of concurrent RAM gates.
    #[serde(default = "Config::default_ram_gates_count")]
    pub ram_gates_count: usize,
    /// Fixed per-access RAM latency, in ticks.
    #[serde(default = "Config::default_ram_gate_latency")]
    pub ram_gate_latency: u64,
    /// TCP port the debug server listens on when `--debug` is passed.
    #[serde(default = "Config::default_debug_port")]
    pub debug_port: u16,
}

impl Config {
    fn default_register_count() -> usize {
        defaults::REGISTER_COUNT
    }
    fn default_float_register_count() -> usize {
        defaults::FLOAT_REGISTER_COUNT
    }
    fn default_alu_count() -> usize {
        defaults::ALU_COUNT
    }
    fn default_reservation_station_entries() -> usize {
        defaults::RESERVATION_STATION_ENTRIES
    }
    fn default_ram_size() -> usize {
        defaults::RAM_SIZE
    }
    fn default_ram_gates_count() -> usize {
        defaults::RAM_GATES_COUNT
    }
    fn default_ram_gate_latency() -> u64 {
        defaults::RAM_GATE_LATENCY
    }
    fn default_debug_port() -> u16 {
        defaults::DEBUG_PORT
    }

    /// Number of physical registers needed to make the anti-reuse invariant
    /// (§4.5) always satisfiable: the architectural registers plus enough
    /// renaming slack for every reservation-station entry to hold its own
    /// destination register.
    #[must_use]
    pub const fn physical_register_count(&self) -> usize {
        // 4 specials + general + float + two rename slots per in-flight entry
        // (one general, one float) mirrors the original's
        // `specialRegistersCnt + registerCnt + floatRegisterCnt +
        //  reservationStationEntriesCnt * possibleRenamedRegisterCnt`.
        4 + self.register_count
            + self.float_register_count
            + self.reservation_station_entries * 2
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            register_count: defaults::REGISTER_COUNT,
            float_register_count: defaults::FLOAT_REGISTER_COUNT,
            alu_count: defaults::ALU_COUNT,
            reservation_station_entries: defaults::RESERVATION_STATION_ENTRIES,
            ram_size: defaults::RAM_SIZE,
            ram_gates_count: defaults::RAM_GATES_COUNT,
            ram_gate_latency: defaults::RAM_GATE_LATENCY,
            debug_port: defaults::DEBUG_PORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_internally_consistent() {
        let config = Config::default();
        assert!(config.physical_register_count() > config.register_count);
        assert!(config.physical_register_count() > config.float_register_count);
    }

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let json = r#"{ "register_count": 16, "ram_size": 4096 }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.register_count, 16);
        assert_eq!(config.ram_size, 4096);
        assert_eq!(config.alu_count, defaults::ALU_COUNT);
    }
}
