//! Well-known metric keys written by the topology builder.
//!
//! Measurand keys reported by the station (e.g.
//! `energy.active_import.register`) live alongside these and are not
//! enumerated here.

// ── Central system ─────────────────────────────────────────────────

pub const EMS_COMMUNICATION: &str = "ems.communication";

// ── Shared by every station-side node ──────────────────────────────

pub const AVAILABILITY: &str = "availability";
pub const STATUS: &str = "status";
pub const ERROR_CODE: &str = "error.code";
pub const IDENTIFIER: &str = "identifier";
pub const CONNECTORS: &str = "connectors";

// ── Charging station ───────────────────────────────────────────────

pub const HEARTBEAT: &str = "heartbeat";
pub const LATENCY_PING: &str = "latency.ping";
pub const LATENCY_PONG: &str = "latency.pong";
pub const FIRMWARE_STATUS: &str = "status.firmware";
pub const RECONNECTS: &str = "reconnects";
pub const MODEL: &str = "model";
pub const VENDOR: &str = "vendor";
pub const SERIAL: &str = "serial";
pub const FIRMWARE_VERSION: &str = "version.firmware";
pub const FEATURES: &str = "features";
pub const DATA_RESPONSE: &str = "data.response";
pub const DATA_TRANSFER: &str = "data.transfer";
pub const CONFIG_RESPONSE: &str = "config.response";

// ── Connector / EVSE ───────────────────────────────────────────────

pub const ID_TAG: &str = "id.tag";

// ── Charging session ───────────────────────────────────────────────

pub const STOP_REASON: &str = "stop.reason";
pub const TRANSACTION_ID: &str = "transaction.id";
pub const SESSION_START: &str = "timestamp.session_start";
pub const SESSION_TIME: &str = "session.time";
pub const SESSION_ENERGY: &str = "session.energy";
pub const SESSION_ENERGY_PAST: &str = "session.energy.past";
pub const CURRENT_SETPOINT: &str = "current.setpoint";
pub const ENERGY_METER_START: &str = "energy.meter.start";
pub const CHARGING_CONNECTOR: &str = "charging.connector";
pub const CHARGING_STATE: &str = "charging.state";

// ── Values ─────────────────────────────────────────────────────────

pub const OPERATIVE: &str = "Operative";
pub const INOPERATIVE: &str = "Inoperative";
pub const UNAVAILABLE: &str = "Unavailable";
pub const CONNECTED: &str = "Connected";
