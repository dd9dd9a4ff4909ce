//! Test doubles shared by the application tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{
    ChargeRateLimit, CommandStatus, ResetKind, SharedProtocol, StationProtocol,
};
use crate::domain::{OcppVersion, OperationTarget};
use crate::support::ProtocolError;

/// A call received by [`RecordingProtocol`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ProtocolCall {
    Reset(ResetKind),
    Unlock(OperationTarget),
    SetChargeRate(OperationTarget, ChargeRateLimit),
    RemoteStart(OperationTarget, String),
    RemoteStop(String),
    ChangeAvailability(OperationTarget, bool),
    Configure(String, String),
    GetConfiguration(String),
    UpdateFirmware(String, u32),
    ClearProfile(OperationTarget),
    DataTransfer(String),
}

/// Station engine that records every operation and answers with a fixed
/// status.
pub(crate) struct RecordingProtocol {
    station_id: String,
    version: OcppVersion,
    connected: AtomicBool,
    status: Mutex<CommandStatus>,
    calls: Mutex<Vec<ProtocolCall>>,
    notifications: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingProtocol {
    pub(crate) fn new(station_id: &str, version: OcppVersion) -> Arc<Self> {
        Arc::new(Self {
            station_id: station_id.to_string(),
            version,
            connected: AtomicBool::new(true),
            status: Mutex::new(CommandStatus::Accepted),
            calls: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        })
    }

    pub(crate) fn shared(station_id: &str, version: OcppVersion) -> SharedProtocol {
        Self::new(station_id, version)
    }

    pub(crate) fn respond_with(&self, status: CommandStatus) {
        *self.status.lock() = status;
    }

    /// Hold every operation this long before answering.
    pub(crate) fn delay_answers(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<ProtocolCall> {
        self.calls.lock().clone()
    }

    pub(crate) fn notifications(&self) -> Vec<String> {
        self.notifications.lock().clone()
    }

    async fn answer(&self, call: ProtocolCall) -> Result<CommandStatus, ProtocolError> {
        self.calls.lock().push(call);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.status.lock().clone())
    }
}

#[async_trait]
impl StationProtocol for RecordingProtocol {
    fn station_id(&self) -> &str {
        &self.station_id
    }

    fn version(&self) -> OcppVersion {
        self.version
    }

    fn is_available(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn notify(&self, message: &str, _params: serde_json::Value) -> bool {
        self.notifications.lock().push(message.to_string());
        true
    }

    async fn reset(&self, kind: ResetKind) -> Result<CommandStatus, ProtocolError> {
        self.answer(ProtocolCall::Reset(kind)).await
    }

    async fn unlock(&self, target: OperationTarget) -> Result<CommandStatus, ProtocolError> {
        self.answer(ProtocolCall::Unlock(target)).await
    }

    async fn set_charge_rate(
        &self,
        target: OperationTarget,
        limit: ChargeRateLimit,
    ) -> Result<CommandStatus, ProtocolError> {
        self.answer(ProtocolCall::SetChargeRate(target, limit)).await
    }

    async fn remote_start(
        &self,
        target: OperationTarget,
        id_tag: &str,
    ) -> Result<CommandStatus, ProtocolError> {
        self.answer(ProtocolCall::RemoteStart(target, id_tag.to_string())).await
    }

    async fn remote_stop(&self, transaction_id: &str) -> Result<CommandStatus, ProtocolError> {
        self.answer(ProtocolCall::RemoteStop(transaction_id.to_string())).await
    }

    async fn change_availability(
        &self,
        target: OperationTarget,
        operative: bool,
    ) -> Result<CommandStatus, ProtocolError> {
        self.answer(ProtocolCall::ChangeAvailability(target, operative)).await
    }

    async fn configure(&self, key: &str, value: &str) -> Result<CommandStatus, ProtocolError> {
        self.answer(ProtocolCall::Configure(key.to_string(), value.to_string())).await
    }

    async fn get_configuration(&self, key: &str) -> Result<CommandStatus, ProtocolError> {
        self.answer(ProtocolCall::GetConfiguration(key.to_string())).await
    }

    async fn update_firmware(
        &self,
        firmware_url: &str,
        delay_hours: u32,
    ) -> Result<CommandStatus, ProtocolError> {
        self.answer(ProtocolCall::UpdateFirmware(firmware_url.to_string(), delay_hours)).await
    }

    async fn clear_profile(&self, target: OperationTarget) -> Result<CommandStatus, ProtocolError> {
        self.answer(ProtocolCall::ClearProfile(target)).await
    }

    async fn data_transfer(
        &self,
        vendor_id: &str,
        _message_id: Option<&str>,
        _data: Option<&str>,
    ) -> Result<CommandStatus, ProtocolError> {
        self.answer(ProtocolCall::DataTransfer(vendor_id.to_string())).await
    }
}
