use std::sync::Arc;

use crate::application::ports::SharedProtocol;
use crate::config::StationSettings;
use crate::domain::{OcppVersion, SharedNode, TopologyShape};

/// A connected charging station: its node, the protocol engine that
/// speaks to it and the settings resolved when the node was built.
pub struct Station {
    node: SharedNode,
    protocol: SharedProtocol,
    settings: Arc<StationSettings>,
}

impl Station {
    pub fn new(node: SharedNode, protocol: SharedProtocol, settings: Arc<StationSettings>) -> Self {
        Self {
            node,
            protocol,
            settings,
        }
    }

    pub fn id(&self) -> &str {
        self.node.id()
    }

    pub fn node(&self) -> &SharedNode {
        &self.node
    }

    pub fn protocol(&self) -> &SharedProtocol {
        &self.protocol
    }

    pub fn settings(&self) -> &StationSettings {
        &self.settings
    }

    pub fn version(&self) -> OcppVersion {
        self.protocol.version()
    }

    pub fn shape(&self) -> TopologyShape {
        self.node.shape().unwrap_or_else(|| self.version().shape())
    }

    /// A station accepts operations only while its node is available and
    /// the protocol engine reports a usable connection.
    pub fn is_available(&self) -> bool {
        self.node.is_available() && self.protocol.is_available()
    }

    /// Same node, new connection.
    pub(crate) fn with_protocol(&self, protocol: SharedProtocol) -> Self {
        Self {
            node: self.node.clone(),
            protocol,
            settings: self.settings.clone(),
        }
    }
}

impl std::fmt::Debug for Station {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Station")
            .field("id", &self.id())
            .field("version", &self.version())
            .field("available", &self.is_available())
            .finish()
    }
}

pub type SharedStation = Arc<Station>;
