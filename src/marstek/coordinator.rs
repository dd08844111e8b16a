//! Polling coordinator
//!
//! Holds the latest snapshot and decides when a cycle counts as failed.

use tracing::{error, info, warn};

use super::client::MarstekClient;
use super::command::EsMode;
use super::types::Snapshot;
use crate::errors::MarstekError;

pub struct Coordinator {
    client: MarstekClient,
    data: Option<Snapshot>,
    last_update_success: bool,
}

impl Coordinator {
    pub fn new(client: MarstekClient) -> Self {
        Self {
            client,
            data: None,
            last_update_success: false,
        }
    }

    pub fn data(&self) -> Option<&Snapshot> {
        self.data.as_ref()
    }

    /// Whether the most recent refresh produced any data
    pub fn last_update_success(&self) -> bool {
        self.last_update_success
    }

    /// Run one polling cycle.
    ///
    /// A snapshot where every command failed is `UpdateFailed`; the previous
    /// snapshot is kept but the source is marked unavailable.
    pub fn refresh(&mut self) -> Result<&Snapshot, MarstekError> {
        let snapshot = self.client.get_all_data();

        if snapshot.is_empty() {
            self.last_update_success = false;
            return Err(MarstekError::UpdateFailed);
        }

        self.last_update_success = true;
        Ok(&*self.data.insert(snapshot))
    }

    /// Current ES mode from the last snapshot, if it is a known one
    pub fn current_mode(&self) -> Option<EsMode> {
        self.data
            .as_ref()?
            .es_mode_field("mode")?
            .as_str()?
            .parse()
            .ok()
    }

    /// Apply a mode chosen by the user and refresh immediately on success.
    pub fn select_mode(&mut self, option: &str) -> bool {
        if option.parse::<EsMode>().is_err() {
            error!("Invalid ES mode: {}", option);
            return false;
        }

        info!("Attempting to set ES mode to: {}", option);
        if !self.client.set_es_mode(option, None) {
            error!("Failed to set ES mode to {}", option);
            return false;
        }

        info!("Successfully set ES mode to: {}", option);
        if let Err(e) = self.refresh() {
            warn!("Refresh after mode change failed: {}", e);
        }
        true
    }

    pub fn shutdown(&mut self) {
        self.client.disconnect();
    }
}
