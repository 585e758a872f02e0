// src/kms/discover.rs

//! Selection of the connector, mode, encoder and CRTC to drive.

use super::{CardResources, ConnectionState, ConnectorInfo, CrtcInfo, EncoderInfo, KmsDevice, ModeInfo};
use crate::error::DrmError;
use log::{debug, info, warn};

/// The display path chosen at init. Immutable for the session.
///
/// Ids refer to kernel-owned objects and are never destroyed by this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayTarget {
    pub connector_id: u32,
    pub encoder_id: u32,
    pub crtc_id: u32,
    pub mode: ModeInfo,
    /// CRTC configuration before the first mode-set; `None` if it could not be read.
    pub saved_crtc: Option<CrtcInfo>,
}

/// The preferred mode if the connector flags one, otherwise the first listed.
pub fn pick_mode(modes: &[ModeInfo]) -> Option<&ModeInfo> {
    modes.iter().find(|m| m.is_preferred()).or_else(|| modes.first())
}

fn pick_encoder(device: &dyn KmsDevice, connector: &ConnectorInfo) -> Option<EncoderInfo> {
    if connector.encoder_id != 0 {
        match device.encoder(connector.encoder_id) {
            Ok(encoder) => return Some(encoder),
            Err(e) => warn!(
                "Connector {}: current encoder {} unavailable: {}",
                connector.id, connector.encoder_id, e
            ),
        }
    }
    connector
        .encoders
        .iter()
        .find_map(|&id| device.encoder(id).ok())
}

fn pick_crtc(resources: &CardResources, encoder: &EncoderInfo) -> Option<u32> {
    if encoder.crtc_id != 0 {
        return Some(encoder.crtc_id);
    }
    resources
        .crtcs
        .iter()
        .enumerate()
        .find(|(index, _)| *index < 32 && encoder.possible_crtcs & (1 << index) != 0)
        .map(|(_, &id)| id)
}

/// Picks the first connected connector that has a mode and a drivable CRTC.
pub fn select_target(device: &dyn KmsDevice) -> Result<DisplayTarget, DrmError> {
    let resources = device.resources()?;
    debug!(
        "Card exposes {} connectors, {} encoders, {} CRTCs",
        resources.connectors.len(),
        resources.encoders.len(),
        resources.crtcs.len()
    );

    for &connector_id in &resources.connectors {
        let connector = match device.connector(connector_id) {
            Ok(c) => c,
            Err(e) => {
                warn!("Skipping connector {}: {}", connector_id, e);
                continue;
            }
        };
        if connector.state != ConnectionState::Connected {
            debug!("Connector {} is {:?}", connector.id, connector.state);
            continue;
        }
        let Some(mode) = pick_mode(&connector.modes) else {
            debug!("Connector {} is connected but reports no modes", connector.id);
            continue;
        };
        let Some(encoder) = pick_encoder(device, &connector) else {
            warn!("Connector {} has no usable encoder", connector.id);
            continue;
        };
        let Some(crtc_id) = pick_crtc(&resources, &encoder) else {
            warn!("Encoder {} cannot drive any CRTC", encoder.id);
            continue;
        };

        let saved_crtc = match device.crtc(crtc_id) {
            Ok(crtc) => Some(crtc),
            Err(e) => {
                warn!("Cannot read CRTC {} state, it will not be restored: {}", crtc_id, e);
                None
            }
        };

        info!(
            "Selected connector {} / encoder {} / CRTC {} with mode {} ({}x{}@{})",
            connector.id,
            encoder.id,
            crtc_id,
            mode.name,
            mode.width(),
            mode.height(),
            mode.vrefresh
        );
        return Ok(DisplayTarget {
            connector_id: connector.id,
            encoder_id: encoder.id,
            crtc_id,
            mode: mode.clone(),
            saved_crtc,
        });
    }

    Err(DrmError::NoConnectorFound)
}
