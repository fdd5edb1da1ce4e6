//! Live packet capture
//!
//! pcap-backed capture with interface auto-selection. A non-virtual
//! Wi-Fi/Wireless adapter is preferred by description; otherwise the
//! platform default device is used. Steady-state read errors are
//! retried with backoff by the capture loop.

use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::config::CaptureSettings;

/// Select the capture device.
///
/// An explicit name wins. Otherwise prefer a real Wi-Fi adapter
/// (matching "Wi-Fi" or "Wireless" in the description, excluding
/// virtual adapters), then any Wi-Fi match, then the platform default.
pub fn select_device(preferred: Option<&str>) -> Result<pcap::Device> {
    let devices = pcap::Device::list().context("Failed to enumerate capture devices")?;

    if let Some(name) = preferred {
        return devices
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| anyhow!("Capture interface not found: {}", name));
    }

    let is_wifi = |device: &pcap::Device| {
        let desc = device.desc.as_deref().unwrap_or("");
        desc.contains("Wi-Fi") || desc.contains("Wireless") || device.name.starts_with("wl")
    };

    if let Some(device) = devices.iter().find(|d| {
        is_wifi(d) && !d.desc.as_deref().unwrap_or("").contains("Virtual")
    }) {
        info!(
            "Automatically selected interface: {} ({})",
            device.name,
            device.desc.as_deref().unwrap_or("no description")
        );
        return Ok(device.clone());
    }

    if let Some(device) = devices.iter().find(|d| is_wifi(d)) {
        info!("Automatically selected interface (fallback): {}", device.name);
        return Ok(device.clone());
    }

    let default = pcap::Device::lookup()
        .context("Failed to look up default capture device")?
        .ok_or_else(|| anyhow!("No capture device available"))?;
    info!("Using platform default interface: {}", default.name);
    Ok(default)
}

/// An open live capture handle.
pub struct LiveCapture {
    cap: pcap::Capture<pcap::Active>,
    device_name: String,
    settings: CaptureSettings,
}

impl LiveCapture {
    /// Open a live capture on the configured interface. Failure here
    /// is a startup error surfaced to the operator.
    pub fn open(settings: &CaptureSettings) -> Result<Self> {
        let device = select_device(settings.interface.as_deref())?;
        let device_name = device.name.clone();
        let cap = Self::activate(device, settings)?;

        info!("Capture started on {}", device_name);
        Ok(Self {
            cap,
            device_name,
            settings: settings.clone(),
        })
    }

    fn activate(
        device: pcap::Device,
        settings: &CaptureSettings,
    ) -> Result<pcap::Capture<pcap::Active>> {
        let name = device.name.clone();
        pcap::Capture::from_device(device)
            .with_context(|| format!("Failed to create capture on {}", name))?
            .promisc(settings.promiscuous)
            .snaplen(settings.snaplen)
            .timeout(settings.timeout_ms)
            .open()
            .with_context(|| format!("Failed to open capture on {}", name))
    }

    /// Interface name this capture is bound to.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Read the next frame. `Ok(None)` on read timeout so callers can
    /// poll the stop flag; other errors bubble up for backoff/reopen.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        match self.cap.next_packet() {
            Ok(packet) => Ok(Some(packet.data.to_vec())),
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-open the capture after a steady-state failure.
    pub fn reopen(&mut self) -> Result<()> {
        let devices = pcap::Device::list().context("Failed to enumerate capture devices")?;
        let device = devices
            .into_iter()
            .find(|d| d.name == self.device_name)
            .ok_or_else(|| anyhow!("Capture interface disappeared: {}", self.device_name))?;
        self.cap = Self::activate(device, &self.settings)?;
        info!("Capture re-opened on {}", self.device_name);
        Ok(())
    }
}
