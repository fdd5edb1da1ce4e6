//! MAC vendor lookup
//!
//! OUI database lookup, loaded once. Unresolvable addresses map to
//! "Unknown", which the risk engine treats as a small penalty.

use mac_oui::Oui;
use std::sync::OnceLock;
use tracing::warn;

static OUI_DB: OnceLock<Option<Oui>> = OnceLock::new();

fn oui_db() -> Option<&'static Oui> {
    OUI_DB
        .get_or_init(|| match Oui::default() {
            Ok(db) => Some(db),
            Err(e) => {
                warn!("OUI database unavailable: {}", e);
                None
            }
        })
        .as_ref()
}

/// Vendor name for a MAC address, "Unknown" when unresolvable.
pub fn vendor_for_mac(mac: &str) -> String {
    let Some(db) = oui_db() else {
        return "Unknown".to_string();
    };

    match db.lookup_by_mac(mac) {
        Ok(Some(entry)) => entry.company_name.clone(),
        _ => "Unknown".to_string(),
    }
}
