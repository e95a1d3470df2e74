//! Status events and the volatile status channel.
//!
//! Tasks and the coordinator publish [`StatusEvent`] values; rendering to a
//! user-visible string happens in one place, through the host translator, so
//! no markup leaks out of presentation. The channel itself is a single
//! volatile string that callers poll.

use std::path::PathBuf;
use std::sync::Mutex;

use crate::host::Translator;
use crate::sync::lock;
use crate::version::Version;

/// A user-visible state change worth surfacing.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Transfer progress for an in-flight download.
    Progress {
        label: String,
        /// Completed fraction in `0.0..=1.0`.
        fraction: f64,
        /// Bytes transferred so far.
        transferred: u64,
    },
    /// A plugin published a newer version.
    PluginVersionAvailable { version: Version },
    /// A plugin update check did not finish.
    PluginCheckFailed { id: String },
    /// A plugin update check found nothing newer.
    PluginUpToDate { id: String },
    /// A download failed with no updater left to try.
    TransferFailed { url: String },
    /// An update file arrived.
    Downloaded,
    /// An unsigned update arrived and a restart is starting.
    DownloadedRestarting,
    /// A signed update verified and a restart is starting.
    VerifiedRestarting,
    /// Signature verification rejected a signed update.
    VerifyFailed { error: String, url: String },
    /// An unsigned archive failed structural validation.
    CorruptArchive { url: String },
    /// The verified file could not be copied into the install slot.
    CopyFailed { path: PathBuf },
}

impl StatusEvent {
    /// Renders the event through the host translator.
    #[must_use]
    pub fn render(&self, translator: &dyn Translator) -> String {
        match self {
            Self::Progress {
                label,
                fraction,
                transferred,
            } => format!(
                "{} {}\n{}",
                label,
                format_pct(*fraction),
                translator
                    .translate("{0} transferred")
                    .replace("{0}", &format_size(*transferred)),
            ),
            Self::PluginVersionAvailable { version } => translator
                .translate("New plugin version {0} is available")
                .replace("{0}", version.as_str()),
            Self::PluginCheckFailed { id } => translator
                .translate("Update check failed for plugin {0}")
                .replace("{0}", id),
            Self::PluginUpToDate { id } => translator
                .translate("No new version is available for plugin {0}")
                .replace("{0}", id),
            Self::TransferFailed { url } => translator
                .translate("Transfer failed from {0}")
                .replace("{0}", url),
            Self::Downloaded => translator.translate("Update downloaded"),
            Self::DownloadedRestarting => format!(
                "{}\n{}",
                translator.translate("Update downloaded"),
                translator.translate("Restarting"),
            ),
            Self::VerifiedRestarting => format!(
                "{}\n{}",
                translator.translate("Update verified"),
                translator.translate("Restarting"),
            ),
            Self::VerifyFailed { error, url } => format!(
                "{} {}",
                error,
                translator.translate("from {0}").replace("{0}", url),
            ),
            Self::CorruptArchive { url } => translator
                .translate("Unsigned update file from {0} is corrupt")
                .replace("{0}", url),
            Self::CopyFailed { path } => translator
                .translate("Failed copy to {0}")
                .replace("{0}", &path.display().to_string()),
        }
    }
}

fn format_pct(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

/// Formats a byte count with a binary-prefix unit, e.g. `"1.5 MiB"`.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

/// The volatile status string callers poll.
#[derive(Debug, Default)]
pub struct StatusChannel {
    current: Mutex<String>,
}

impl StatusChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current status.
    pub fn set(&self, status: impl Into<String>) {
        *lock(&self.current) = status.into();
    }

    /// The current status, or an empty string.
    #[must_use]
    pub fn get(&self) -> String {
        lock(&self.current).clone()
    }

    /// Clears the status only if it still shows `expected`; a status set in
    /// the meantime survives its predecessor's expiry.
    pub fn clear_if(&self, expected: &str) {
        let mut current = lock(&self.current);
        if *current == expected {
            current.clear();
        }
    }
}
