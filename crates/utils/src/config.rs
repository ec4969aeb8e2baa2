use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Parameters the core reads once at construction. There is no
/// server-directive grammar to parse here (no listeners, no TLS) so a
/// plain `serde`-deserialized struct is enough, loaded from a TOML file on
/// disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Root of the per-user on-disk layout.
    pub root: PathBuf,
    /// Clock-skew grace applied to MailerId chain verification, seconds.
    pub mailerid_grace_secs: i64,
    /// Maximum validity of a MailerId session assertion, seconds.
    pub max_assertion_validity_secs: i64,
    /// Default XSP segment size in bytes.
    pub xsp_segment_size: usize,
    /// Threshold below which a send runs on the immediate (parallel) queue.
    pub immediate_send_threshold: u64,
    /// How long before expiry the introductory key is rotated, seconds.
    pub intro_key_update_before_expiry_secs: i64,
    /// Retry count for network requests before surfacing a failure.
    pub timeout_retries: u32,
    /// Fixed back-off before the inbox subscriber reconnects, seconds.
    pub subscriber_backoff_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            root: PathBuf::from("."),
            mailerid_grace_secs: 20 * 60,
            max_assertion_validity_secs: 30 * 60,
            xsp_segment_size: 16 * 256,
            immediate_send_threshold: 1024 * 1024,
            intro_key_update_before_expiry_secs: 7 * 24 * 60 * 60,
            timeout_retries: 0,
            subscriber_backoff_secs: 5,
        }
    }
}

impl CoreConfig {
    pub fn from_toml_str(s: &str) -> trc::Result<Self> {
        toml::from_str(s).map_err(|err| {
            trc::EventType::Ipc(trc::IpcEvent::MissingBodyBytes)
                .into_err()
                .reason(err)
                .details("failed to parse core configuration")
        })
    }

    pub fn users_dir(&self, address: &str) -> PathBuf {
        self.root.join("users").join(address)
    }
}
