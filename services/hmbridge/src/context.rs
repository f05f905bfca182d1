//! Process-wide bridge identity
//!
//! Created once at startup and shared by every component that needs the
//! instance name, the session id or the callback URL.

use rand::{distributions::Alphanumeric, Rng};

use crate::address::{DatapointRef, DeviceAddress};
use crate::mqtt::match_topic;

/// Prefix of every session id
pub const SESSION_PREFIX: &str = env!("CARGO_PKG_NAME");

const SHORT_ID_LEN: usize = 9;

/// Random alphanumeric id, used for session ids and ping correlation
pub fn short_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SHORT_ID_LEN)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeContext {
    instance_name: String,
    session_id: String,
    callback_url: String,
}

impl BridgeContext {
    /// New context with a freshly generated session id
    pub fn new(instance_name: impl Into<String>, callback_url: impl Into<String>) -> Self {
        Self::with_session_id(
            instance_name,
            callback_url,
            format!("{}_{}", SESSION_PREFIX, short_id()),
        )
    }

    pub fn with_session_id(
        instance_name: impl Into<String>,
        callback_url: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            instance_name: instance_name.into(),
            session_id: session_id.into(),
            callback_url: callback_url.into(),
        }
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    /// `{name}/maintenance/_bridge/online`
    pub fn online_topic(&self) -> String {
        format!("{}/maintenance/_bridge/online", self.instance_name)
    }

    /// `{name}/status/{serial}/{channel}/{datapoint}`
    pub fn status_topic(&self, dp: &DatapointRef) -> String {
        format!(
            "{}/status/{}/{}/{}",
            self.instance_name,
            dp.address.serial,
            dp.address.channel_level(),
            dp.datapoint
        )
    }

    /// `{name}/set/+/+/+`
    pub fn set_filter(&self) -> String {
        format!("{}/set/+/+/+", self.instance_name)
    }

    /// Extract the datapoint from a command topic matching `set_filter`
    pub fn parse_set_topic(&self, topic: &str) -> Option<DatapointRef> {
        let filter = self.set_filter();
        match match_topic(&filter, topic)?.as_slice() {
            [serial, channel, datapoint] if !serial.is_empty() && !datapoint.is_empty() => {
                Some(DatapointRef::new(
                    DeviceAddress::from_levels(serial, channel),
                    *datapoint,
                ))
            },
            _ => None,
        }
    }
}
