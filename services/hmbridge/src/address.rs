//! Device and datapoint addressing
//!
//! The controller addresses channels as `serial:channel`; a bare `serial` is the
//! device root. Bus topics carry the same three parts as separate levels.

use std::fmt;

/// `serial[:channel]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub serial: String,
    pub channel: Option<String>,
}

impl DeviceAddress {
    pub fn new(serial: impl Into<String>, channel: Option<String>) -> Self {
        Self {
            serial: serial.into(),
            channel,
        }
    }

    /// Split at the first `:`; never fails
    pub fn parse(address: &str) -> Self {
        match address.split_once(':') {
            Some((serial, channel)) => Self::new(serial, Some(channel.to_string())),
            None => Self::new(address, None),
        }
    }

    /// Build from a topic level, where an empty level means the device root
    pub fn from_levels(serial: &str, channel: &str) -> Self {
        let channel = (!channel.is_empty()).then(|| channel.to_string());
        Self::new(serial, channel)
    }

    /// Channel as a topic level, empty for the device root
    pub fn channel_level(&self) -> &str {
        self.channel.as_deref().unwrap_or_default()
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.channel {
            Some(channel) => write!(f, "{}:{}", self.serial, channel),
            None => write!(f, "{}", self.serial),
        }
    }
}

impl From<&str> for DeviceAddress {
    fn from(address: &str) -> Self {
        Self::parse(address)
    }
}

/// `(serial, channel, datapoint)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatapointRef {
    pub address: DeviceAddress,
    pub datapoint: String,
}

impl DatapointRef {
    pub fn new(address: DeviceAddress, datapoint: impl Into<String>) -> Self {
        Self {
            address,
            datapoint: datapoint.into(),
        }
    }
}

impl fmt::Display for DatapointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.address, self.datapoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format() {
        let address = DeviceAddress::parse("ABC1234567:3");
        assert_eq!(address.serial, "ABC1234567");
        assert_eq!(address.channel.as_deref(), Some("3"));
        assert_eq!(address.to_string(), "ABC1234567:3");
    }

    #[test]
    fn test_parse_device_root() {
        let address = DeviceAddress::parse("ABC1234567");
        assert_eq!(address.serial, "ABC1234567");
        assert_eq!(address.channel, None);
        assert_eq!(address.channel_level(), "");
        assert_eq!(address.to_string(), "ABC1234567");
    }

    #[test]
    fn test_parse_splits_at_first_colon_only() {
        let address = DeviceAddress::parse("CENTRAL:0:1");
        assert_eq!(address.serial, "CENTRAL");
        assert_eq!(address.channel.as_deref(), Some("0:1"));
        assert_eq!(address.to_string(), "CENTRAL:0:1");
    }

    #[test]
    fn test_from_levels() {
        assert_eq!(
            DeviceAddress::from_levels("ABC1234", "1"),
            DeviceAddress::parse("ABC1234:1")
        );
        assert_eq!(
            DeviceAddress::from_levels("ABC1234", ""),
            DeviceAddress::parse("ABC1234")
        );
    }

    #[test]
    fn test_datapoint_display() {
        let dp = DatapointRef::new(DeviceAddress::parse("ABC1234:1"), "LEVEL");
        assert_eq!(dp.to_string(), "ABC1234:1.LEVEL");
    }
}
