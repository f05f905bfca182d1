//! Controller event → bus status message

use std::sync::Arc;

use tracing::{debug, trace};

use crate::address::{DatapointRef, DeviceAddress};
use crate::context::BridgeContext;
use crate::error::Result;
use crate::filter::FilterSet;
use crate::mqtt::BusPublisher;
use crate::xmlrpc::Value;

pub struct EventTranslator {
    ctx: Arc<BridgeContext>,
    filter: FilterSet,
    bus: Arc<dyn BusPublisher>,
}

impl EventTranslator {
    pub fn new(ctx: Arc<BridgeContext>, filter: FilterSet, bus: Arc<dyn BusPublisher>) -> Self {
        Self { ctx, filter, bus }
    }

    /// Publish the event as a retained status message if the filter admits it
    ///
    /// Returns whether a message was published.
    pub async fn translate(&self, address: &str, datapoint: &str, value: &Value) -> Result<bool> {
        if !self.filter.should_forward(datapoint) {
            trace!("event {}.{} filtered", address, datapoint);
            return Ok(false);
        }

        let dp = DatapointRef::new(DeviceAddress::parse(address), datapoint);
        let topic = self.ctx.status_topic(&dp);
        let payload = value.to_payload();
        debug!("mqtt > {} {}", topic, payload);

        self.bus.publish(&topic, payload, true).await?;
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::test_utils::MockBus;

    fn translator(filter: FilterSet, bus: Arc<MockBus>) -> EventTranslator {
        let ctx = Arc::new(BridgeContext::with_session_id("hmip", "http://h:3126", "s"));
        EventTranslator::new(ctx, filter, bus)
    }

    #[tokio::test]
    async fn test_event_published_retained() {
        let bus = Arc::new(MockBus::new());
        let events = translator(FilterSet::default(), bus.clone());

        let published = events
            .translate("ABC1234:1", "PRESS_SHORT", &Value::Boolean(true))
            .await
            .unwrap();

        assert!(published);
        assert_eq!(
            bus.published(),
            vec![(
                "hmip/status/ABC1234/1/PRESS_SHORT".to_string(),
                "true".to_string(),
                true
            )]
        );
    }

    #[tokio::test]
    async fn test_filtered_event_not_published() {
        let bus = Arc::new(MockBus::new());
        let filter = FilterSet::from_lists(None, Some("^RSSI_")).unwrap();
        let events = translator(filter, bus.clone());

        let published = events
            .translate("ABC1234:0", "RSSI_DEVICE", &Value::Int(-65))
            .await
            .unwrap();

        assert!(!published);
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_string_value_forwarded_verbatim() {
        let bus = Arc::new(MockBus::new());
        let events = translator(FilterSet::default(), bus.clone());

        events
            .translate("ABC1234", "FIRMWARE", &Value::from("1.4.8"))
            .await
            .unwrap();

        assert_eq!(bus.published()[0].0, "hmip/status/ABC1234//FIRMWARE");
        assert_eq!(bus.published()[0].1, "1.4.8");
    }

    #[tokio::test]
    async fn test_publish_failure_is_returned() {
        let bus = Arc::new(MockBus::failing());
        let events = translator(FilterSet::default(), bus);

        assert!(events
            .translate("ABC1234:1", "LEVEL", &Value::Double(0.5))
            .await
            .is_err());
    }
}
