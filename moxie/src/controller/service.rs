//! The Controller's RPC surface: `ControllerInterruptTransmission` plus
//! the Subscriber trio it registers as (spec.md §4.4 "Subscriber
//! duties", §6).

use async_trait::async_trait;
use serde_json::Value;

use crate::common::TransmissionInterrupt;
use crate::discovery::server::RpcHandler;

use super::Controller;

pub struct ControllerService {
    controller: Controller,
}

impl ControllerService {
    #[must_use]
    pub fn new(controller: Controller) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl RpcHandler for ControllerService {
    async fn dispatch(&self, method: &str, argument: Value) -> Result<Value, String> {
        use crate::constants::method as m;
        match method {
            m::CONTROLLER_INTERRUPT_TRANSMISSION => {
                let interrupt: TransmissionInterrupt =
                    serde_json::from_value(argument).map_err(|e| e.to_string())?;
                self.controller
                    .install_transmission_interrupt(interrupt)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(Value::Null)
            }
            // Subscriber duties (spec.md §4.4): the Controller tokenizes
            // everything it receives into its completion trie and
            // otherwise ignores the stream.
            m::SUBSCRIBER_RECEIVE => {
                let bytes: Vec<u8> = serde_json::from_value(argument).map_err(|e| e.to_string())?;
                self.controller.subscriber_receive(&bytes);
                Ok(Value::Null)
            }
            m::SUBSCRIBER_TRANSMIT | m::SUBSCRIBER_LOG => Ok(Value::Null),
            other => Err(format!("unknown method {other:?} for Controller")),
        }
    }
}
