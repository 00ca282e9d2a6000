//! The Consumer's RPC surface: `ConsumerConsume` and
//! `ConsumerInterruptConsumption` (spec.md §6).

use async_trait::async_trait;
use serde_json::Value;

use crate::common::ConsumptionInterrupt;
use crate::discovery::server::RpcHandler;

use super::Consumer;

pub struct ConsumerService {
    consumer: Consumer,
}

impl ConsumerService {
    #[must_use]
    pub fn new(consumer: Consumer) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl RpcHandler for ConsumerService {
    async fn dispatch(&self, method: &str, argument: Value) -> Result<Value, String> {
        match method {
            crate::constants::method::CONSUMER_CONSUME => {
                let bytes: Vec<u8> = serde_json::from_value(argument).map_err(|e| e.to_string())?;
                self.consumer.consume(bytes).await;
                Ok(Value::Null)
            }
            crate::constants::method::CONSUMER_INTERRUPT_CONSUMPTION => {
                let interrupt: ConsumptionInterrupt =
                    serde_json::from_value(argument).map_err(|e| e.to_string())?;
                self.consumer
                    .install(interrupt)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(Value::Null)
            }
            other => Err(format!("unknown method {other:?} for Consumer")),
        }
    }
}
