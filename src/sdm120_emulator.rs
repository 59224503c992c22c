use std::{future, sync::Arc};
use tokio_modbus::{prelude::*, SlaveRequest};

use crate::bridge_state::BridgeState;
use crate::error::RequestRejection;
use crate::event_log::{EventLog, LogTag};
use crate::freshness::FreshnessTracker;

/// Largest register count a single Read Input Registers request may ask for.
pub const MAX_READ_QUANTITY: u16 = 125;

/// Answers Modbus RTU requests the way an Eastron SDM120 would, from the
/// registers the acquisition cycle last published.
#[derive(Clone)]
pub struct Sdm120Emulator {
    state: Arc<BridgeState>,
    freshness: FreshnessTracker,
    log: Arc<dyn EventLog>,
    slave_id: u8,
}

impl tokio_modbus::server::Service for Sdm120Emulator {
    type Request = SlaveRequest<'static>;
    type Response = Option<Response>;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        // Other devices share the bus; stay silent for them.
        if req.slave != self.slave_id {
            return future::ready(Ok(None));
        }
        let res = self
            .evaluate(&req.request)
            .map(|words| Some(Response::ReadInputRegisters(words)))
            .map_err(|rejection| rejection.exception_code());
        future::ready(res)
    }
}

impl Sdm120Emulator {
    pub fn new(
        state: Arc<BridgeState>,
        freshness: FreshnessTracker,
        log: Arc<dyn EventLog>,
        slave_id: u8,
    ) -> Self {
        Self {
            state,
            freshness,
            log,
            slave_id,
        }
    }

    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    /// Decides what to send back for one request addressed to this meter.
    ///
    /// Only Read Input Registers (0x04) is implemented. Reads are refused with
    /// a device failure once the last accepted reading is older than the
    /// offline timeout, or before there has been one at all.
    pub fn evaluate(&self, req: &Request<'_>) -> Result<Vec<u16>, RequestRejection> {
        let Request::ReadInputRegisters(addr, cnt) = *req else {
            self.log.warn(
                LogTag::Modbus,
                &format!("Unimplemented function code in request: {req:?}"),
            );
            return Err(RequestRejection::UnsupportedFunction(
                req.function_code().value(),
            ));
        };

        let result = self.state.with_registers(|status, table| {
            if !(1..=MAX_READ_QUANTITY).contains(&cnt) {
                return Err(RequestRejection::IllegalQuantity(cnt));
            }
            if !self.freshness.has_recent_success(status) {
                return Err(RequestRejection::StaleData);
            }
            table.read(addr, cnt)
        });

        match &result {
            Ok(_) => self
                .log
                .debug(LogTag::Modbus, &format!("Input register read {addr:#06x}/{cnt}")),
            Err(rejection) => self.log.warn(
                LogTag::Modbus,
                &format!("Input register read {addr:#06x}/{cnt} refused: {rejection}"),
            ),
        }
        result
    }
}
