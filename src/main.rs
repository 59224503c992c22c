use anyhow::Context;
use sdm120_meter_bridge::{
    AcquisitionCycle, BridgeConfig, BridgeState, EventLog, FreshnessTracker, LogTag,
    MeasurementSource, ModbusConfig, MonotonicClock, Sdm120Emulator, TracingLog,
};
use std::sync::Arc;
use tokio_modbus::server::rtu::Server;
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let log: Arc<dyn EventLog> = Arc::new(TracingLog);
    log.info(LogTag::Generic, "Starting SDM120 meter bridge");

    let config = BridgeConfig::from_env()?;
    log.info(
        LogTag::Config,
        &format!(
            "Source {} polled every {}ms, slave {} on {} @ {} baud",
            config.source.kind,
            config.poll_interval.as_millis(),
            config.modbus.slave_id,
            config.modbus.serial_port,
            config.modbus.baud_rate
        ),
    );

    let clock = Arc::new(MonotonicClock::new());
    let state = Arc::new(BridgeState::new());

    let source = MeasurementSource::new(config.source.kind, log.clone());
    let _acquisition = AcquisitionCycle::new(
        source,
        config.source.clone(),
        state.clone(),
        clock.clone(),
        log.clone(),
    )
    .spawn(config.poll_interval);

    let emulated_meter = Sdm120Emulator::new(
        state,
        FreshnessTracker::new(clock),
        log.clone(),
        config.modbus.slave_id,
    );
    serve_rtu(&config.modbus, emulated_meter, log.as_ref()).await
}

async fn serve_rtu(
    modbus: &ModbusConfig,
    emulated_meter: Sdm120Emulator,
    log: &dyn EventLog,
) -> anyhow::Result<()> {
    let builder = tokio_serial::new(&modbus.serial_port, modbus.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One);
    let serial = SerialStream::open(&builder)
        .with_context(|| format!("Failed to open serial port {}", modbus.serial_port))?;

    log.info(
        LogTag::Modbus,
        &format!("Serving Modbus RTU on {}", modbus.serial_port),
    );
    let server = Server::new(serial);
    server.serve_forever(emulated_meter).await?;
    Ok(())
}
