use std::collections::BTreeMap;
use std::f32::consts::PI;

use crate::error::RequestRejection;
use crate::meter_reading::MeterReading;

// SDM120-style input register layout. Each quantity is an IEEE-754 float
// spread over two registers, most significant word at the lower address.
pub const REG_VOLTAGE: u16 = 0x0000;
pub const REG_CURRENT: u16 = 0x0006;
pub const REG_ACTIVE_POWER: u16 = 0x000C;
pub const REG_APPARENT_POWER: u16 = 0x0012;
pub const REG_REACTIVE_POWER: u16 = 0x0018;
pub const REG_POWER_FACTOR: u16 = 0x001E;
pub const REG_PHASE_ANGLE: u16 = 0x0024;
pub const REG_FREQUENCY: u16 = 0x0046;
pub const REG_TOTAL_ACTIVE_ENERGY: u16 = 0x0048;

/// Every quantity the emulated meter exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Voltage,
    Current,
    ActivePower,
    ApparentPower,
    ReactivePower,
    PowerFactor,
    PhaseAngle,
    Frequency,
    TotalActiveEnergy,
}

impl Quantity {
    pub const ALL: [Quantity; 9] = [
        Quantity::Voltage,
        Quantity::Current,
        Quantity::ActivePower,
        Quantity::ApparentPower,
        Quantity::ReactivePower,
        Quantity::PowerFactor,
        Quantity::PhaseAngle,
        Quantity::Frequency,
        Quantity::TotalActiveEnergy,
    ];

    pub const fn address(self) -> u16 {
        match self {
            Quantity::Voltage => REG_VOLTAGE,
            Quantity::Current => REG_CURRENT,
            Quantity::ActivePower => REG_ACTIVE_POWER,
            Quantity::ApparentPower => REG_APPARENT_POWER,
            Quantity::ReactivePower => REG_REACTIVE_POWER,
            Quantity::PowerFactor => REG_POWER_FACTOR,
            Quantity::PhaseAngle => REG_PHASE_ANGLE,
            Quantity::Frequency => REG_FREQUENCY,
            Quantity::TotalActiveEnergy => REG_TOTAL_ACTIVE_ENERGY,
        }
    }

    fn value(self, reading: &MeterReading, derived: &DerivedQuantities) -> f32 {
        match self {
            Quantity::Voltage => reading.voltage_v,
            Quantity::Current => reading.current_a,
            Quantity::ActivePower => reading.power_w,
            Quantity::ApparentPower => derived.apparent_power,
            Quantity::ReactivePower => derived.reactive_power,
            Quantity::PowerFactor => reading.power_factor,
            Quantity::PhaseAngle => derived.phase_angle_deg,
            Quantity::Frequency => reading.frequency_hz,
            Quantity::TotalActiveEnergy => reading.energy_kwh,
        }
    }
}

/// Values the meter reports but the sources don't provide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedQuantities {
    pub apparent_power: f32,
    pub reactive_power: f32,
    pub phase_angle_deg: f32,
}

impl DerivedQuantities {
    /// A power factor outside `[0, 1]` yields NaN for the reactive power or
    /// phase angle; the NaN bit pattern is served as-is.
    pub fn from_reading(reading: &MeterReading) -> Self {
        let pf = reading.power_factor;
        let apparent_power = reading.voltage_v * reading.current_a;
        Self {
            apparent_power,
            reactive_power: apparent_power * (1.0 - pf * pf).sqrt(),
            phase_angle_deg: pf.acos() * 180.0 / PI,
        }
    }
}

/// Splits a float into `[most significant word, least significant word]`.
pub fn to_be_words(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, (bits & 0xFFFF) as u16]
}

/// Inverse of [`to_be_words`].
pub fn from_be_words(words: [u16; 2]) -> f32 {
    f32::from_bits(((words[0] as u32) << 16) | words[1] as u32)
}

/// Fully populated input register image: nine floats, eighteen words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterTable {
    registers: BTreeMap<u16, u16>,
}

impl Default for RegisterTable {
    fn default() -> Self {
        Self::encode(&MeterReading::default())
    }
}

impl RegisterTable {
    pub fn encode(reading: &MeterReading) -> Self {
        let derived = DerivedQuantities::from_reading(reading);
        let mut registers = BTreeMap::new();
        for quantity in Quantity::ALL {
            let [high, low] = to_be_words(quantity.value(reading, &derived));
            registers.insert(quantity.address(), high);
            registers.insert(quantity.address() + 1, low);
        }
        Self { registers }
    }

    pub fn get(&self, address: u16) -> Option<u16> {
        self.registers.get(&address).copied()
    }

    pub fn float(&self, quantity: Quantity) -> Option<f32> {
        let high = self.get(quantity.address())?;
        let low = self.get(quantity.address() + 1)?;
        Some(from_be_words([high, low]))
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Reads `count` consecutive registers. Every address in the range has to
    /// be mapped, so reads straddling a gap are refused.
    pub fn read(&self, address: u16, count: u16) -> Result<Vec<u16>, RequestRejection> {
        let mut values = Vec::with_capacity(count.into());
        for offset in 0..count {
            let reg_addr = address
                .checked_add(offset)
                .ok_or(RequestRejection::IllegalAddress(address))?;
            match self.registers.get(&reg_addr) {
                Some(value) => values.push(*value),
                None => return Err(RequestRejection::IllegalAddress(reg_addr)),
            }
        }
        Ok(values)
    }
}
