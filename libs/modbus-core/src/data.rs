//! Shared in-memory coil and register banks
//!
//! Four independently sized containers, each behind its own `RwLock`.
//! Every access is range-checked against the fixed capacity before the lock
//! is taken, so a rejected request never mutates anything.

use std::ops::Range;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ContainerKind, RangeError};

/// Capacities of the four containers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSizes {
    pub coils: usize,
    pub discrete_inputs: usize,
    pub holding_registers: usize,
    pub input_registers: usize,
}

impl DataSizes {
    pub const fn uniform(size: usize) -> Self {
        Self {
            coils: size,
            discrete_inputs: size,
            holding_registers: size,
            input_registers: size,
        }
    }

    pub fn capacity(&self, kind: ContainerKind) -> usize {
        match kind {
            ContainerKind::Coils => self.coils,
            ContainerKind::DiscreteInputs => self.discrete_inputs,
            ContainerKind::HoldingRegisters => self.holding_registers,
            ContainerKind::InputRegisters => self.input_registers,
        }
    }
}

impl Default for DataSizes {
    fn default() -> Self {
        Self::uniform(65535)
    }
}

/// Register/coil store shared by every connection and the REST gateway
#[derive(Debug)]
pub struct ModbusData {
    sizes: DataSizes,
    coils: RwLock<Vec<bool>>,
    discrete_inputs: RwLock<Vec<bool>>,
    holding_registers: RwLock<Vec<u16>>,
    input_registers: RwLock<Vec<u16>>,
}

impl ModbusData {
    /// Create zero-initialized containers
    pub fn new(sizes: DataSizes) -> Self {
        Self {
            sizes,
            coils: RwLock::new(vec![false; sizes.coils]),
            discrete_inputs: RwLock::new(vec![false; sizes.discrete_inputs]),
            holding_registers: RwLock::new(vec![0; sizes.holding_registers]),
            input_registers: RwLock::new(vec![0; sizes.input_registers]),
        }
    }

    pub fn sizes(&self) -> DataSizes {
        self.sizes
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn read_coils(&self, addr: u16, count: u16) -> Result<Vec<bool>, RangeError> {
        self.read(&self.coils, ContainerKind::Coils, addr, count as usize)
    }

    pub fn read_discrete_inputs(&self, addr: u16, count: u16) -> Result<Vec<bool>, RangeError> {
        self.read(
            &self.discrete_inputs,
            ContainerKind::DiscreteInputs,
            addr,
            count as usize,
        )
    }

    pub fn read_holding_registers(&self, addr: u16, count: u16) -> Result<Vec<u16>, RangeError> {
        self.read(
            &self.holding_registers,
            ContainerKind::HoldingRegisters,
            addr,
            count as usize,
        )
    }

    pub fn read_input_registers(&self, addr: u16, count: u16) -> Result<Vec<u16>, RangeError> {
        self.read(
            &self.input_registers,
            ContainerKind::InputRegisters,
            addr,
            count as usize,
        )
    }

    // ========================================================================
    // Writes reachable from the wire
    // ========================================================================

    pub fn force_single_coil(&self, addr: u16, value: bool) -> Result<(), RangeError> {
        self.write(&self.coils, ContainerKind::Coils, addr, &[value])
    }

    pub fn force_multiple_coils(&self, addr: u16, values: &[bool]) -> Result<(), RangeError> {
        self.write(&self.coils, ContainerKind::Coils, addr, values)
    }

    pub fn preset_single_register(&self, addr: u16, value: u16) -> Result<(), RangeError> {
        self.write(
            &self.holding_registers,
            ContainerKind::HoldingRegisters,
            addr,
            &[value],
        )
    }

    pub fn preset_multiple_registers(&self, addr: u16, values: &[u16]) -> Result<(), RangeError> {
        self.write(
            &self.holding_registers,
            ContainerKind::HoldingRegisters,
            addr,
            values,
        )
    }

    // ========================================================================
    // Setup of the read-only containers (bootstrap and tests)
    // ========================================================================

    pub fn set_discrete_inputs(&self, addr: u16, values: &[bool]) -> Result<(), RangeError> {
        self.write(
            &self.discrete_inputs,
            ContainerKind::DiscreteInputs,
            addr,
            values,
        )
    }

    pub fn set_input_registers(&self, addr: u16, values: &[u16]) -> Result<(), RangeError> {
        self.write(
            &self.input_registers,
            ContainerKind::InputRegisters,
            addr,
            values,
        )
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Validate `addr + count <= capacity` in `usize` (no u16 wrap-around)
    fn check_range(
        &self,
        kind: ContainerKind,
        addr: u16,
        count: usize,
    ) -> Result<Range<usize>, RangeError> {
        let start = addr as usize;
        let end = start + count;
        let capacity = self.sizes.capacity(kind);
        if end > capacity {
            return Err(RangeError {
                kind,
                start,
                end,
                capacity,
            });
        }
        Ok(start..end)
    }

    fn read<T: Copy>(
        &self,
        container: &RwLock<Vec<T>>,
        kind: ContainerKind,
        addr: u16,
        count: usize,
    ) -> Result<Vec<T>, RangeError> {
        let range = self.check_range(kind, addr, count)?;
        let guard = container.read();
        Ok(guard[range].to_vec())
    }

    fn write<T: Copy>(
        &self,
        container: &RwLock<Vec<T>>,
        kind: ContainerKind,
        addr: u16,
        values: &[T],
    ) -> Result<(), RangeError> {
        let range = self.check_range(kind, addr, values.len())?;
        let mut guard = container.write();
        guard[range].copy_from_slice(values);
        Ok(())
    }
}

impl Default for ModbusData {
    fn default() -> Self {
        Self::new(DataSizes::default())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn small() -> ModbusData {
        ModbusData::new(DataSizes {
            coils: 16,
            discrete_inputs: 8,
            holding_registers: 10,
            input_registers: 4,
        })
    }

    #[test]
    fn test_new_is_zeroed() {
        let data = small();
        assert_eq!(data.read_coils(0, 16).unwrap(), vec![false; 16]);
        assert_eq!(data.read_holding_registers(0, 10).unwrap(), vec![0; 10]);
        assert_eq!(data.sizes().input_registers, 4);
    }

    #[test]
    fn test_register_writes() {
        let data = small();
        data.preset_multiple_registers(0, &[1, 2, 3, 4, 5]).unwrap();
        data.preset_single_register(9, 0xABCD).unwrap();
        assert_eq!(
            data.read_holding_registers(0, 10).unwrap(),
            vec![1, 2, 3, 4, 5, 0, 0, 0, 0, 0xABCD]
        );
    }

    #[test]
    fn test_coil_writes() {
        let data = small();
        data.force_single_coil(3, true).unwrap();
        data.force_multiple_coils(8, &[true, false, true]).unwrap();
        let coils = data.read_coils(0, 16).unwrap();
        assert!(coils[3]);
        assert!(coils[8] && !coils[9] && coils[10]);
        assert_eq!(coils.iter().filter(|c| **c).count(), 3);
    }

    #[test]
    fn test_read_only_containers_setup() {
        let data = small();
        data.set_discrete_inputs(6, &[true, true]).unwrap();
        data.set_input_registers(1, &[7, 8]).unwrap();
        assert_eq!(
            data.read_discrete_inputs(5, 3).unwrap(),
            vec![false, true, true]
        );
        assert_eq!(data.read_input_registers(0, 4).unwrap(), vec![0, 7, 8, 0]);
    }

    #[test]
    fn test_range_errors() {
        let data = small();
        let err = data.read_holding_registers(8, 3).unwrap_err();
        assert_eq!(
            err,
            RangeError {
                kind: ContainerKind::HoldingRegisters,
                start: 8,
                end: 11,
                capacity: 10
            }
        );

        // Exactly at the boundary is fine
        assert!(data.read_holding_registers(8, 2).is_ok());
        assert!(data.read_coils(16, 0).is_ok());
        assert!(data.read_coils(16, 1).is_err());
        assert!(data.set_input_registers(4, &[1]).is_err());
    }

    #[test]
    fn test_range_check_does_not_wrap_u16() {
        let data = ModbusData::new(DataSizes::uniform(65535));
        // 0xFFFF + 2 wraps to 1 in 16-bit arithmetic
        let err = data.read_holding_registers(0xFFFF, 2).unwrap_err();
        assert_eq!(err.end, 0x1_0001);
        assert!(data.preset_multiple_registers(0xFFFE, &[1, 2]).is_err());
    }

    #[test]
    fn test_failed_write_leaves_container_unchanged() {
        let data = small();
        data.preset_multiple_registers(6, &[9, 9, 9, 9]).unwrap();
        assert!(data.preset_multiple_registers(7, &[1, 2, 3, 4]).is_err());
        assert_eq!(
            data.read_holding_registers(6, 4).unwrap(),
            vec![9, 9, 9, 9]
        );
    }
}
