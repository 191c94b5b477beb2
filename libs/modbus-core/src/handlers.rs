//! Function-code dispatch and per-function request handlers
//!
//! Each handler decodes the request fields, validates quantities and values,
//! calls into [`ModbusData`] and builds the response frame. Failures carry
//! the error response the slave should still send back, when one exists.

use thiserror::Error;
use tracing::debug;

use crate::codec::{bool_array_to_byte_array, byte_array_to_bool_array, bytes_to_words, words_to_bytes};
use crate::constants::{COIL_OFF, COIL_ON};
use crate::data::ModbusData;
use crate::error::{ModbusError, ModbusResult};
use crate::function::FunctionCode;
use crate::packet::{Direction, ModbusPacket};

/// A request that could not be served normally
///
/// `reply` holds the error response (exception 1, 2 or 3) to write back;
/// it is `None` when the frame was too short to address a reply.
#[derive(Debug, Error)]
#[error("{cause}")]
pub struct DispatchError {
    #[source]
    pub cause: ModbusError,
    pub reply: Option<Box<ModbusPacket>>,
}

impl DispatchError {
    fn new(request: &ModbusPacket, cause: ModbusError) -> Self {
        let reply = cause
            .exception_code()
            .and_then(|code| ModbusPacket::build_error_response(request, code).ok())
            .map(Box::new);
        Self { cause, reply }
    }
}

/// Serve one request frame against the data store
pub fn dispatch(request: &ModbusPacket, data: &ModbusData) -> Result<ModbusPacket, DispatchError> {
    request
        .function_code()
        .and_then(|function| handle(function, request, data))
        .map_err(|cause| DispatchError::new(request, cause))
}

fn handle(
    function: FunctionCode,
    request: &ModbusPacket,
    data: &ModbusData,
) -> ModbusResult<ModbusPacket> {
    match function {
        FunctionCode::ReadCoilStatus => read_coil_status(request, data),
        FunctionCode::ReadDiscreteInputs => read_discrete_inputs(request, data),
        FunctionCode::ReadHoldingRegisters => read_holding_registers(request, data),
        FunctionCode::ReadInputRegisters => read_input_registers(request, data),
        FunctionCode::ForceSingleCoil => force_single_coil(request, data),
        FunctionCode::PresetSingleRegister => preset_single_register(request, data),
        FunctionCode::ForceMultipleCoils => force_multiple_coils(request, data),
        FunctionCode::PresetMultipleRegisters => preset_multiple_registers(request, data),
    }
}

/// Address and quantity of a read or multi-write request, quantity checked
/// against the function's limit
fn quantity_params(request: &ModbusPacket, function: FunctionCode) -> ModbusResult<(u16, u16)> {
    let (addr, quantity) = request.function_parameters(Direction::Request)?;
    let max = function.max_quantity();
    if quantity == 0 || quantity > max {
        return Err(ModbusError::bad_value(format!(
            "{} quantity {} outside 1...{}",
            function.name(),
            quantity,
            max
        )));
    }
    debug!(
        "FC={:02X} ({}) addr={} quantity={}",
        function.code(),
        function.name(),
        addr,
        quantity
    );
    Ok((addr, quantity))
}

/// Data block of a multi-write request, byte count checked against quantity
fn write_block(request: &ModbusPacket, function: FunctionCode, quantity: u16) -> ModbusResult<&[u8]> {
    // payload() is exactly as long as the declared byte count
    let block = request.payload(Direction::Request)?;
    let expected = function.data_len(quantity);
    if block.len() != expected {
        return Err(ModbusError::bad_value(format!(
            "{} byte count {} for quantity {} (expected {})",
            function.name(),
            block.len(),
            quantity,
            expected
        )));
    }
    Ok(block)
}

fn read_coil_status(request: &ModbusPacket, data: &ModbusData) -> ModbusResult<ModbusPacket> {
    let (addr, count) = quantity_params(request, FunctionCode::ReadCoilStatus)?;
    let coils = data.read_coils(addr, count)?;
    ModbusPacket::build_response(request, Some(&bool_array_to_byte_array(&coils)))
}

fn read_discrete_inputs(request: &ModbusPacket, data: &ModbusData) -> ModbusResult<ModbusPacket> {
    let (addr, count) = quantity_params(request, FunctionCode::ReadDiscreteInputs)?;
    let inputs = data.read_discrete_inputs(addr, count)?;
    ModbusPacket::build_response(request, Some(&bool_array_to_byte_array(&inputs)))
}

fn read_holding_registers(request: &ModbusPacket, data: &ModbusData) -> ModbusResult<ModbusPacket> {
    let (addr, count) = quantity_params(request, FunctionCode::ReadHoldingRegisters)?;
    let registers = data.read_holding_registers(addr, count)?;
    ModbusPacket::build_response(request, Some(&words_to_bytes(&registers)))
}

fn read_input_registers(request: &ModbusPacket, data: &ModbusData) -> ModbusResult<ModbusPacket> {
    let (addr, count) = quantity_params(request, FunctionCode::ReadInputRegisters)?;
    let registers = data.read_input_registers(addr, count)?;
    ModbusPacket::build_response(request, Some(&words_to_bytes(&registers)))
}

fn force_single_coil(request: &ModbusPacket, data: &ModbusData) -> ModbusResult<ModbusPacket> {
    let (addr, value) = request.function_parameters(Direction::Request)?;
    let state = match value {
        COIL_ON => true,
        COIL_OFF => false,
        other => {
            return Err(ModbusError::bad_value(format!(
                "coil value 0x{:04X} (expected 0xFF00 or 0x0000)",
                other
            )));
        },
    };
    debug!("FC=05 (ForceSingleCoil) addr={} state={}", addr, state);

    data.force_single_coil(addr, state)?;
    ModbusPacket::build_response(request, None)
}

fn preset_single_register(request: &ModbusPacket, data: &ModbusData) -> ModbusResult<ModbusPacket> {
    let (addr, value) = request.function_parameters(Direction::Request)?;
    debug!("FC=06 (PresetSingleRegister) addr={} value={}", addr, value);

    data.preset_single_register(addr, value)?;
    ModbusPacket::build_response(request, None)
}

fn force_multiple_coils(request: &ModbusPacket, data: &ModbusData) -> ModbusResult<ModbusPacket> {
    let function = FunctionCode::ForceMultipleCoils;
    let (addr, count) = quantity_params(request, function)?;
    let block = write_block(request, function, count)?;

    data.force_multiple_coils(addr, &byte_array_to_bool_array(block, count as usize))?;
    ModbusPacket::build_response(request, None)
}

fn preset_multiple_registers(request: &ModbusPacket, data: &ModbusData) -> ModbusResult<ModbusPacket> {
    let function = FunctionCode::PresetMultipleRegisters;
    let (addr, count) = quantity_params(request, function)?;
    let block = write_block(request, function, count)?;

    data.preset_multiple_registers(addr, &bytes_to_words(block))?;
    ModbusPacket::build_response(request, None)
}
