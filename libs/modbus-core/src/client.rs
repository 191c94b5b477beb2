//! Modbus master over TCP
//!
//! Builds requests with [`ModbusPacket::build_request`], sends them over a
//! single connection and decodes the matching response. Error responses come
//! back as `ModbusError::Exception`.
//!
//! | Function Code | Method |
//! |---------------|--------|
//! | 0x01 | `read_coils()` |
//! | 0x02 | `read_discrete_inputs()` |
//! | 0x03 | `read_holding_registers()` |
//! | 0x04 | `read_input_registers()` |
//! | 0x05 | `write_single_coil()` |
//! | 0x06 | `write_single_register()` |
//! | 0x0F | `write_multiple_coils()` |
//! | 0x10 | `write_multiple_registers()` |

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::codec::{bool_array_to_byte_array, byte_array_to_bool_array, bytes_to_words, words_to_bytes};
use crate::constants::{COIL_OFF, COIL_ON, EXCEPTION_FLAG, MAX_FRAME_SIZE};
use crate::error::{ModbusError, ModbusResult};
use crate::function::FunctionCode;
use crate::packet::{Direction, ModbusPacket};
use crate::protocol::ProtocolVariant;
use crate::transport::{read_frame, write_frame};

/// Connected Modbus master
pub struct ModbusClient {
    stream: TcpStream,
    variant: ProtocolVariant,
    unit_id: u8,
    timeout: Duration,
    transaction_id: u16,
    buf: BytesMut,
}

impl ModbusClient {
    /// Connect to a slave; `timeout` bounds the connect and every exchange
    pub async fn connect<A>(
        addr: A,
        variant: ProtocolVariant,
        unit_id: u8,
        timeout_after: Duration,
    ) -> ModbusResult<Self>
    where
        A: ToSocketAddrs,
    {
        let variant = variant.ensure_known()?;
        let stream = timeout(timeout_after, TcpStream::connect(addr))
            .await
            .map_err(|_| ModbusError::Timeout("connect".to_string()))??;
        stream.set_nodelay(true)?;
        info!(
            "Connected to {} ({}, unit {})",
            stream.peer_addr()?,
            variant,
            unit_id
        );

        Ok(Self {
            stream,
            variant,
            unit_id,
            timeout: timeout_after,
            transaction_id: 0,
            buf: BytesMut::with_capacity(MAX_FRAME_SIZE),
        })
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn set_unit_id(&mut self, unit_id: u8) {
        self.unit_id = unit_id;
    }

    /// Next MBAP transaction id, wrapping from 0xFFFF to 0
    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    /// Build a request addressed to this client's unit
    pub fn request(
        &mut self,
        function: FunctionCode,
        param1: u16,
        param2: u16,
        data: Option<&[u8]>,
    ) -> ModbusResult<ModbusPacket> {
        let transaction_id = self.next_transaction_id();
        ModbusPacket::build_request(
            self.variant,
            transaction_id,
            self.unit_id,
            function,
            param1,
            param2,
            data,
        )
    }

    /// Send `request` and wait for its response
    pub async fn execute(&mut self, request: &ModbusPacket) -> ModbusResult<ModbusPacket> {
        debug!("Dst<-: {:?}", request);
        // Stale bytes from an earlier timed-out exchange would desync framing
        self.buf.clear();

        timeout(self.timeout, write_frame(&mut self.stream, request))
            .await
            .map_err(|_| ModbusError::Timeout("sending request".to_string()))??;

        let response = timeout(
            self.timeout,
            read_frame(
                &mut self.stream,
                self.variant,
                Direction::Response,
                &mut self.buf,
            ),
        )
        .await
        .map_err(|_| ModbusError::Timeout("waiting for response".to_string()))??;
        debug!("Src->: {:?}", response);

        check_response(request, &response)?;
        Ok(response)
    }

    pub async fn read_coils(&mut self, addr: u16, count: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(FunctionCode::ReadCoilStatus, addr, count)
            .await
    }

    pub async fn read_discrete_inputs(&mut self, addr: u16, count: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(FunctionCode::ReadDiscreteInputs, addr, count)
            .await
    }

    pub async fn read_holding_registers(&mut self, addr: u16, count: u16) -> ModbusResult<Vec<u16>> {
        self.read_words(FunctionCode::ReadHoldingRegisters, addr, count)
            .await
    }

    pub async fn read_input_registers(&mut self, addr: u16, count: u16) -> ModbusResult<Vec<u16>> {
        self.read_words(FunctionCode::ReadInputRegisters, addr, count)
            .await
    }

    pub async fn write_single_coil(&mut self, addr: u16, value: bool) -> ModbusResult<()> {
        let raw = if value { COIL_ON } else { COIL_OFF };
        self.write(FunctionCode::ForceSingleCoil, addr, raw, None)
            .await
    }

    pub async fn write_single_register(&mut self, addr: u16, value: u16) -> ModbusResult<()> {
        self.write(FunctionCode::PresetSingleRegister, addr, value, None)
            .await
    }

    pub async fn write_multiple_coils(&mut self, addr: u16, values: &[bool]) -> ModbusResult<()> {
        let function = FunctionCode::ForceMultipleCoils;
        let count = checked_quantity(function, values.len())?;
        self.write(function, addr, count, Some(&bool_array_to_byte_array(values)))
            .await
    }

    pub async fn write_multiple_registers(&mut self, addr: u16, values: &[u16]) -> ModbusResult<()> {
        let function = FunctionCode::PresetMultipleRegisters;
        let count = checked_quantity(function, values.len())?;
        self.write(function, addr, count, Some(&words_to_bytes(values)))
            .await
    }

    /// Shut the connection down
    pub async fn close(mut self) -> ModbusResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn read_bits(
        &mut self,
        function: FunctionCode,
        addr: u16,
        count: u16,
    ) -> ModbusResult<Vec<bool>> {
        let payload = self.read_payload(function, addr, count).await?;
        Ok(byte_array_to_bool_array(&payload, count as usize))
    }

    async fn read_words(
        &mut self,
        function: FunctionCode,
        addr: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        let payload = self.read_payload(function, addr, count).await?;
        Ok(bytes_to_words(&payload))
    }

    async fn read_payload(
        &mut self,
        function: FunctionCode,
        addr: u16,
        count: u16,
    ) -> ModbusResult<Vec<u8>> {
        let request = self.request(function, addr, count, None)?;
        let response = self.execute(&request).await?;
        let payload = response.payload(Direction::Response)?;

        let expected = function.data_len(count);
        if payload.len() != expected {
            return Err(ModbusError::UnexpectedResponse(format!(
                "{} returned {} data bytes, expected {}",
                function.name(),
                payload.len(),
                expected
            )));
        }
        Ok(payload.to_vec())
    }

    async fn write(
        &mut self,
        function: FunctionCode,
        addr: u16,
        value: u16,
        data: Option<&[u8]>,
    ) -> ModbusResult<()> {
        let request = self.request(function, addr, value, data)?;
        let response = self.execute(&request).await?;

        let echoed = response.function_parameters(Direction::Response)?;
        if echoed != (addr, value) {
            return Err(ModbusError::UnexpectedResponse(format!(
                "{} echoed {:?}, sent {:?}",
                function.name(),
                echoed,
                (addr, value)
            )));
        }
        Ok(())
    }
}

fn checked_quantity(function: FunctionCode, len: usize) -> ModbusResult<u16> {
    let max = function.max_quantity() as usize;
    if len == 0 || len > max {
        return Err(ModbusError::bad_value(format!(
            "{} quantity {} outside 1...{}",
            function.name(),
            len,
            max
        )));
    }
    Ok(len as u16)
}

/// Match a response to its request and surface error responses
fn check_response(request: &ModbusPacket, response: &ModbusPacket) -> ModbusResult<()> {
    if response.transaction_id() != request.transaction_id() {
        return Err(ModbusError::UnexpectedResponse(format!(
            "transaction id {} for request {}",
            response.transaction_id(),
            request.transaction_id()
        )));
    }

    let device = response.device_address()?;
    if device != request.device_address()? {
        return Err(ModbusError::UnexpectedResponse(format!(
            "answer from device {}",
            device
        )));
    }

    let sent = request.raw_function_code()?;
    let received = response.raw_function_code()?;
    if received & !EXCEPTION_FLAG != sent {
        return Err(ModbusError::UnexpectedResponse(format!(
            "function 0x{:02X} for request 0x{:02X}",
            received, sent
        )));
    }

    if let Some(code) = response.exception_code() {
        return Err(ModbusError::Exception {
            function: sent,
            code,
        });
    }
    Ok(())
}
