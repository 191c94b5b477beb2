//! End-to-end tests against a live server on loopback
//!
//! Covers:
//! - RTU and Modbus-TCP request/response byte layouts
//! - exception responses (unknown function, out of range)
//! - dropped frames (bad CRC, partial frame after silence)
//! - client round trips for every function code
//! - graceful shutdown

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use modbus_core::{
    crc16, DataSizes, ModbusClient, ModbusData, ModbusError, ModbusServer, ProtocolVariant,
    ServerConfig,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;

const IO_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Helpers
// ============================================================================

async fn start_server(
    protocol: ProtocolVariant,
    capacity: usize,
) -> (ModbusServer, SocketAddr, Arc<ModbusData>) {
    let data = Arc::new(ModbusData::new(DataSizes::uniform(capacity)));
    data.preset_multiple_registers(0, &[1, 2, 3, 4, 5]).unwrap();

    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        protocol,
        read_timeout: Duration::from_millis(200),
        write_timeout: Duration::from_secs(1),
    };
    let mut server = ModbusServer::new(config, Arc::clone(&data));
    let addr = server.start().await.unwrap();
    (server, addr, data)
}

fn with_crc(body: &[u8]) -> Vec<u8> {
    let mut frame = body.to_vec();
    frame.extend_from_slice(&crc16(body).to_le_bytes());
    frame
}

async fn exchange(stream: &mut TcpStream, request: &[u8], response_len: usize) -> Vec<u8> {
    stream.write_all(request).await.unwrap();
    read_exact(stream, response_len).await
}

async fn read_exact(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut response = vec![0u8; len];
    tokio::time::timeout(IO_TIMEOUT, stream.read_exact(&mut response))
        .await
        .expect("response timed out")
        .unwrap();
    response
}

async fn client(addr: SocketAddr, protocol: ProtocolVariant) -> ModbusClient {
    ModbusClient::connect(addr, protocol, 1, IO_TIMEOUT)
        .await
        .unwrap()
}

// ============================================================================
// RTU over TCP
// ============================================================================

#[tokio::test]
async fn test_rtu_read_holding_registers() {
    let (mut server, addr, _data) = start_server(ProtocolVariant::RtuOverTcp, 10).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let response = exchange(
        &mut stream,
        &[0x01, 0x03, 0x00, 0x00, 0x00, 0x05, 0x85, 0xC9],
        15,
    )
    .await;
    assert_eq!(
        response,
        vec![0x01, 0x03, 0x0A, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04, 0x00, 0x05, 0xCF, 0x24]
    );

    server.stop().await;
}

#[tokio::test]
async fn test_rtu_force_single_coil() {
    let (mut server, addr, data) = start_server(ProtocolVariant::RtuOverTcp, 10).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let request = [0x01, 0x05, 0x00, 0x00, 0xFF, 0x00, 0x8C, 0x3A];
    let response = exchange(&mut stream, &request, 8).await;
    assert_eq!(response, request.to_vec());
    assert_eq!(data.read_coils(0, 1).unwrap(), vec![true]);

    server.stop().await;
}

#[tokio::test]
async fn test_rtu_unknown_function() {
    let (mut server, addr, _data) = start_server(ProtocolVariant::RtuOverTcp, 10).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let response = exchange(&mut stream, &with_crc(&[0x01, 0x99]), 5).await;
    assert_eq!(response, vec![0x01, 0x99, 0x01, 0x8B, 0x90]);

    server.stop().await;
}

#[tokio::test]
async fn test_rtu_unknown_function_split_across_writes() {
    let (mut server, addr, _data) = start_server(ProtocolVariant::RtuOverTcp, 10).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let frame = with_crc(&[0x01, 0x99, 0x00, 0x00, 0x00, 0x01]);
    stream.write_all(&frame[..2]).await.unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = exchange(&mut stream, &frame[2..], 5).await;
    assert_eq!(response, vec![0x01, 0x99, 0x01, 0x8B, 0x90]);

    server.stop().await;
    let stats = server.stats().snapshot();
    assert_eq!(stats.discarded_frames, 0);
    assert_eq!(stats.error_responses, 1);
}

#[tokio::test]
async fn test_rtu_out_of_range() {
    let (mut server, addr, _data) = start_server(ProtocolVariant::RtuOverTcp, 10).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let response = exchange(
        &mut stream,
        &with_crc(&[0x01, 0x03, 0x00, 0x08, 0x00, 0x05]),
        5,
    )
    .await;
    assert_eq!(response, vec![0x01, 0x83, 0x02, 0xC0, 0xF1]);

    server.stop().await;
    let stats = server.stats().snapshot();
    assert_eq!(stats.error_responses, 1);
    assert_eq!(stats.successful_responses, 0);
}

#[tokio::test]
async fn test_bad_crc_dropped_connection_survives() {
    let (mut server, addr, _data) = start_server(ProtocolVariant::RtuOverTcp, 10).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut burst = vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00];
    burst.extend_from_slice(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]);
    burst.extend_from_slice(&crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]).to_le_bytes());

    // Only the valid second frame is answered
    let response = exchange(&mut stream, &burst, 7).await;
    assert_eq!(response, with_crc(&[0x01, 0x03, 0x02, 0x00, 0x01]));

    server.stop().await;
    let stats = server.stats().snapshot();
    assert_eq!(stats.discarded_frames, 1);
    assert_eq!(stats.successful_responses, 1);
}

#[tokio::test]
async fn test_partial_frame_discarded_after_silence() {
    let (mut server, addr, _data) = start_server(ProtocolVariant::RtuOverTcp, 10).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream.write_all(&[0x01, 0x03, 0x00]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let response = exchange(
        &mut stream,
        &[0x01, 0x03, 0x00, 0x00, 0x00, 0x05, 0x85, 0xC9],
        15,
    )
    .await;
    assert_eq!(&response[..3], &[0x01, 0x03, 0x0A]);
    assert_eq!(server.stats().snapshot().discarded_frames, 1);

    server.stop().await;
}

// ============================================================================
// Modbus-TCP
// ============================================================================

#[tokio::test]
async fn test_tcp_read_echoes_transaction_id() {
    let (mut server, addr, _data) = start_server(ProtocolVariant::ModbusTcp, 10).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let request = [0xAB, 0xCD, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x01, 0x00, 0x02];
    let response = exchange(&mut stream, &request, 13).await;
    assert_eq!(
        response,
        vec![0xAB, 0xCD, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0x02, 0x00, 0x03]
    );

    server.stop().await;
}

#[tokio::test]
async fn test_tcp_bad_protocol_id_dropped() {
    let (mut server, addr, _data) = start_server(ProtocolVariant::ModbusTcp, 10).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut burst = vec![0x00, 0x01, 0x00, 0x05, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
    burst.extend_from_slice(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01]);

    let response = exchange(&mut stream, &burst, 11).await;
    assert_eq!(&response[..2], &[0x00, 0x02]);

    server.stop().await;
}

// ============================================================================
// Client round trips
// ============================================================================

async fn round_trip_all_functions(protocol: ProtocolVariant) {
    let (mut server, addr, data) = start_server(protocol, 100).await;
    data.set_discrete_inputs(3, &[true, false, true]).unwrap();
    data.set_input_registers(10, &[0xAAAA, 0x5555]).unwrap();
    let mut client = client(addr, protocol).await;

    assert_eq!(
        client.read_holding_registers(0, 5).await.unwrap(),
        vec![1, 2, 3, 4, 5]
    );
    assert_eq!(
        client.read_input_registers(10, 2).await.unwrap(),
        vec![0xAAAA, 0x5555]
    );
    assert_eq!(
        client.read_discrete_inputs(2, 5).await.unwrap(),
        vec![false, true, false, true, false]
    );

    client.write_single_coil(7, true).await.unwrap();
    client
        .write_multiple_coils(20, &[true, true, false, false, true, false, false, false, true])
        .await
        .unwrap();
    assert_eq!(
        client.read_coils(20, 9).await.unwrap(),
        vec![true, true, false, false, true, false, false, false, true]
    );
    assert_eq!(client.read_coils(7, 1).await.unwrap(), vec![true]);

    client.write_single_register(50, 0xBEEF).await.unwrap();
    client
        .write_multiple_registers(60, &[10, 20, 30])
        .await
        .unwrap();
    assert_eq!(data.read_holding_registers(50, 1).unwrap(), vec![0xBEEF]);
    assert_eq!(
        client.read_holding_registers(60, 3).await.unwrap(),
        vec![10, 20, 30]
    );

    client.close().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_client_round_trip_rtu() {
    round_trip_all_functions(ProtocolVariant::RtuOverTcp).await;
}

#[tokio::test]
async fn test_client_round_trip_tcp() {
    round_trip_all_functions(ProtocolVariant::ModbusTcp).await;
}

#[tokio::test]
async fn test_client_receives_exceptions() {
    let (mut server, addr, _data) = start_server(ProtocolVariant::ModbusTcp, 10).await;
    let mut client = client(addr, ProtocolVariant::ModbusTcp).await;

    let err = client.read_holding_registers(8, 5).await.unwrap_err();
    assert!(matches!(
        err,
        ModbusError::Exception {
            function: 0x03,
            code: 0x02
        }
    ));

    // The connection is still usable afterwards
    assert_eq!(client.read_holding_registers(0, 1).await.unwrap(), vec![1]);

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_clients_disjoint_writes() {
    let (mut server, addr, data) = start_server(ProtocolVariant::ModbusTcp, 1000).await;

    let mut tasks = JoinSet::new();
    for i in 0..8u16 {
        tasks.spawn(async move {
            let mut client = client(addr, ProtocolVariant::ModbusTcp).await;
            let values: Vec<u16> = (0..100).map(|n| i * 1000 + n).collect();
            client
                .write_multiple_registers(i * 100, &values)
                .await
                .unwrap();
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    for i in 0..8u16 {
        let expected: Vec<u16> = (0..100).map(|n| i * 1000 + n).collect();
        assert_eq!(data.read_holding_registers(i * 100, 100).unwrap(), expected);
    }
    assert_eq!(server.stats().snapshot().total_connections, 8);

    server.stop().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_stop_closes_open_connections() {
    let (mut server, addr, _data) = start_server(ProtocolVariant::RtuOverTcp, 10).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    exchange(
        &mut stream,
        &[0x01, 0x03, 0x00, 0x00, 0x00, 0x05, 0x85, 0xC9],
        15,
    )
    .await;
    assert_eq!(server.stats().snapshot().connected_clients, 1);

    server.stop().await;

    // Every connection task has exited by the time stop() returns
    assert_eq!(server.stats().snapshot().connected_clients, 0);
    let mut rest = Vec::new();
    let read = tokio::time::timeout(IO_TIMEOUT, stream.read_to_end(&mut rest))
        .await
        .unwrap();
    assert!(read.is_err() || rest.is_empty());
    assert!(TcpStream::connect(addr).await.is_err());
}
