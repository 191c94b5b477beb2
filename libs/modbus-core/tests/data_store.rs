//! ModbusData range and concurrency properties

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;

use modbus_core::{ContainerKind, DataSizes, ModbusData, RangeError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinSet;

// ============================================================================
// Range invariant
// ============================================================================

#[test]
fn test_random_ranges_reject_without_mutation() {
    let mut rng = StdRng::seed_from_u64(0x5EED);

    for _ in 0..500 {
        let capacity = rng.gen_range(1..=512usize);
        let data = ModbusData::new(DataSizes::uniform(capacity));
        let before: Vec<u16> = (0..capacity).map(|i| i as u16).collect();
        data.preset_multiple_registers(0, &before).unwrap();

        let addr = rng.gen_range(0..=600u16);
        let count = rng.gen_range(1..=130usize);
        let values = vec![0xFFFFu16; count];
        let fits = addr as usize + count <= capacity;

        let result = data.preset_multiple_registers(addr, &values);
        if fits {
            assert!(result.is_ok(), "addr={} count={} cap={}", addr, count, capacity);
        } else {
            assert_eq!(
                result.unwrap_err(),
                RangeError {
                    kind: ContainerKind::HoldingRegisters,
                    start: addr as usize,
                    end: addr as usize + count,
                    capacity,
                }
            );
            assert_eq!(data.read_holding_registers(0, capacity as u16).unwrap(), before);
        }

        let read = data.read_coils(addr, count as u16);
        assert_eq!(read.is_ok(), fits);
    }
}

#[test]
fn test_high_addresses_never_wrap() {
    let data = ModbusData::new(DataSizes::uniform(65535));
    for count in 1..=10u16 {
        let addr = u16::MAX - count + 1;
        // addr + count == 65536 > 65535
        assert!(data.read_input_registers(addr, count).is_err());
        assert!(data.read_input_registers(addr - 1, count).is_ok());
    }
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_disjoint_writes() {
    let data = Arc::new(ModbusData::new(DataSizes::uniform(1600)));

    let mut tasks = JoinSet::new();
    for i in 0..16u16 {
        let data = Arc::clone(&data);
        tasks.spawn(async move {
            let values = vec![i + 1; 100];
            for _ in 0..50 {
                data.preset_multiple_registers(i * 100, &values).unwrap();
                tokio::task::yield_now().await;
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    for i in 0..16u16 {
        assert_eq!(
            data.read_holding_registers(i * 100, 100).unwrap(),
            vec![i + 1; 100]
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_writes_are_never_torn() {
    let data = Arc::new(ModbusData::new(DataSizes::uniform(64)));

    let mut tasks = JoinSet::new();
    for writer in 1..=4u16 {
        let data = Arc::clone(&data);
        tasks.spawn(async move {
            for _ in 0..200 {
                data.preset_multiple_registers(0, &[writer; 64]).unwrap();
                tokio::task::yield_now().await;
            }
        });
    }
    for _ in 0..4 {
        let data = Arc::clone(&data);
        tasks.spawn(async move {
            for _ in 0..200 {
                let snapshot = data.read_holding_registers(0, 64).unwrap();
                assert!(snapshot.iter().all(|v| *v == snapshot[0]), "torn read");
                assert!(snapshot[0] <= 4);
                tokio::task::yield_now().await;
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    let last = data.read_holding_registers(0, 64).unwrap();
    assert!((1..=4).contains(&last[0]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_coil_and_register_writers_do_not_block_each_other() {
    let data = Arc::new(ModbusData::new(DataSizes::uniform(128)));

    let coils = {
        let data = Arc::clone(&data);
        tokio::spawn(async move {
            for i in 0..128u16 {
                data.force_single_coil(i, true).unwrap();
            }
        })
    };
    let registers = {
        let data = Arc::clone(&data);
        tokio::spawn(async move {
            for i in 0..128u16 {
                data.preset_single_register(i, i).unwrap();
            }
        })
    };
    coils.await.unwrap();
    registers.await.unwrap();

    assert!(data.read_coils(0, 128).unwrap().into_iter().all(|c| c));
    assert_eq!(
        data.read_holding_registers(0, 128).unwrap(),
        (0..128).collect::<Vec<u16>>()
    );
}
