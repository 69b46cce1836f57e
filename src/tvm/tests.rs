//! Cross-module tests: builder, slice, hashing and BoC together

use super::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

const ALL_OPTIONS: [BocOptions; 4] = [
    BocOptions {
        include_index: false,
        include_crc32: false,
    },
    BocOptions {
        include_index: true,
        include_crc32: false,
    },
    BocOptions {
        include_index: false,
        include_crc32: true,
    },
    BocOptions {
        include_index: true,
        include_crc32: true,
    },
];

fn random_cell(rng: &mut StdRng, pool: &[Arc<Cell>]) -> Arc<Cell> {
    let mut builder = Builder::new();
    let bits = rng.gen_range(0..=MAX_CELL_BITS);
    for _ in 0..bits {
        builder.store_bit(rng.r#gen()).unwrap();
    }
    if !pool.is_empty() {
        for _ in 0..rng.gen_range(0..=MAX_CELL_REFS) {
            let child = pool[rng.gen_range(0..pool.len())].clone();
            builder.store_ref(child).unwrap();
        }
    }
    builder.end_cell().unwrap()
}

fn random_dag(seed: u64, size: usize) -> Vec<Arc<Cell>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut pool: Vec<Arc<Cell>> = Vec::with_capacity(size);
    for _ in 0..size {
        let cell = random_cell(&mut rng, &pool);
        if rng.gen_ratio(1, 8) && cell.level() < MAX_CELL_LEVEL {
            pool.push(Cell::pruned_branch(&cell, cell.level() + 1).unwrap());
        }
        pool.push(cell);
    }
    pool
}

fn rebuild(cell: &Cell) -> Arc<Cell> {
    let references = cell.references().iter().map(|r| rebuild(r)).collect();
    Arc::new(Cell::new(cell.kind(), cell.bits().clone(), references).unwrap())
}

#[test]
fn test_random_dag_round_trip() {
    for seed in 0..8 {
        let pool = random_dag(seed, 40);
        let roots: Vec<Arc<Cell>> = pool.iter().rev().take(3).cloned().collect();

        for options in ALL_OPTIONS {
            let boc = serialize_boc(&roots, options).unwrap();
            let decoded = deserialize_boc(&boc).unwrap();
            assert_eq!(decoded.len(), roots.len());
            for (a, b) in decoded.iter().zip(&roots) {
                assert_eq!(a, b);
                assert!(a.structurally_eq(b));
                for level in 0..=MAX_CELL_LEVEL {
                    assert_eq!(a.hash_at(level), b.hash_at(level));
                    assert_eq!(a.depth_at(level), b.depth_at(level));
                }
            }

            // Canonical: encoding the decoded cells gives the same bytes
            assert_eq!(serialize_boc(&decoded, options).unwrap(), boc);
        }
    }
}

#[test]
fn test_references_point_forward() {
    let pool = random_dag(99, 30);
    let root = pool.last().unwrap().clone();
    let boc = root.to_boc(BocOptions::default()).unwrap();

    // Single root at index 0
    let size_bytes = (boc[4] & 7) as usize;
    assert_eq!(size_bytes, 1);
    assert_eq!(boc[4 + 2 + 3 * size_bytes + boc[5] as usize], 0);
    assert_eq!(Cell::from_boc(&boc).unwrap(), root);
}

#[test]
fn test_content_addressing() {
    let build = || {
        let mut leaf = Builder::new();
        leaf.store_snake_string("content addressed").unwrap();
        let leaf = leaf.end_cell().unwrap();

        let mut root = Builder::new();
        root.store_int(-42, 13).unwrap();
        root.store_coins(1_000_000).unwrap();
        root.store_ref(leaf.clone()).unwrap();
        root.store_maybe_ref(Some(leaf)).unwrap();
        root.end_cell().unwrap()
    };

    let a = build();
    let b = build();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(a.hash(), b.hash());
    assert_eq!(*rebuild(&a), *a);
}

#[test]
fn test_hash_matches_representation() {
    let pool = random_dag(7, 20);
    for cell in &pool {
        for level in 0..=MAX_CELL_LEVEL {
            // Lower levels of a pruned branch are stored, not hashed
            if cell.kind() == CellKind::PrunedBranch && level < cell.level() {
                continue;
            }
            let repr = cell.representation_at(level);
            let digest = {
                use sha2::{Digest, Sha256};
                Sha256::digest(&repr)
            };
            assert_eq!(digest.as_slice(), &cell.hash_at(level)[..], "level {level} of {cell:?}");
        }
    }
}

#[test]
fn test_capacity_boundary() {
    let full = BitString::new(vec![0xFF; 128], 0, 1023).unwrap();

    let mut builder = Builder::new();
    builder.store_bits(&full).unwrap();
    let cell = builder.end_cell().unwrap();
    assert_eq!(cell.bit_len(), 1023);
    assert_eq!(cell.descriptors()[1], 255);

    let mut builder = Builder::new();
    builder.store_bit(true).unwrap();
    let err = builder.store_bits(&full).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Capacity);

    let boc = cell.to_boc(BocOptions::default()).unwrap();
    assert_eq!(Cell::from_boc(&boc).unwrap().bit_len(), 1023);
}

#[test]
fn test_coins_round_trip_through_boc() {
    let values = [0u128, 1, 255, 256, u64::MAX as u128, (1u128 << 120) - 1];
    let mut builder = Builder::new();
    for value in values {
        builder.store_coins(value).unwrap();
    }
    assert_eq!(
        builder.store_coins(1u128 << 120).unwrap_err().kind(),
        ErrorKind::Range
    );
    let cell = builder.end_cell().unwrap();

    let decoded = Cell::from_boc(&cell.to_boc(BocOptions::default()).unwrap()).unwrap();
    let mut slice = decoded.as_slice();
    for value in values {
        assert_eq!(slice.load_coins().unwrap(), value);
    }
    slice.end_parse().unwrap();
}

#[test]
fn test_address_through_boc() {
    let addr: Address = "EQCD39VS5jcptHL8vMjEXrzGaRcCVYto7HUn4bpAOg8xqB2N".parse().unwrap();
    let mut builder = Builder::new();
    builder.store_address(Some(&addr)).unwrap();
    builder.store_address(None).unwrap();
    let b64 = boc_to_base64(&[builder.end_cell().unwrap()], BocOptions::default()).unwrap();

    let roots = base64_to_boc(&b64).unwrap();
    let mut slice = Slice::new(roots[0].clone());
    let loaded = slice.load_address().unwrap().unwrap();
    assert_eq!(loaded.to_hex(), addr.to_hex());
    assert_eq!(slice.load_address().unwrap(), None);
}

#[test]
fn test_merkle_proof_through_boc() {
    let secret = {
        let mut b = Builder::new();
        b.store_u64(0xDEAD_BEEF).unwrap();
        b.end_cell().unwrap()
    };
    let public = {
        let mut b = Builder::new();
        b.store_u8(1).unwrap();
        b.end_cell().unwrap()
    };
    let state = {
        let mut b = Builder::new();
        b.store_ref(public.clone()).unwrap();
        b.store_ref(secret.clone()).unwrap();
        b.end_cell().unwrap()
    };
    let partial = {
        let mut b = Builder::new();
        b.store_ref(public).unwrap();
        b.store_ref(Cell::pruned_branch(&secret, 1).unwrap()).unwrap();
        b.end_cell().unwrap()
    };
    assert_eq!(partial.hash_at(0), state.hash());

    let proof = Cell::merkle_proof(partial).unwrap();
    for options in ALL_OPTIONS {
        let decoded = Cell::from_boc(&proof.to_boc(options).unwrap()).unwrap();
        assert_eq!(decoded.kind(), CellKind::MerkleProof);
        let mut slice = decoded.as_slice();
        assert_eq!(slice.load_u8().unwrap(), 3);
        assert_eq!(slice.load_buffer(32).unwrap(), state.hash().to_vec());
        assert_eq!(slice.load_u16().unwrap(), state.depth());
        let inner = slice.load_ref().unwrap();
        assert_eq!(inner.hash_at(0), state.hash());
        assert_eq!(inner.reference(1).unwrap().kind(), CellKind::PrunedBranch);
    }
}

#[test]
fn test_merkle_update_through_boc() {
    let leaf = |v: u32| {
        let mut b = Builder::new();
        b.store_u32(v).unwrap();
        b.end_cell().unwrap()
    };
    let shared = Cell::pruned_branch(&leaf(5), 1).unwrap();
    let version = |v: u32| {
        let mut b = Builder::new();
        b.store_ref(leaf(v)).unwrap();
        b.store_ref(shared.clone()).unwrap();
        b.end_cell().unwrap()
    };
    let update = Cell::merkle_update(version(1), version(2)).unwrap();

    let decoded = Cell::from_boc(&update.to_boc(BocOptions::default()).unwrap()).unwrap();
    assert_eq!(decoded.kind(), CellKind::MerkleUpdate);
    assert_eq!(decoded.level(), 0);
    assert_eq!(decoded.hash(), update.hash());
}

#[test]
fn test_library_reference_through_boc() {
    let lib = Cell::library([0x42; 32]).unwrap();
    let root = {
        let mut b = Builder::new();
        b.store_ref(lib).unwrap();
        b.end_cell().unwrap()
    };
    let decoded = Cell::from_boc(&root.to_boc(BocOptions::default()).unwrap()).unwrap();
    assert_eq!(decoded.reference(0).unwrap().kind(), CellKind::LibraryReference);
    assert!(decoded.structurally_eq(&root));
}

#[test]
fn test_cells_are_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Cell>();
    assert_send_sync::<Arc<Cell>>();
    assert_send_sync::<Slice>();
}
