use caterva_rs::backend::filesystem::FileStore;
use caterva_rs::config::StorageConfig;
use caterva_rs::Array;
use smallvec::smallvec;

fn main() -> anyhow::Result<()> {
    // Create a temporary directory for the super-chunk to live in.
    let tmp = tempdir::TempDir::new("caterva-roundtrip")?;

    let mut storage = StorageConfig::default();
    storage.path = Some(tmp.path().join("my_array"));

    // Create a fresh, empty 20x10 array of 4-byte items, chunked 10x5,
    // blocked 5x5.
    let mut arr: Array<FileStore> = Array::empty(4, smallvec![20, 10], smallvec![10, 5], smallvec![5, 5], storage)?;

    // Fill it from a dense row-major buffer of i32 values 0..200.
    let values: Vec<i32> = (0..200).collect();
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
    arr.from_buffer(&bytes)?;

    // Read a sub-box back: rows 5..15, columns 2..8.
    let mut region = vec![0u8; 10 * 6 * 4];
    arr.get_slice_buffer(&smallvec![5, 2], &smallvec![15, 8], &smallvec![10, 6], &mut region)?;

    let region_values: Vec<i32> = region
        .chunks_exact(4)
        .map(|b| i32::from_ne_bytes(b.try_into().unwrap()))
        .collect();
    println!("{region_values:?}");
    Ok(())
}
