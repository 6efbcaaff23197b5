//! Depot directory persistence.
//!
//! A depot directory holds one `XXXXXX.drum` directory per drum (six
//! hex digits) containing one `XX.ring` file per ring (two hex
//! digits).  Ring files are the raw ring bytes, bit 0 of byte 0 first.
//! Entries matching neither pattern are ignored.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{event, Level};

use cpu::io::{Depot, Ring};

fn drum_id_of(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(".drum")?;
    if stem.len() != 6 {
        return None;
    }
    u32::from_str_radix(stem, 16).ok()
}

fn ring_id_of(name: &str) -> Option<u8> {
    let stem = name.strip_suffix(".ring")?;
    if stem.len() != 2 {
        return None;
    }
    u8::from_str_radix(stem, 16).ok()
}

/// Populate a depot from a directory tree.
pub fn load_depot(depot: &mut Depot, path: &Path) -> io::Result<()> {
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(drum_id) = drum_id_of(&name.to_string_lossy()) else {
            continue;
        };
        let drum = depot.drum_mut(drum_id);
        for ring_entry in fs::read_dir(entry.path())? {
            let ring_entry = ring_entry?;
            if !ring_entry.file_type()?.is_file() {
                continue;
            }
            let name = ring_entry.file_name();
            let Some(ring_id) = ring_id_of(&name.to_string_lossy()) else {
                continue;
            };
            let mut ring = Ring::default();
            ring.unmarshal(fs::File::open(ring_entry.path())?)?;
            event!(
                Level::DEBUG,
                "depot: drum {:06x} ring {:02x}: {} bytes",
                drum_id,
                ring_id,
                ring.byte_len()
            );
            drum.insert_ring(ring_id, ring);
        }
    }
    Ok(())
}

/// Write every drum and ring of a depot back to a directory tree.
pub fn save_depot(depot: &Depot, path: &Path) -> io::Result<()> {
    for (drum_id, drum) in depot.drums() {
        let drum_dir = path.join(format!("{drum_id:06x}.drum"));
        fs::create_dir_all(&drum_dir)?;
        for (ring_id, ring) in drum.rings() {
            let file = fs::File::create(drum_dir.join(format!("{ring_id:02x}.ring")))?;
            ring.marshal(file)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cappsim-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_name_matching() {
        assert_eq!(drum_id_of("00002a.drum"), Some(0x2a));
        assert_eq!(drum_id_of("2a.drum"), None);
        assert_eq!(drum_id_of("00002a.ring"), None);
        assert_eq!(ring_id_of("0f.ring"), Some(0x0f));
        assert_eq!(ring_id_of("00f.ring"), None);
        assert_eq!(ring_id_of("0f.drum"), None);
    }

    #[test]
    fn test_round_trip() {
        let dir = scratch_dir("round-trip");

        let mut depot = Depot::default();
        let drum = depot.drum_mut(0x2a);
        let ring = drum.select_ring(3);
        for bit in [true, false, true, true, false, false, true, false] {
            ring.send(bit).unwrap();
        }
        save_depot(&depot, &dir).unwrap();

        assert!(dir.join("00002a.drum").join("03.ring").is_file());

        let mut restored = Depot::default();
        load_depot(&mut restored, &dir).unwrap();
        let ring = restored.drum_mut(0x2a).select_ring(3);
        assert_eq!(ring.byte_len(), 1);
        let bits: Vec<bool> = std::iter::from_fn(|| ring.next_bit()).collect();
        assert_eq!(
            bits,
            vec![true, false, true, true, false, false, true, false]
        );

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_ignores_unrelated_entries() {
        let dir = scratch_dir("unrelated");
        fs::create_dir_all(dir.join("notes.drum")).unwrap();
        fs::create_dir_all(dir.join("000001.drum")).unwrap();
        fs::write(dir.join("000001.drum").join("readme.txt"), b"hello").unwrap();
        fs::write(dir.join("000001.drum").join("00.ring"), [0xa5u8]).unwrap();

        let mut depot = Depot::default();
        load_depot(&mut depot, &dir).unwrap();

        let drums: Vec<u32> = depot.drums().map(|(id, _)| id).collect();
        assert_eq!(drums, vec![1]);
        let rings: Vec<u8> = depot
            .drums()
            .flat_map(|(_, drum)| drum.rings().map(|(id, _)| id))
            .collect();
        assert_eq!(rings, vec![0]);

        let _ = fs::remove_dir_all(&dir);
    }
}
