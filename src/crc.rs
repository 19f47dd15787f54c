//! CRC-16 (CCITT, used by the WD279x for address-mark and data-field
//! checksums) and CRC-32 (used to identify ROM images against the
//! named CRC lists). Both are plain table-based implementations --
//! no CRC crate appears anywhere in the reference corpus, so none is
//! invented; this mirrors `original_source/crc32.h`'s own fallback
//! table-based implementation.

pub const CRC16_RESET: u16 = 0xFFFF;
pub const CRC32_RESET: u32 = 0;

/// CRC-16/CCITT-FALSE, polynomial 0x1021, as used by the WD279x for
/// ID and data address marks.
pub fn crc16_byte(crc: u16, byte: u8) -> u16 {
    let mut crc = crc ^ ((byte as u16) << 8);
    for _ in 0..8 {
        crc = if crc & 0x8000 != 0 {
            (crc << 1) ^ 0x1021
        } else {
            crc << 1
        };
    }
    crc
}

pub fn crc16_block(mut crc: u16, block: &[u8]) -> u16 {
    for &b in block {
        crc = crc16_byte(crc, b);
    }
    crc
}

fn crc32_table() -> &'static [u32; 256] {
    use std::sync::OnceLock;
    static TABLE: OnceLock<[u32; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0u32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let mut c = i as u32;
            for _ in 0..8 {
                c = if c & 1 != 0 {
                    0xEDB8_8320 ^ (c >> 1)
                } else {
                    c >> 1
                };
            }
            *entry = c;
        }
        table
    })
}

/// Standard CRC-32 (zlib/gzip polynomial), as used by `romlist`/`crclist`
/// to identify BASIC/Extended BASIC ROM images.
pub fn crc32_block(crc: u32, block: &[u8]) -> u32 {
    let table = crc32_table();
    let mut c = crc ^ 0xFFFF_FFFF;
    for &b in block {
        c = table[((c ^ b as u32) & 0xFF) as usize] ^ (c >> 8);
    }
    c ^ 0xFFFF_FFFF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_of_empty_block_is_zero() {
        assert_eq!(crc32_block(CRC32_RESET, &[]), 0);
    }

    #[test]
    fn crc32_known_vector() {
        // "123456789" -> 0xCBF43926 is the standard CRC-32 check value.
        assert_eq!(crc32_block(CRC32_RESET, b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn crc16_known_vector() {
        // CRC-16/CCITT-FALSE check value for "123456789" is 0x29B1.
        assert_eq!(crc16_block(CRC16_RESET, b"123456789"), 0x29B1);
    }
}
