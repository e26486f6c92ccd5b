//! CRC32C (Castagnoli) record checksums.
//!
//! Matches the iSCSI CRC32C convention: reflected polynomial `0x1EDC6F41`,
//! accumulator initialized to `0xFFFF_FFFF`, final value is the one's
//! complement of the accumulator.
//!
//! Two implementations produce byte-identical results:
//!
//! - A hardware path using the SSE4.2 `crc32` instruction, 8 bytes per step.
//! - A sliced-by-8 software path driven by compile-time tables.
//!
//! The hardware path is selected at runtime; it is an optimization, never a
//! correctness dependency.

/// Reflected form of the Castagnoli polynomial `0x1EDC6F41`.
const POLY: u32 = 0x82F6_3B78;

/// Sliced-by-8 lookup tables, generated at compile time.
static TABLES: [[u32; 256]; 8] = build_tables();

const fn build_tables() -> [[u32; 256]; 8] {
    let mut tables = [[0u32; 256]; 8];

    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ POLY } else { crc >> 1 };
            bit += 1;
        }
        tables[0][i] = crc;
        i += 1;
    }

    let mut t = 1;
    while t < 8 {
        let mut i = 0;
        while i < 256 {
            let prev = tables[t - 1][i];
            tables[t][i] = (prev >> 8) ^ tables[0][(prev & 0xFF) as usize];
            i += 1;
        }
        t += 1;
    }

    tables
}

/// Returns `true` if the CPU exposes the SSE4.2 `crc32` instruction.
#[inline]
pub fn hardware_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::arch::is_x86_feature_detected!("sse4.2")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

fn update_soft(mut crc: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(8);
    for chunk in chunks.by_ref() {
        let lo = crc ^ u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let hi = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        crc = TABLES[7][(lo & 0xFF) as usize]
            ^ TABLES[6][((lo >> 8) & 0xFF) as usize]
            ^ TABLES[5][((lo >> 16) & 0xFF) as usize]
            ^ TABLES[4][(lo >> 24) as usize]
            ^ TABLES[3][(hi & 0xFF) as usize]
            ^ TABLES[2][((hi >> 8) & 0xFF) as usize]
            ^ TABLES[1][((hi >> 16) & 0xFF) as usize]
            ^ TABLES[0][(hi >> 24) as usize];
    }
    for &b in chunks.remainder() {
        crc = (crc >> 8) ^ TABLES[0][((crc ^ u32::from(b)) & 0xFF) as usize];
    }
    crc
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse4.2")]
unsafe fn update_hard(crc: u32, bytes: &[u8]) -> u32 {
    use core::arch::x86_64::{_mm_crc32_u64, _mm_crc32_u8};

    let mut state = u64::from(crc);
    let mut chunks = bytes.chunks_exact(8);
    for chunk in chunks.by_ref() {
        let word = u64::from_le_bytes([
            chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
        ]);
        state = _mm_crc32_u64(state, word);
    }
    let mut crc = state as u32;
    for &b in chunks.remainder() {
        crc = _mm_crc32_u8(crc, b);
    }
    crc
}

/// Incremental CRC32C hasher.
///
/// Feeds arbitrary byte slices; the record format uses this to checksum the
/// covered header prefix and the payload without concatenating them.
#[derive(Debug, Clone, Copy)]
pub struct Crc32c {
    state: u32,
    hardware: bool,
}

impl Crc32c {
    /// Creates a hasher with the iSCSI initial state.
    #[inline]
    pub fn new() -> Self {
        Self {
            state: !0,
            hardware: hardware_available(),
        }
    }

    /// Feeds bytes into the checksum.
    #[inline]
    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        #[cfg(target_arch = "x86_64")]
        if self.hardware {
            // SAFETY: `hardware` is only true when SSE4.2 was detected.
            self.state = unsafe { update_hard(self.state, bytes) };
            return self;
        }
        self.state = update_soft(self.state, bytes);
        self
    }

    /// Returns the final checksum (one's complement of the accumulator).
    #[inline]
    pub fn finalize(&self) -> u32 {
        !self.state
    }
}

impl Default for Crc32c {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot CRC32C over a byte slice.
#[inline]
pub fn crc32c(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32c::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Check values from RFC 3720 appendix B.4.
    #[test]
    fn test_iscsi_vectors() {
        assert_eq!(crc32c(b"123456789"), 0xE306_9283);
        assert_eq!(crc32c(&[0u8; 32]), 0x8A91_36AA);
        assert_eq!(crc32c(&[0xFFu8; 32]), 0x62A8_AB43);

        let ascending: Vec<u8> = (0..32).collect();
        assert_eq!(crc32c(&ascending), 0x46DD_794E);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(crc32c(&[]), 0);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data: Vec<u8> = (0u8..=255).cycle().take(1037).collect();
        let (a, b) = data.split_at(400);

        let mut hasher = Crc32c::new();
        hasher.update(a).update(b);
        assert_eq!(hasher.finalize(), crc32c(&data));
    }

    #[test]
    #[cfg(target_arch = "x86_64")]
    fn test_software_matches_hardware() {
        if !hardware_available() {
            return;
        }
        // Lengths chosen to hit the 8-byte loop, the tail, and both at once.
        for len in [0usize, 1, 7, 8, 9, 63, 64, 103, 104, 1024, 4097] {
            let data: Vec<u8> = (0..len).map(|i| (i * 31 + 7) as u8).collect();
            let soft = update_soft(!0, &data);
            // SAFETY: guarded by hardware_available above.
            let hard = unsafe { update_hard(!0, &data) };
            assert_eq!(soft, hard, "divergence at len {len}");
        }
    }
}
