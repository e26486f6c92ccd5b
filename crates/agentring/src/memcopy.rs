//! SIMD-aware record body copy.
//!
//! The ring buffer moves record bodies with this copier. When AVX2 is
//! available and the destination run is long and 32-byte alignable, the copy
//! uses non-temporal stream stores so queue traffic does not evict the
//! producer's working set; an `sfence` is issued before returning, so the
//! caller's release store of the position counter publishes the body
//! correctly. In every other case the copy is a plain `copy_nonoverlapping`.
//!
//! Both paths produce byte-identical destinations; selection is keyed off
//! the capability record once at ring creation.

use crate::topology::Capabilities;

/// Below this length the streaming path is not worth the fences.
#[cfg(target_arch = "x86_64")]
const STREAM_THRESHOLD: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyKind {
    Scalar,
    #[cfg(target_arch = "x86_64")]
    Stream,
}

/// Copy strategy fixed at ring creation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BodyCopier {
    kind: CopyKind,
}

impl BodyCopier {
    /// Chooses a strategy from the capability record.
    pub(crate) fn new(caps: &Capabilities) -> Self {
        // Trust the probe only if the running CPU agrees; SIMD must never
        // become a correctness dependency on a mismatched record.
        #[cfg(target_arch = "x86_64")]
        if caps.avx2 && std::arch::is_x86_feature_detected!("avx2") {
            return Self {
                kind: CopyKind::Stream,
            };
        }
        #[cfg(not(target_arch = "x86_64"))]
        let _ = caps;
        Self {
            kind: CopyKind::Scalar,
        }
    }

    /// Always-scalar copier.
    #[cfg(test)]
    pub(crate) fn scalar() -> Self {
        Self {
            kind: CopyKind::Scalar,
        }
    }

    /// Copies `len` bytes from `src` to `dst`.
    ///
    /// # Safety
    ///
    /// `src` must be valid for `len` reads, `dst` for `len` writes, and the
    /// two ranges must not overlap.
    #[inline]
    pub(crate) unsafe fn copy(&self, src: *const u8, dst: *mut u8, len: usize) {
        match self.kind {
            CopyKind::Scalar => std::ptr::copy_nonoverlapping(src, dst, len),
            #[cfg(target_arch = "x86_64")]
            CopyKind::Stream => {
                if len < STREAM_THRESHOLD {
                    std::ptr::copy_nonoverlapping(src, dst, len);
                } else {
                    copy_stream(src, dst, len);
                }
            }
        }
    }
}

/// AVX2 copy with non-temporal stores for the aligned middle.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn copy_stream(src: *const u8, dst: *mut u8, len: usize) {
    use core::arch::x86_64::{__m256i, _mm256_loadu_si256, _mm256_stream_si256, _mm_sfence};

    // Scalar head until dst reaches 32-byte alignment.
    let head = dst.align_offset(32).min(len);
    std::ptr::copy_nonoverlapping(src, dst, head);

    let mut offset = head;
    let stream_end = head + (len - head) / 32 * 32;
    while offset < stream_end {
        let chunk = _mm256_loadu_si256(src.add(offset).cast::<__m256i>());
        _mm256_stream_si256(dst.add(offset).cast::<__m256i>(), chunk);
        offset += 32;
    }

    // Scalar tail.
    std::ptr::copy_nonoverlapping(src.add(offset), dst.add(offset), len - offset);

    // Non-temporal stores are weakly ordered; drain them before the caller's
    // release store makes the body visible.
    _mm_sfence();
}
