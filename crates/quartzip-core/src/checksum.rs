//! CRC32 helpers.
//!
//! Hardware chunks each carry the CRC32 of their own payload; producing a
//! whole-stream checksum requires folding those per-chunk values together
//! with `crc32_combine`, the GF(2) matrix construction from zlib.

use flate2::Crc;

/// CRC32 (IEEE, as used by gzip) of a byte slice.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(data);
    crc.sum()
}

// Apply the matrix (32 x u32, one row per input bit) to a vector over GF(2).
fn gf2_matrix_times(mat: &[u32; 32], mut vec: u32) -> u32 {
    let mut sum = 0u32;
    let mut i = 0;
    while vec != 0 {
        if vec & 1 != 0 {
            sum ^= mat[i];
        }
        vec >>= 1;
        i += 1;
    }
    sum
}

fn gf2_matrix_square(square: &mut [u32; 32], mat: &[u32; 32]) {
    for n in 0..32 {
        square[n] = gf2_matrix_times(mat, mat[n]);
    }
}

/// Combine two CRC32 values as if their inputs were concatenated.
///
/// `crc_a` covers the first block, `crc_b` the second, `len_b` is the
/// second block's length in bytes.
pub fn crc32_combine(crc_a: u32, crc_b: u32, mut len_b: u64) -> u32 {
    if len_b == 0 {
        return crc_a;
    }

    let mut even = [0u32; 32]; // even-power-of-two zero operators
    let mut odd = [0u32; 32]; // odd-power-of-two zero operators

    // Operator for one zero bit: the CRC polynomial, reflected.
    odd[0] = 0xedb8_8320;
    let mut row = 1u32;
    for entry in odd.iter_mut().skip(1) {
        *entry = row;
        row <<= 1;
    }

    // Square up to the four-zero-bit operator; the loop's first squaring
    // yields the one-zero-byte operator.
    gf2_matrix_square(&mut even, &odd);
    gf2_matrix_square(&mut odd, &even);

    let mut crc = crc_a;
    loop {
        // Apply len_b zero bytes to crc_a, one bit of len_b at a time.
        gf2_matrix_square(&mut even, &odd);
        if len_b & 1 != 0 {
            crc = gf2_matrix_times(&even, crc);
        }
        len_b >>= 1;
        if len_b == 0 {
            break;
        }

        gf2_matrix_square(&mut odd, &even);
        if len_b & 1 != 0 {
            crc = gf2_matrix_times(&odd, crc);
        }
        len_b >>= 1;
        if len_b == 0 {
            break;
        }
    }

    crc ^ crc_b
}
