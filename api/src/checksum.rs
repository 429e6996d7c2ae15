// Licensed under the Apache-2.0 license

/// Verify the checksum carried by a request header.
pub fn verify_checksum(checksum: u32, instr_code: u32, params: &[u32]) -> bool {
    calc_checksum(instr_code, params) == checksum
}

/// Calculate the request checksum
/// 0 - (SUM(instruction code bytes) + SUM(parameter bytes, little endian))
pub fn calc_checksum(instr_code: u32, params: &[u32]) -> u32 {
    let sum_bytes = |acc: u32, word: &u32| {
        word.to_le_bytes()
            .iter()
            .fold(acc, |acc, b| acc.wrapping_add(*b as u32))
    };
    let checksum = params
        .iter()
        .fold(sum_bytes(0, &instr_code), sum_bytes);
    0u32.wrapping_sub(checksum)
}
